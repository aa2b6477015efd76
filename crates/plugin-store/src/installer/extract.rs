use anyhow::{Context, Result};
use std::path::Path;

/// Extract a zip archive over `dest_dir`.
///
/// Existing files are overwritten, files missing from the archive are left alone.
/// Entries whose names would land outside `dest_dir` are skipped.
pub fn extract_zip_file(archive_path: &Path, dest_dir: &Path) -> Result<usize> {
    log::debug!("Extracting {:?} to: {:?}", archive_path, dest_dir);

    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Create extraction dir {:?}", dest_dir))?;

    let file = std::fs::File::open(archive_path)
        .with_context(|| format!("Open archive {:?}", archive_path))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Read archive {:?}", archive_path))?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let relative = match file.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => {
                log::warn!("Skipping unsafe archive entry: {}", file.name());
                continue;
            }
        };
        let outpath = dest_dir.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)
                .with_context(|| format!("Create dir {:?}", outpath))?;
        } else {
            if let Some(p) = outpath.parent() {
                if !p.exists() {
                    std::fs::create_dir_all(p).with_context(|| format!("Create dir {:?}", p))?;
                }
            }
            let mut outfile = std::fs::File::create(&outpath)
                .with_context(|| format!("Write file {:?}", outpath))?;
            std::io::copy(&mut file, &mut outfile)?;
            written += 1;
        }

        // Set permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }

    log::debug!("Zip extraction complete ({} files)", written);
    Ok(written)
}

/// True when `dir` holds at least one entry.
pub fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::FileOptions;

    fn build_zip(path: &Path, entries: &[(&str, &str)]) {
        let f = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(f);
        for (name, body) in entries {
            zip.start_file::<&str, ()>(name, FileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn extraction_merges_over_existing_tree() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("a.zip");
        build_zip(
            &archive,
            &[("Config/Info.php", "new"), ("Controller/Index.php", "ctrl")],
        );

        let dest = tmp.path().join("plugin");
        std::fs::create_dir_all(dest.join("Config")).unwrap();
        std::fs::write(dest.join("Config/Info.php"), "old").unwrap();
        std::fs::write(dest.join("local.txt"), "keep").unwrap();

        let written = extract_zip_file(&archive, &dest).unwrap();
        assert_eq!(written, 2);
        assert_eq!(
            std::fs::read_to_string(dest.join("Config/Info.php")).unwrap(),
            "new"
        );
        assert_eq!(std::fs::read_to_string(dest.join("local.txt")).unwrap(), "keep");
        assert!(dest.join("Controller/Index.php").exists());
    }

    #[test]
    fn traversal_entries_are_skipped() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("evil.zip");
        build_zip(&archive, &[("../escape.txt", "x"), ("ok.txt", "y")]);

        let dest = tmp.path().join("plugin");
        extract_zip_file(&archive, &dest).unwrap();
        assert!(dest.join("ok.txt").exists());
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("broken.zip");
        std::fs::write(&archive, b"not a zip").unwrap();
        assert!(extract_zip_file(&archive, &tmp.path().join("plugin")).is_err());
    }

    #[test]
    fn has_entries_detects_content() {
        let tmp = tempdir().unwrap();
        assert!(!has_entries(tmp.path()));
        std::fs::write(tmp.path().join("f"), "x").unwrap();
        assert!(has_entries(tmp.path()));
        assert!(!has_entries(&tmp.path().join("missing")));
    }
}
