#![allow(dead_code)]

use plugin_store::store::credentials::{CredentialStore, StoreCredentials};
use plugin_store::{HookRegistry, StoreClient, StoreSettings};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use url::Url;
use zip::write::FileOptions;

pub const APP_ID: &str = "app-1";
pub const APP_KEY: &str = "secret-key";

pub fn settings(root: &Path, servers: &[String]) -> StoreSettings {
    StoreSettings::new(root).with_servers(
        servers
            .iter()
            .map(|s| Url::parse(s).expect("server url"))
            .collect(),
    )
}

/// Client with stored credentials for `APP_ID` / `APP_KEY`.
pub async fn logged_in_client(
    root: &Path,
    servers: &[String],
    hooks: Arc<HookRegistry>,
) -> StoreClient {
    let settings = settings(root, servers);
    CredentialStore::new(settings.credentials_path())
        .save(&StoreCredentials {
            app_id: APP_ID.to_string(),
            app_key: APP_KEY.to_string(),
            server: 0,
        })
        .await
        .expect("save credentials");
    StoreClient::new(settings, hooks, None)
        .await
        .expect("client")
}

pub async fn anonymous_client(root: &Path, servers: &[String]) -> StoreClient {
    StoreClient::new(settings(root, servers), Arc::new(HookRegistry::new()), None)
        .await
        .expect("client")
}

pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        for (name, body) in entries {
            zip.start_file::<&str, ()>(name, FileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

pub fn generic_plugin_archive(version: &str) -> Vec<u8> {
    let info = format!(
        "<?php\nreturn [\n    \\App\\Consts\\Plugin::NAME => \"Demo\",\n    \\App\\Consts\\Plugin::VERSION => \"{}\",\n];\n",
        version
    );
    zip_bytes(&[("Config/Info.php", info.as_str()), ("Hook/Index.php", "<?php")])
}

/// Decoded `application/x-www-form-urlencoded` body.
pub fn form_fields(body: &[u8]) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

pub fn staging_is_empty(root: &Path) -> bool {
    let dir = StoreSettings::new(root).staging_dir();
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
