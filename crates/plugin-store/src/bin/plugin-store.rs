//! Command line front end: runs one store action and prints the JSON response.

use anyhow::{Context, Result};
use clap::Parser;
use plugin_store::installer::migration::importer_from_settings;
use plugin_store::{controller, DatabaseSettings, FormInput, HookRegistry, StoreClient, StoreSettings};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Browse, buy and install plugins from the store
#[derive(Parser, Debug)]
#[command(name = "plugin-store", version, about, long_about = None)]
struct Cli {
    /// Site root holding app/, config/ and runtime/
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Store route; repeat for several, `setServer` picks by index
    #[arg(long = "server", value_name = "URL")]
    servers: Vec<Url>,

    /// SQLite database plugin SQL scripts are applied to
    #[arg(long)]
    database: Option<String>,

    /// Replaces `__PREFIX__` in plugin SQL scripts
    #[arg(long, requires = "database")]
    table_prefix: Option<String>,

    /// Seconds before the update cache may be refreshed again
    #[arg(long)]
    cache_ttl: Option<u64>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// One of: init, captcha, register, login, plugins, getUpdates, delUpdates,
    /// purchase, install, upgrade, uninstall, purchaseRecords, unbind, setServer,
    /// levels, bindLevel
    action: String,

    /// Form fields as key=value
    fields: Vec<String>,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env = env_logger::Env::default().default_filter_or(default_level);
    // Logs go to stderr, stdout carries the response
    let _ = env_logger::Builder::from_env(env)
        .target(env_logger::Target::Stderr)
        .try_init();
}

fn settings_from(cli: &Cli) -> StoreSettings {
    let mut settings = StoreSettings::new(&cli.root).with_servers(cli.servers.clone());
    if let Some(ttl) = cli.cache_ttl {
        settings.update_cache_ttl = std::time::Duration::from_secs(ttl);
    }
    if let Some(url) = &cli.database {
        settings = settings.with_database(DatabaseSettings::new(
            url.as_str(),
            cli.table_prefix.as_deref().unwrap_or_default(),
        ));
    }
    settings
}

async fn build_client(cli: &Cli) -> Result<StoreClient> {
    let settings = settings_from(cli);
    let importer = importer_from_settings(&settings).context("Failed to open the database")?;

    StoreClient::new(settings, Arc::new(HookRegistry::new()), importer)
        .await
        .context("Failed to set up the store client")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if !controller::ACTIONS.contains(&cli.action.as_str()) {
        log::warn!("Unknown action {}", cli.action);
    }

    let client = build_client(&cli).await?;
    let form = FormInput::parse_args(&cli.fields);
    let response = controller::dispatch(&client, &cli.action, &form).await;

    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to encode response")?
    );
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
