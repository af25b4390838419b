// pickem entry point.
//
// Startup sequence:
// 1. Parse arguments
// 2. Load config (seeding config/ from defaults/ on first run)
// 3. Initialize tracing (stderr, filter from RUST_LOG or config)
// 4. Open database
// 5. Build the data source (NHL web API or offline captures)
// 6. Run the command

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{debug, info};

use pickem_app::cli::{App, Cli};
use pickem_app::nhl::NhlWebClient;
use pickem_app::offline;
use pickem_core::config;
use pickem_core::source::GameDataSource;
use pickem_core::store::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load_config_in(&cli.home).context("failed to load configuration")?;
    init_tracing(&config.log_filter)?;
    debug!(team = %config.team.abbrev, home = %cli.home.display(), "config loaded");

    let db_path = if config.db_path.is_absolute() {
        config.db_path.clone()
    } else {
        cli.home.join(&config.db_path)
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(&db_path.to_string_lossy()).context("failed to open database")?;
    debug!(path = %db_path.display(), "database opened");

    let source: Arc<dyn GameDataSource> = match &cli.offline {
        Some(dir) => Arc::new(offline::load_dir(dir)?),
        None => {
            info!(base_url = %config.nhl.base_url, "using NHL web API");
            Arc::new(NhlWebClient::from_config(&config.nhl)?)
        }
    };

    let app = App::new(Arc::new(store), source, config.draft, config.scoring);
    let mut stdout = std::io::stdout().lock();
    app.run(&cli.command, Utc::now(), &mut stdout).await
}

/// Log to stderr so command output on stdout stays clean.
fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
