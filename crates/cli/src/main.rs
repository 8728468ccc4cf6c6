mod bindings_commands;
mod config_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context as _,
    clap::{Parser, Subcommand},
    etm_channels::{Coordinator, DEFAULT_INBOX_CAPACITY, LoopbackChannel},
    etm_config::EtmConfig,
    etm_telegram::{MasterConfig, MasterStores, TelegramMaster, TeloxideTransport},
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "etm", about = "Telegram master channel bridge", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of etm.{yaml,yml,toml,json}).
    #[arg(long, global = true, env = "ETM_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory holding tgdata.db (overrides config value).
    #[arg(long, global = true, env = "ETM_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge (default when no subcommand is provided).
    Run {
        /// Register the built-in loopback channel, which echoes messages back.
        #[arg(long)]
        loopback: bool,
    },
    /// Inspect and edit chat links offline.
    Bindings {
        #[command(subcommand)]
        action: bindings_commands::BindingsAction,
    },
    /// Validate the configuration file and report errors/warnings.
    CheckConfig,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Load the config, applying command-line overrides. Any problem is fatal.
fn load_config(cli: &Cli) -> anyhow::Result<EtmConfig> {
    let mut config = etm_config::discover_and_load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    Ok(config)
}

/// Open `tgdata.db` in the data directory, creating it and its tables when
/// missing.
async fn open_database(config: &EtmConfig) -> anyhow::Result<SqlitePool> {
    let path = etm_config::resolve_data_dir(config)?.join(etm_config::DATABASE_FILENAME);
    let url = format!("sqlite:{}?mode=rwc", path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    etm_bindings::run_migrations(&pool).await?;
    info!(path = %path.display(), "database ready");
    Ok(pool)
}

async fn run(config: EtmConfig, loopback: bool) -> anyhow::Result<()> {
    let pool = open_database(&config).await?;
    let master_config = MasterConfig::from(&config);

    let transport = TeloxideTransport::connect(&config.token, master_config.poll_timeout).await?;
    let bot_username = transport.username().map(str::to_string);

    let (mut coordinator, inbox) = Coordinator::new(DEFAULT_INBOX_CAPACITY);
    if loopback {
        coordinator.register(Arc::new(LoopbackChannel::new(coordinator.inbox_sender())));
    }

    let stores = MasterStores::sqlite(pool, &master_config);
    let master = TelegramMaster::new(
        Arc::new(transport),
        bot_username,
        coordinator,
        inbox,
        stores,
        master_config,
    );
    master.start().await?;
    info!("bridge running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    master.stop().await;
    info!(network_errors = master.network_error_count(), "bridge stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "etm starting");

    match &cli.command {
        None => run(load_config(&cli)?, false).await,
        Some(Commands::Run { loopback }) => run(load_config(&cli)?, *loopback).await,
        Some(Commands::Bindings { action }) => {
            let config = load_config(&cli)?;
            let pool = open_database(&config).await?;
            bindings_commands::handle_bindings(action, &config, pool).await
        },
        Some(Commands::CheckConfig) => config_commands::check(cli.config.as_deref()),
    }
}
