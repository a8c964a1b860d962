mod channel_commands;
mod config_commands;
mod db_commands;
mod run_command;
mod target_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    postrelay_config::RelayConfig,
    postrelay_store::SqliteTargetStore,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "postrelay", about = "Forward Telegram channel posts to webhooks")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of `postrelay.toml`).
    #[arg(long, global = true, env = "POSTRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL (overrides `store.database_url`).
    #[arg(long, global = true, env = "POSTRELAY_DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll Telegram and forward channel posts (default when no subcommand is provided).
    Run,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Owners allowed to register channels.
    Owners {
        #[command(subcommand)]
        action: channel_commands::OwnerAction,
    },
    /// Monitored channels.
    Channels {
        #[command(subcommand)]
        action: channel_commands::ChannelAction,
    },
    /// Webhook targets of a channel.
    Targets {
        #[command(subcommand)]
        action: target_commands::TargetAction,
    },
    /// Database management (migrate, clear).
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
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

/// Load the config file and apply command-line overrides.
fn load_config(cli: &Cli) -> anyhow::Result<RelayConfig> {
    let mut config = match cli.config {
        Some(ref path) => postrelay_config::load_config(path)?,
        None => postrelay_config::discover_and_load(),
    };
    if let Some(ref url) = cli.database_url {
        config.store.database_url = url.clone();
    }
    Ok(config)
}

async fn open_store(config: &RelayConfig) -> anyhow::Result<SqliteTargetStore> {
    Ok(SqliteTargetStore::connect(&config.store.database_url).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "postrelay starting");

    let config_path = cli.config.clone();
    match cli.command {
        None | Some(Commands::Run) => {
            let config = load_config(&cli)?;
            run_command::run(config_path.as_deref(), config).await
        },
        Some(Commands::Config { ref action }) => {
            config_commands::handle_config(action, config_path.as_deref())
        },
        Some(Commands::Owners { ref action }) => {
            let store = open_store(&load_config(&cli)?).await?;
            channel_commands::handle_owners(action, &store).await
        },
        Some(Commands::Channels { ref action }) => {
            let store = open_store(&load_config(&cli)?).await?;
            channel_commands::handle_channels(action, &store).await
        },
        Some(Commands::Targets { ref action }) => {
            let store = open_store(&load_config(&cli)?).await?;
            target_commands::handle_targets(action, &store).await
        },
        Some(Commands::Db { ref action }) => {
            let config = load_config(&cli)?;
            db_commands::handle_db(action, &config.store.database_url).await
        },
    }
}
