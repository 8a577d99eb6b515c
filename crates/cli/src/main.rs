use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::{error, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use mingle_config::{MingleConfig, Severity};

#[derive(Parser)]
#[command(name = "mingle", about = "Mingle — interest-based random chat gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Explicit config file path (overrides discovery).
    #[arg(long, global = true, env = "MINGLE_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path, or `:memory:` (overrides config value).
    #[arg(long, global = true, env = "MINGLE_DATABASE")]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Serve,
    /// Validate the configuration and exit.
    Doctor,
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<MingleConfig> {
    let mut config = match &cli.config {
        Some(path) => mingle_config::load_config(path)?,
        None => mingle_config::discover_and_load(),
    };
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = load_config(&cli)?;
    let diagnostics = mingle_config::validate(&config);
    for diag in &diagnostics {
        match diag.severity {
            Severity::Error => error!(path = diag.path, "{}", diag.message),
            Severity::Warning => warn!(path = diag.path, "{}", diag.message),
        }
    }

    match cli.command {
        Some(Commands::Doctor) => {
            if mingle_config::has_errors(&diagnostics) {
                anyhow::bail!("configuration has errors");
            }
            println!("configuration ok");
            Ok(())
        },
        Some(Commands::Serve) | None => {
            if mingle_config::has_errors(&diagnostics) {
                anyhow::bail!("refusing to start with configuration errors");
            }
            mingle_gateway::run(config).await
        },
    }
}
