use clap::Parser;
use dbrpc_driver::config::{DriverConfig, EngineKind};
use std::path::PathBuf;
use tokio::io::{BufReader, BufWriter};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Database driver process. Speaks the dbrpc protocol on stdin/stdout and
/// logs to stderr.
#[derive(Debug, Parser)]
#[command(name = "dbrpc-driver", version)]
struct Args {
    /// TOML file with driver settings.
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    engine: Option<EngineKind>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Database to open before answering the handshake.
    #[arg(long)]
    database: Option<String>,
    #[arg(long)]
    max_cursors: Option<usize>,
}

fn load_config(args: Args) -> anyhow::Result<DriverConfig> {
    let mut config = match &args.config {
        Some(path) => DriverConfig::from_path(path)?,
        None => DriverConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok());
    if let Some(engine) = args.engine {
        config.engine = engine;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = Some(dir);
    }
    if let Some(database) = args.database {
        config.database = Some(database);
    }
    if let Some(max) = args.max_cursors {
        config.max_cursors = max;
    }
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; everything human-readable goes to stderr.
    let filter = EnvFilter::try_from_env("DBRPC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(Args::parse());
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut writer = BufWriter::new(tokio::io::stdout());
    let exit = dbrpc_driver::run(config, &mut reader, &mut writer).await;
    std::process::exit(exit.code());
}
