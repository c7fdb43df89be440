use clap::{Parser, Subcommand};
use rejis::{build_template, config::Config, Cache};
use tracing::{error, info};
use tracing_appender::non_blocking;
// no EnvFilter feature; use a simple level switch via RUST_LOG

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[derive(Parser)]
#[command(name = "rejis")]
#[command(about = "Pooled Redis client with replica read failover")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "rejis.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Read a key
    Get { key: String },
    /// Write a key
    Set { key: String, value: String },
    /// Write a key with a time to live
    Setex {
        key: String,
        seconds: u64,
        value: String,
    },
    /// Delete one or more keys
    Del {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Check whether a key exists
    Exists { key: String },
    /// Set a key's time to live
    Expire { key: String, seconds: u64 },
}

fn init_logging() {
    let (non_blocking_writer, guard) = non_blocking(std::io::stderr());
    // Keep guard alive for the program lifetime to avoid log loss
    let _ = LOG_GUARD.set(guard);

    let fmt = tracing_subscriber::fmt()
        .with_writer(non_blocking_writer)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .compact();

    // Map RUST_LOG to a max level (debug/info/warn/error/trace)
    let level = match std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "warn".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::WARN,
    };

    let _ = fmt.with_max_level(level).try_init();
}

async fn execute(cache: &dyn Cache, command: &Command) -> Result<String, rejis::TemplateError> {
    let reply = match command {
        Command::Get { key } => cache
            .get(key)
            .await?
            .unwrap_or_else(|| "(nil)".to_string()),
        Command::Set { key, value } => cache.set(key, value).await?,
        Command::Setex {
            key,
            seconds,
            value,
        } => cache.setex(key, *seconds, value).await?,
        Command::Del { keys } => cache.del(keys).await?.to_string(),
        Command::Exists { key } => cache.exists(key).await?.to_string(),
        Command::Expire { key, seconds } => cache.expire(key, *seconds).await?.to_string(),
    };
    Ok(reply)
}

async fn run_with_config_path(
    config_path: &str,
    command: &Command,
) -> Result<String, Box<dyn std::error::Error>> {
    let config = Config::from_yaml_file(config_path).await?;
    let cache = build_template(&config).await?;
    info!("Using {} template ({} reads)", config.template.kind(), cache.policy_name());

    let result = execute(cache.as_ref(), command).await;
    cache.destroy().await;
    Ok(result?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();
    match run_with_config_path(&args.config, &args.command).await {
        Ok(reply) => {
            println!("{}", reply);
            Ok(())
        }
        Err(e) => {
            error!("{:?} failed: {}", args.command, e);
            Err(e)
        }
    }
}
