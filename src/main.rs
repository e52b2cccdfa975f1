use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use quotakeeper::config::{LoggingConfig, QuotaConfig};
use quotakeeper::ratelimit::{RateLimit, RateLimiter, RequestContext};
use quotakeeper::store::StoreRegistry;

/// Sliding-window rate limiting against a configured counter store.
#[derive(Debug, Parser)]
#[command(name = "quotakeeper", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "QUOTAKEEPER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate a key one or more times and print each outcome as JSON
    Check {
        /// Key to limit
        #[arg(short, long)]
        key: String,

        /// Events allowed per period
        #[arg(short, long)]
        limit: u64,

        /// Window length in seconds
        #[arg(short, long)]
        period: u64,

        /// Backend name (memory, redis, memcached); defaults to the configured store
        #[arg(short, long)]
        store: Option<String>,

        /// Number of evaluations to run
        #[arg(short, long, default_value_t = 1)]
        times: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = QuotaConfig::load(cli.config.as_deref())?;

    init_tracing(&config.logging);

    info!("Starting Quotakeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let registry = StoreRegistry::connect(&config).await?;
    let limiter = RateLimiter::new(Arc::new(registry));

    match cli.command {
        Command::Check {
            key,
            limit,
            period,
            store,
            times,
        } => {
            let mut rule = RateLimit::new(limit, period).by(key);
            if let Some(store) = store {
                rule = rule.store(store);
            }
            let rule = rule.validated()?;
            let ctx = RequestContext::new("cli", "local");

            for _ in 0..times {
                let evaluation = limiter.check(&ctx, &rule).await?;
                println!("{}", serde_json::to_string(&evaluation)?);
            }
        }
    }

    Ok(())
}

/// Initialize tracing; `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
