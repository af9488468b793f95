use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pulsewatch::alerting::evaluation_service::EvaluationService;
use pulsewatch::alerting::failure_tracker::FailureTracker;
use pulsewatch::db::services::{MemoryStore, MonitorStore, PgStore};
use pulsewatch::monitors::{Monitor, MonitorExecutor};
use pulsewatch::notifications::TelegramSender;
use pulsewatch::server::config::ServerConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Keep subscribers and failure state in memory instead of Postgres
    #[arg(long)]
    in_memory: bool,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info,sea_orm=warn` level if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    dotenv().ok();

    // Logging needs the configured directory, so config errors go to stderr.
    let config = ServerConfig::load(args.config.as_deref()).inspect_err(|e| {
        eprintln!("Failed to load server configuration: {e}");
    })?;

    init_logging(&config.log_dir);
    info!(
        version = VERSION,
        monitor_types = ?Monitor::registered_tags().collect::<Vec<_>>(),
        "Starting pulsewatch."
    );

    // --- Store Setup ---
    let store: Arc<dyn MonitorStore> = if args.in_memory {
        info!("Using in-memory store; state is lost on exit.");
        Arc::new(MemoryStore::new())
    } else {
        let pg = PgStore::connect(&config.database_url)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to connect to the database."))?;
        pg.ensure_schema().await?;
        Arc::new(pg)
    };

    // --- Notification + Evaluation Setup ---
    let notifier = Arc::new(TelegramSender::new(
        config.telegram_api_url.clone(),
        config.telegram_bot_token.clone(),
    ));
    let tracker = FailureTracker::new(store.clone(), notifier, config.suppression_policy());
    let client = MonitorExecutor::build_client(config.request_timeout_ceiling())?;
    let executor = MonitorExecutor::new(client, tracker);
    let evaluation_service = Arc::new(EvaluationService::new(
        store,
        executor,
        config.check_interval(),
    ));
    let evaluation_handle = evaluation_service.spawn();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping evaluation.");
    evaluation_handle.abort();

    Ok(())
}
