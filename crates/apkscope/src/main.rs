use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use apkscope::api::{self, ApiState};
use apkscope::config::Config;
use apkscope::queue::QueueEvent;
use apkscope::{
    ApkAnalyzer, Database, JobQueue, UploadOrchestrator, UploadStore, WorkerPool,
};

#[derive(Parser)]
#[command(name = "apkscope")]
#[command(about = "APK upload and analysis service", version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "APKSCOPE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> apkscope::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            apkscope::load_config(path)?
        }
        None => {
            info!("No config file given, using defaults");
            apkscope::config::load_config_from_str("{}")?
        }
    };

    if config.auth_tokens.is_empty() {
        warn!("No auth tokens configured; all authenticated requests will be rejected");
    }

    info!("Starting apkscope v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::open(&config.database_path)?;

    let (queue, events) = JobQueue::new(db.clone(), &config.queue.name);
    let queue = Arc::new(queue);
    spawn_event_logger(events);

    let store = Arc::new(UploadStore::new(&config.upload_dir));
    let analyzer = Arc::new(ApkAnalyzer::new(&config.output_dir));

    let pool = WorkerPool::start(
        db.clone(),
        Arc::clone(&queue),
        Arc::clone(&store),
        analyzer,
        config.worker_count,
    );

    let orchestrator = Arc::new(
        UploadOrchestrator::new(
            db.clone(),
            UploadStore::new(&config.upload_dir),
            Arc::clone(&queue),
        )
        .with_retry(config.queue.retry.to_enqueue_options()),
    );

    let state = Arc::new(ApiState::new(db, orchestrator, &config));
    let app = api::router(state, config.limits.max_upload_bytes);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| apkscope::ConfigError::Validation {
            message: format!("Invalid bind address: {}", e),
        })?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, draining workers");
    pool.shutdown();
    pool.wait();

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    // Route `log` macros from our own modules and dependencies into
    // tracing.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to initialize log bridge: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("apkscope=info")),
        )
        .init();
}

/// Logs queue-level notifications on a dedicated thread; the channel
/// closes when the queue is dropped.
fn spawn_event_logger(events: crossbeam_channel::Receiver<QueueEvent>) {
    std::thread::spawn(move || {
        for event in events {
            match event {
                QueueEvent::Completed {
                    job_id,
                    analysis_id,
                } => info!("Job {} completed (analysis {})", job_id, analysis_id),
                QueueEvent::Retried {
                    job_id,
                    analysis_id,
                    attempt,
                    delay,
                } => warn!(
                    "Job {} (analysis {}) failed attempt {}, retrying in {}ms",
                    job_id,
                    analysis_id,
                    attempt,
                    delay.as_millis()
                ),
                QueueEvent::Failed {
                    job_id,
                    analysis_id,
                    error,
                } => error!(
                    "Job {} (analysis {}) exhausted retries: {}",
                    job_id, analysis_id, error
                ),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
