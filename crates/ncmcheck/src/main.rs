use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use ncmcheck::config::{LoggingConfig, DATABASE_PATH_ENV};
use ncmcheck::pipeline::{BroadcastProgress, ProgressReporter};
use ncmcheck::{
    load_config, BatchRunner, Config, Database, JobQueue, NcmcheckError, NewRecord,
    PoolSettings, RecordFilter, RecordValidator, Shutdown, SubprocessClassifier, WorkerPool,
};

#[derive(Parser)]
#[command(name = "ncmcheck")]
#[command(about = "Validates product classification codes in batches", long_about = None)]
struct Cli {
    /// Config file (default: ~/.ncmcheck/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process queued batches until interrupted
    Worker,
    /// Accept a JSON array of {"description", "code"} objects as a new batch
    Submit {
        file: PathBuf,
        /// Name recorded for the batch (default: the file name)
        #[arg(long)]
        filename: Option<String>,
    },
    /// Show the progress of one batch
    Status { batch_id: String },
    /// List the records of a batch
    Records {
        batch_id: String,
        #[arg(long, default_value = "all")]
        filter: RecordFilter,
    },
    /// List the most recent batches
    Batches {
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Re-queue expired claims and batches that were never enqueued
    Recover {
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> ncmcheck::Result<()> {
    let config = match resolve_config_path(cli.config) {
        Some(path) => Some(load_config(&path)?),
        None => None,
    };

    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_else(LoggingConfig::default);
    ncmcheck::logging::init(&logging)?;

    let db_path = resolve_database_path(config.as_ref())
        .ok_or_else(|| {
            NcmcheckError::Usage(format!(
                "Could not determine a database path; set {}",
                DATABASE_PATH_ENV
            ))
        })?;
    let db = Database::open(&db_path)?;

    match cli.command {
        Commands::Worker => {
            let config = config.ok_or_else(|| {
                NcmcheckError::Usage("The worker needs a config file with a classifier".to_string())
            })?;
            run_worker(db, config).await?;
        }
        Commands::Submit { file, filename } => {
            let queue = queue_for(&db, config.as_ref());
            let records = read_records(&file)?;
            let name = filename.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string())
            });
            let batch = ncmcheck::submit_batch(&db, &queue, &name, records)?;
            print_json(&batch)?;
        }
        Commands::Status { batch_id } => match ncmcheck::status(&db, &batch_id)? {
            Some(status) => print_json(&status)?,
            None => return Err(NcmcheckError::BatchNotFound(batch_id)),
        },
        Commands::Records { batch_id, filter } => {
            let records = ncmcheck::list_records(&db, &batch_id, filter)?;
            print_json(&records)?;
        }
        Commands::Batches { limit } => {
            let batches = ncmcheck::list_batches(&db, limit)?;
            print_json(&batches)?;
        }
        Commands::Recover { older_than_secs } => {
            let queue = queue_for(&db, config.as_ref());
            let older_than = older_than_secs
                .map(Duration::from_secs)
                .or_else(|| config.as_ref().map(|c| c.queue.lease()))
                .unwrap_or_else(|| ncmcheck::config::QueueConfig::default().lease());
            let recovered = queue.recover(older_than)?;
            print_json(&recovered)?;
        }
    }

    Ok(())
}

async fn run_worker(db: Database, config: Config) -> ncmcheck::Result<()> {
    info!("Starting ncmcheck worker v{}", env!("CARGO_PKG_VERSION"));

    let queue = queue_for(&db, Some(&config));
    let classifier = Arc::new(SubprocessClassifier::from_config(&config.classifier));
    let validator = RecordValidator::new(classifier, config.classifier.timeout());

    let progress = Arc::new(BroadcastProgress::default());
    spawn_progress_logger(&progress);

    let runner = BatchRunner::new(db, validator, config.runner.record_concurrency)
        .with_progress(progress as Arc<dyn ProgressReporter>);

    let shutdown = Shutdown::new();
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Interrupt received, finishing in-flight work...");
        handler_shutdown.trigger();
    })?;

    let pool = WorkerPool::start(
        queue,
        Arc::new(runner),
        PoolSettings::from_config(config.worker_count, &config.queue),
        shutdown.clone(),
    );

    shutdown.signal().recv().await;
    pool.shutdown();
    pool.wait().await;

    Ok(())
}

fn spawn_progress_logger(progress: &BroadcastProgress) {
    let mut events = progress.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!("progress: {:?}", event),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} progress events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn queue_for(db: &Database, config: Option<&Config>) -> JobQueue {
    let poll_interval = config
        .map(|c| c.queue.poll_interval())
        .unwrap_or_else(|| ncmcheck::config::QueueConfig::default().poll_interval());
    JobQueue::new(db.clone(), poll_interval)
}

fn read_records(path: &Path) -> ncmcheck::Result<Vec<NewRecord>> {
    let content = std::fs::read_to_string(path).map_err(|source| NcmcheckError::ReadInput {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn resolve_config_path(explicit_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path);
    }

    let user_config = dirs::home_dir()?.join(".ncmcheck").join("config.json");
    user_config.exists().then_some(user_config)
}

fn resolve_database_path(config: Option<&Config>) -> Option<PathBuf> {
    match config {
        Some(config) => config.resolved_database_path(),
        None => std::env::var_os(DATABASE_PATH_ENV)
            .map(PathBuf::from)
            .or_else(ncmcheck::db::default_database_path),
    }
}
