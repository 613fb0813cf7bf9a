//! Walks a directory tree and pushes every matching file through a
//! hash → delay → report pipeline.
//!
//! ```text
//! cargo run --example crawl -- ~/src --extension rs --verbose --deadline 5
//! ```
//!
//! The crawl stops early on Ctrl-C or when the `--deadline` timer fires; both
//! paths go through [Pipeline::abort], so jobs already admitted still drain
//! through every stage.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clap::Parser;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use conveyor::{Config, Generator, Pipeline, Stage};

#[derive(Parser)]
#[command(about = "Hash every matching file under a directory")]
struct Args {
    /// Directory to walk
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Only hash files with this extension
    #[arg(long, default_value = "rs")]
    extension: String,

    /// Use synchronous handoffs between stages instead of buffered queues
    #[arg(long)]
    unbuffered: bool,

    /// Force every stage to a single worker
    #[arg(long)]
    serial: bool,

    /// Log every job movement
    #[arg(long)]
    verbose: bool,

    /// Stop the crawl after this many seconds
    #[arg(long)]
    deadline: Option<u64>,
}

/// One file on its way through the pipeline. Stages record failures in `err`
/// rather than returning them; the report stage acts on it at the end.
struct FileJob {
    id: u64,
    path: PathBuf,
    hash: Option<String>,
    err: Option<std::io::Error>,
}

/// Walks the tree on a blocking thread, handing matches to the feeder
/// through a small internal channel.
struct Crawl {
    jobs: Mutex<Receiver<FileJob>>,
    quit: Arc<AtomicBool>,
}

impl Crawl {
    fn spawn(root: PathBuf, extension: String) -> Self {
        let (tx, rx) = channel(10);
        let quit = Arc::new(AtomicBool::new(false));

        let walker_quit = quit.clone();
        tokio::task::spawn_blocking(move || walk(root, extension, tx, walker_quit));

        Self {
            jobs: Mutex::new(rx),
            quit,
        }
    }
}

fn walk(root: PathBuf, extension: String, tx: Sender<FileJob>, quit: Arc<AtomicBool>) {
    let mut id = 0;

    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if quit.load(Ordering::Acquire) {
            debug!("abort requested, stopping walk");
            break;
        }

        let is_match = entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .is_some_and(|e| e == extension.as_str());
        if !is_match {
            continue;
        }

        id += 1;
        let job = FileJob {
            id,
            path: entry.into_path(),
            hash: None,
            err: None,
        };
        if tx.blocking_send(job).is_err() {
            break;
        }
    }
}

#[async_trait]
impl Generator<FileJob> for Crawl {
    fn name(&self) -> &str {
        "crawl"
    }

    async fn next(&self) -> Option<FileJob> {
        if self.quit.load(Ordering::Acquire) {
            return None;
        }
        self.jobs.lock().await.recv().await
    }

    fn abort(&self) {
        info!("abort requested");
        self.quit.store(true, Ordering::Release);
    }
}

struct HashStage;

#[async_trait]
impl Stage<FileJob> for HashStage {
    fn name(&self) -> &str {
        "hash"
    }

    fn concurrency(&self) -> usize {
        8
    }

    async fn process(&self, job: &mut FileJob) {
        let started = Instant::now();

        match tokio::fs::read(&job.path).await {
            Ok(data) => {
                let digest = Sha256::digest(&data);
                job.hash = Some(hex::encode(digest));
                debug!(
                    id = job.id,
                    size = data.len(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "hashed"
                );
            }
            Err(e) => {
                warn!(id = job.id, path = %job.path.display(), error = %e, "read failed");
                job.err = Some(e);
            }
        }
    }
}

/// A dummy step that sleeps a random handful of milliseconds, simulating
/// jittery per-job work.
struct DelayStage;

#[async_trait]
impl Stage<FileJob> for DelayStage {
    fn name(&self) -> &str {
        "delay"
    }

    fn concurrency(&self) -> usize {
        8
    }

    async fn process(&self, job: &mut FileJob) {
        let ms = rand::rng().random_range(0..100u64);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        debug!(id = job.id, delay_ms = ms, "delayed");
    }
}

/// Terminal stage: single worker so results print in a stable order.
struct ReportStage;

#[async_trait]
impl Stage<FileJob> for ReportStage {
    fn name(&self) -> &str {
        "report"
    }

    fn concurrency(&self) -> usize {
        1
    }

    async fn process(&self, job: &mut FileJob) {
        match (&job.err, &job.hash) {
            (Some(e), _) => info!(id = job.id, path = %job.path.display(), result = %e, "failed"),
            (None, Some(hash)) => {
                info!(id = job.id, path = %job.path.display(), hash = %hash, "ok")
            }
            (None, None) => info!(id = job.id, path = %job.path.display(), "skipped"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut pipeline = Pipeline::<FileJob>::with_config(Config {
        buffered: !args.unbuffered,
        no_concurrency: args.serial,
        verbose: args.verbose,
        ..Config::default()
    });

    pipeline.set_generator(Arc::new(Crawl::spawn(args.root, args.extension)));
    pipeline.add_stages([
        Arc::new(HashStage) as Arc<dyn Stage<FileJob>>,
        Arc::new(DelayStage) as Arc<dyn Stage<FileJob>>,
        Arc::new(ReportStage) as Arc<dyn Stage<FileJob>>,
    ]);

    let pipeline = Arc::new(pipeline);

    if let Some(secs) = args.deadline {
        let deadline = pipeline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let _ = deadline.abort();
        });
    }

    let interrupted = pipeline.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = interrupted.abort();
        }
    });

    pipeline.run().await?;
    Ok(())
}
