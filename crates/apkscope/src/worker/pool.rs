//! Worker pool draining the analysis queue.
//!
//! Each worker thread polls the queue, runs the analyzer on claimed
//! jobs, and settles both the queue job and the analysis record. The
//! uploaded file is deleted once its analysis reaches a terminal state,
//! and kept on disk while retries are still possible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};
use tracing::{info_span, warn};

use crate::analysis::ApkAnalyzer;
use crate::db::{analysis_repo, Database};
use crate::queue::{FailOutcome, JobQueue, QueuedJob};
use crate::storage::UploadStore;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const REAPER_INTERVAL: Duration = Duration::from_secs(30);
/// Claims older than this are assumed to belong to a crashed worker.
const MAX_CLAIM_AGE: Duration = Duration::from_secs(600);

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` worker threads plus a reaper thread that
    /// periodically returns stale claims to the queue.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(
        db: Database,
        queue: Arc<JobQueue>,
        store: Arc<UploadStore>,
        analyzer: Arc<ApkAnalyzer>,
        worker_count: usize,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let ctx = WorkerContext {
                worker_id: format!("worker-{}", worker_id),
                db: db.clone(),
                queue: Arc::clone(&queue),
                store: Arc::clone(&store),
                analyzer: Arc::clone(&analyzer),
            };
            let shutdown_flag = Arc::clone(&shutdown);
            workers.push(thread::spawn(move || run_worker(ctx, shutdown_flag)));
        }

        let reaper = {
            let queue = Arc::clone(&queue);
            let shutdown_flag = Arc::clone(&shutdown);
            thread::spawn(move || run_reaper(queue, shutdown_flag))
        };

        info!("Started {} workers", worker_count);

        Self {
            workers,
            reaper: Some(reaper),
            shutdown,
        }
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Waits for all workers to finish their current job and exit.
    pub fn wait(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        if let Some(reaper) = self.reaper.take() {
            if let Err(e) = reaper.join() {
                error!("Reaper panicked: {:?}", e);
            }
        }

        info!("All workers have stopped");
    }
}

struct WorkerContext {
    worker_id: String,
    db: Database,
    queue: Arc<JobQueue>,
    store: Arc<UploadStore>,
    analyzer: Arc<ApkAnalyzer>,
}

fn run_worker(ctx: WorkerContext, shutdown: Arc<AtomicBool>) {
    debug!("{} started", ctx.worker_id);

    while !shutdown.load(Ordering::Relaxed) {
        match ctx.queue.claim_next(&ctx.worker_id) {
            Ok(Some(job)) => {
                let span = info_span!(
                    "job",
                    worker = %ctx.worker_id,
                    job_id = %job.id,
                    analysis_id = %job.analysis_id,
                    attempt = job.attempt
                );
                let _guard = span.enter();
                process_job(&ctx, &job);
            }
            Ok(None) => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                error!("{} failed to poll queue: {}", ctx.worker_id, e);
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    debug!("{} stopped", ctx.worker_id);
}

fn run_reaper(queue: Arc<JobQueue>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        if let Err(e) = queue.reclaim_stale(MAX_CLAIM_AGE) {
            error!("Stale claim sweep failed: {}", e);
        }
        // Sleep in short slices so shutdown stays responsive.
        let mut remaining = REAPER_INTERVAL;
        while remaining > Duration::ZERO && !shutdown.load(Ordering::Relaxed) {
            let slice = remaining.min(POLL_INTERVAL);
            thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
}

fn process_job(ctx: &WorkerContext, job: &QueuedJob) {
    debug!("Processing analysis {}", job.analysis_id);

    let record = match analysis_repo::find_by_id(&ctx.db, &job.analysis_id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            // Nothing to analyze and nothing to update; burn the job.
            warn!("No record for analysis {}, dropping job", job.analysis_id);
            fail_job(ctx, job, "analysis record missing");
            return;
        }
        Err(e) => {
            fail_job(ctx, job, &format!("record lookup failed: {}", e));
            return;
        }
    };

    if record.status.is_terminal() {
        // Redelivery after the record already settled; the job is done.
        debug!(
            "Analysis {} already {}, completing job",
            job.analysis_id, record.status
        );
        settle_job_completed(ctx, job);
        return;
    }

    // mark_processing bumps the version by exactly one when it wins, so
    // the post-transition version is known without another read.
    let current_version = match analysis_repo::mark_processing(&ctx.db, &job.analysis_id) {
        Ok(true) => record.version + 1,
        // Already in processing from an interrupted earlier delivery;
        // continue and let the version check arbitrate the write.
        Ok(false) => {
            debug!("Analysis {} already marked processing", job.analysis_id);
            record.version
        }
        Err(e) => {
            fail_job(ctx, job, &format!("failed to mark processing: {}", e));
            return;
        }
    };

    match ctx.analyzer.analyze(&job.analysis_id, &job.file_path) {
        Ok((report, output_dir)) => {
            info!(
                "Analysis {} complete, risk score {}",
                job.analysis_id, report.risk_assessment.risk_score
            );
            let written = analysis_repo::complete(
                &ctx.db,
                &job.analysis_id,
                &report,
                &output_dir.to_string_lossy(),
                current_version,
            );
            match written {
                Ok(true) => {}
                Ok(false) => warn!(
                    "Result for analysis {} discarded, record moved concurrently",
                    job.analysis_id
                ),
                Err(e) => {
                    fail_job(ctx, job, &format!("failed to write result: {}", e));
                    return;
                }
            }
            settle_job_completed(ctx, job);
        }
        Err(e) => {
            warn!("Analysis {} attempt {} failed: {}", job.analysis_id, job.attempt, e);
            fail_job(ctx, job, &e.to_string());
        }
    }
}

fn settle_job_completed(ctx: &WorkerContext, job: &QueuedJob) {
    if let Err(e) = ctx.queue.complete(job) {
        error!("Failed to complete job {}: {}", job.id, e);
    }
    ctx.store.delete_logged(&job.file_path);
}

/// Fails the queue job; on the final attempt also drives the record to
/// failed and removes the uploaded file.
fn fail_job(ctx: &WorkerContext, job: &QueuedJob, error: &str) {
    match ctx.queue.fail(job, error) {
        Ok(FailOutcome::Retried { delay }) => {
            debug!(
                "Job {} rescheduled in {}ms (attempt {}/{})",
                job.id,
                delay.as_millis(),
                job.attempt,
                job.max_attempts
            );
        }
        Ok(FailOutcome::Exhausted) => {
            info!("Job {} exhausted its attempts", job.id);
            match analysis_repo::mark_failed(&ctx.db, &job.analysis_id, error) {
                Ok(true) => {}
                Ok(false) => debug!("Analysis {} already terminal", job.analysis_id),
                Err(e) => error!(
                    "Failed to mark analysis {} failed: {}",
                    job.analysis_id, e
                ),
            }
            ctx.store.delete_logged(&job.file_path);
        }
        Err(e) => error!("Failed to fail job {}: {}", job.id, e),
    }
}
