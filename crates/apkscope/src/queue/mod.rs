//! Durable job queue backed by SQLite.
//!
//! Jobs are rows in `queue_jobs`. Delivery is at-least-once: a claimed
//! job that fails (or whose worker crashes) returns to `pending` and is
//! redelivered until its attempt budget is spent, with exponential
//! backoff between deliveries. Claims are serialized through the single
//! database connection, so a job is never active on two workers at once.
//!
//! The queue is constructed explicitly at startup and injected into the
//! orchestrator and worker pool; queue-level notifications go out over a
//! typed event channel handed to the caller at construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use rusqlite::params;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::QueueError;

/// Queue name shared by the upload path and the workers.
pub const DEFAULT_QUEUE_NAME: &str = "decompilation-queue";

const EVENT_BUFFER: usize = 256;

/// Per-job retry policy supplied at enqueue time.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(5000),
            backoff_cap: Duration::from_secs(300),
        }
    }
}

/// A job claimed by a worker. Ownership of the job (and the uploaded
/// file it points at) rests with the worker until `complete` or `fail`.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: String,
    pub analysis_id: String,
    pub file_path: PathBuf,
    /// Delivery attempt this claim represents, starting at 1.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl QueuedJob {
    /// True when this claim is the job's last budgeted delivery.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Queue-level notifications, consumed by logging.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Completed {
        job_id: String,
        analysis_id: String,
    },
    Retried {
        job_id: String,
        analysis_id: String,
        attempt: u32,
        delay: Duration,
    },
    Failed {
        job_id: String,
        analysis_id: String,
        error: String,
    },
}

/// Outcome of failing a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled for redelivery after the given delay.
    Retried { delay: Duration },
    /// Attempt budget spent; the job is terminally failed.
    Exhausted,
}

pub struct JobQueue {
    db: Database,
    name: String,
    events: Sender<QueueEvent>,
}

impl JobQueue {
    /// Creates a queue over the given database. Returns the queue and
    /// the receiving end of its event channel.
    pub fn new(db: Database, name: &str) -> (Self, Receiver<QueueEvent>) {
        let (events, receiver) = bounded(EVENT_BUFFER);
        (
            Self {
                db,
                name: name.to_string(),
                events,
            },
            receiver,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues a job for the given analysis. Returns the job id.
    pub fn enqueue(
        &self,
        analysis_id: &str,
        file_path: &Path,
        options: &EnqueueOptions,
    ) -> Result<String, QueueError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue_jobs (id, queue, analysis_id, file_path, status, attempts,
                 max_attempts, backoff_base_ms, backoff_cap_ms, available_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    id,
                    self.name,
                    analysis_id,
                    file_path.to_string_lossy(),
                    options.max_attempts,
                    options.backoff_base.as_millis() as i64,
                    options.backoff_cap.as_millis() as i64,
                    now.timestamp_millis(),
                    now.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        debug!("Enqueued job {} for analysis {}", id, analysis_id);
        Ok(id)
    }

    /// Claims the next deliverable job, if any. The claim increments the
    /// job's attempt counter; the select and update run under the same
    /// connection lock, so no two workers can claim the same job.
    pub fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedJob>, QueueError> {
        let now = Utc::now();

        let claimed = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, analysis_id, file_path, attempts, max_attempts FROM queue_jobs
                 WHERE queue = ?1 AND status = 'pending' AND available_at <= ?2
                 ORDER BY available_at, created_at LIMIT 1",
            )?;
            let row = stmt
                .query_map(params![self.name, now.timestamp_millis()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, u32>(4)?,
                    ))
                })?
                .next()
                .transpose()?;

            let Some((id, analysis_id, file_path, attempts, max_attempts)) = row else {
                return Ok(None);
            };

            conn.execute(
                "UPDATE queue_jobs SET status = 'claimed', attempts = attempts + 1,
                 claimed_by = ?2, claimed_at = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    id,
                    worker_id,
                    now.timestamp_millis(),
                    now.to_rfc3339()
                ],
            )?;

            Ok(Some(QueuedJob {
                id,
                analysis_id,
                file_path: PathBuf::from(file_path),
                attempt: attempts + 1,
                max_attempts,
            }))
        })?;

        Ok(claimed)
    }

    /// Marks a claimed job as successfully completed.
    pub fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let changed = self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE queue_jobs SET status = 'completed', updated_at = ?2
                 WHERE id = ?1 AND status = 'claimed'",
                params![job.id, Utc::now().to_rfc3339()],
            )?;
            Ok(changed)
        })?;

        if changed == 0 {
            return Err(QueueError::UnknownJob(job.id.clone()));
        }

        self.emit(QueueEvent::Completed {
            job_id: job.id.clone(),
            analysis_id: job.analysis_id.clone(),
        });
        Ok(())
    }

    /// Fails a claimed job. Within the attempt budget the job returns to
    /// `pending` with exponential backoff; past it, the job is terminal.
    pub fn fail(&self, job: &QueuedJob, error: &str) -> Result<FailOutcome, QueueError> {
        let now = Utc::now();

        let row = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT attempts, max_attempts, backoff_base_ms, backoff_cap_ms FROM queue_jobs
                 WHERE id = ?1 AND status = 'claimed'",
            )?;
            let row = stmt
                .query_map(params![job.id], |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u64>(2)?,
                        row.get::<_, u64>(3)?,
                    ))
                })?
                .next()
                .transpose()?;
            Ok(row)
        })?;

        let Some((attempts, max_attempts, base_ms, cap_ms)) = row else {
            return Err(QueueError::UnknownJob(job.id.clone()));
        };

        if attempts < max_attempts {
            let delay = backoff_delay(
                Duration::from_millis(base_ms),
                Duration::from_millis(cap_ms),
                attempts,
            );
            let available_at = now.timestamp_millis() + delay.as_millis() as i64;

            self.db.with_conn(|conn| {
                conn.execute(
                    "UPDATE queue_jobs SET status = 'pending', available_at = ?2,
                     claimed_by = NULL, claimed_at = NULL, last_error = ?3, updated_at = ?4
                     WHERE id = ?1",
                    params![job.id, available_at, error, now.to_rfc3339()],
                )?;
                Ok(())
            })?;

            self.emit(QueueEvent::Retried {
                job_id: job.id.clone(),
                analysis_id: job.analysis_id.clone(),
                attempt: attempts,
                delay,
            });
            Ok(FailOutcome::Retried { delay })
        } else {
            self.db.with_conn(|conn| {
                conn.execute(
                    "UPDATE queue_jobs SET status = 'failed', last_error = ?2, updated_at = ?3
                     WHERE id = ?1",
                    params![job.id, error, now.to_rfc3339()],
                )?;
                Ok(())
            })?;

            self.emit(QueueEvent::Failed {
                job_id: job.id.clone(),
                analysis_id: job.analysis_id.clone(),
                error: error.to_string(),
            });
            Ok(FailOutcome::Exhausted)
        }
    }

    /// Returns claims older than `max_claim_age` to `pending` so crashed
    /// workers' jobs get redelivered. Returns the number reclaimed.
    pub fn reclaim_stale(&self, max_claim_age: Duration) -> Result<u64, QueueError> {
        let now = Utc::now();
        let cutoff = now.timestamp_millis() - max_claim_age.as_millis() as i64;

        let reclaimed = self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE queue_jobs SET status = 'pending', available_at = ?2,
                 claimed_by = NULL, claimed_at = NULL, updated_at = ?3
                 WHERE queue = ?1 AND status = 'claimed' AND claimed_at <= ?4",
                params![self.name, now.timestamp_millis(), now.to_rfc3339(), cutoff],
            )?;
            Ok(changed as u64)
        })?;

        if reclaimed > 0 {
            warn!("Reclaimed {} stale job claim(s)", reclaimed);
        }
        Ok(reclaimed)
    }

    /// Number of jobs currently waiting for delivery (including ones in
    /// a backoff window).
    pub fn pending_count(&self) -> Result<u64, QueueError> {
        let count = self.db.with_conn(|conn| {
            let count: u64 = conn.query_row(
                "SELECT COUNT(*) FROM queue_jobs WHERE queue = ?1 AND status = 'pending'",
                params![self.name],
                |r| r.get(0),
            )?;
            Ok(count)
        })?;
        Ok(count)
    }

    /// Best-effort event emission: a full or disconnected channel drops
    /// the event rather than blocking queue operations.
    fn emit(&self, event: QueueEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("Dropping queue event: {}", e);
        }
    }
}

/// Delay before redelivery after `attempt` failed deliveries:
/// `base * 2^(attempt-1)`, capped.
fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exp).min(cap)
}
