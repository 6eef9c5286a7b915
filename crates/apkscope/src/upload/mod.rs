//! Upload orchestration: store, validate, dedup, record, enqueue.
//!
//! This is the synchronous core behind the upload endpoint. Every
//! failure path after the bytes hit disk removes the stored file again,
//! so rejected uploads leave nothing behind.

use std::sync::Arc;

use tracing::{info, info_span, warn};

use crate::db::{analysis_repo, Database};
use crate::error::UploadError;
use crate::hasher;
use crate::queue::{EnqueueOptions, JobQueue};
use crate::storage::UploadStore;
use crate::validator::StructuralValidator;

/// What the upload endpoint returns for an accepted package.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub analysis_id: String,
    /// The stored filename; doubles as the upload's wire-level file id.
    pub file_id: String,
    /// True when an existing analysis for the same content was reused.
    pub deduplicated: bool,
}

pub struct UploadOrchestrator {
    db: Database,
    store: UploadStore,
    validator: StructuralValidator,
    queue: Arc<JobQueue>,
    enqueue_options: EnqueueOptions,
}

impl UploadOrchestrator {
    pub fn new(db: Database, store: UploadStore, queue: Arc<JobQueue>) -> Self {
        Self {
            db,
            store,
            validator: StructuralValidator::new(),
            queue,
            enqueue_options: EnqueueOptions::default(),
        }
    }

    /// Overrides the default retry policy applied to enqueued jobs.
    pub fn with_retry(mut self, options: EnqueueOptions) -> Self {
        self.enqueue_options = options;
        self
    }

    /// Runs the full intake pipeline for one uploaded package.
    ///
    /// Accepted uploads end with a queued analysis record and a job on
    /// the queue. Content already covered by one of the caller's live
    /// analyses is not re-queued; the caller gets that analysis id
    /// instead. Dedup is per user, so the returned id is always one the
    /// caller can read back.
    pub fn handle_upload(
        &self,
        user_id: &str,
        original_name: &str,
        content: &[u8],
    ) -> Result<UploadReceipt, UploadError> {
        if content.is_empty() {
            return Err(UploadError::NoFile);
        }

        let span = info_span!("upload", user = user_id, name = original_name);
        let _guard = span.enter();

        let stored_path = self
            .store
            .save(original_name, content)
            .map_err(|e| UploadError::Internal(e.to_string()))?;
        let file_id = stored_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Err(failure) = self.validator.validate(&stored_path) {
            info!("Rejecting upload: {}", failure);
            self.store.delete_logged(&stored_path);
            return Err(UploadError::Validation(failure));
        }

        let content_hash = hasher::sha256_hex(content);

        match analysis_repo::find_active_by_hash(&self.db, user_id, &content_hash) {
            Ok(Some(existing)) => {
                info!(
                    "Duplicate content, reusing analysis {} ({})",
                    existing.id, existing.status
                );
                self.store.delete_logged(&stored_path);
                return Ok(UploadReceipt {
                    analysis_id: existing.id,
                    file_id,
                    deduplicated: true,
                });
            }
            Ok(None) => {}
            Err(e) => {
                self.store.delete_logged(&stored_path);
                return Err(UploadError::Internal(e.to_string()));
            }
        }

        let record = analysis_repo::AnalysisRecord::new(user_id, original_name, &content_hash);
        if let Err(e) = analysis_repo::insert(&self.db, &record) {
            // A concurrent upload by the same user of the same content can
            // win the insert race on the live-hash index; fall back to its
            // record.
            if let Ok(Some(existing)) =
                analysis_repo::find_active_by_hash(&self.db, user_id, &content_hash)
            {
                info!("Lost insert race, reusing analysis {}", existing.id);
                self.store.delete_logged(&stored_path);
                return Ok(UploadReceipt {
                    analysis_id: existing.id,
                    file_id,
                    deduplicated: true,
                });
            }
            self.store.delete_logged(&stored_path);
            return Err(UploadError::Internal(e.to_string()));
        }

        if let Err(e) = self
            .queue
            .enqueue(&record.id, &stored_path, &self.enqueue_options)
        {
            warn!("Enqueue failed for analysis {}: {}", record.id, e);
            if let Err(mark_err) =
                analysis_repo::mark_failed(&self.db, &record.id, &e.to_string())
            {
                warn!("Failed to mark analysis {} failed: {}", record.id, mark_err);
            }
            self.store.delete_logged(&stored_path);
            return Err(UploadError::Internal(e.to_string()));
        }

        info!("Accepted upload as analysis {}", record.id);
        Ok(UploadReceipt {
            analysis_id: record.id,
            file_id,
            deduplicated: false,
        })
    }
}
