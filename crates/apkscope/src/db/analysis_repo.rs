//! Analysis record repository — one record per accepted upload.
//!
//! Status transitions are forward-only and enforced by guarded UPDATE
//! statements: `queued -> processing -> {analyzed | failed}`. Terminal
//! states are never overwritten, and result writes are version-checked
//! so a retried worker cannot clobber a concurrent writer.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Database, DatabaseError};
use crate::analysis::AnalysisReport;

/// Lifecycle status of an analysis record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Queued,
    Processing,
    Analyzed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Queued => "queued",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Analyzed => "analyzed",
            AnalysisStatus::Failed => "failed",
        }
    }

    fn parse(s: &str, id: &str) -> Self {
        match s {
            "queued" => AnalysisStatus::Queued,
            "processing" => AnalysisStatus::Processing,
            "analyzed" => AnalysisStatus::Analyzed,
            "failed" => AnalysisStatus::Failed,
            other => {
                log::warn!(
                    "Unknown analysis status '{}' for record {}, defaulting to Failed",
                    other,
                    id
                );
                AnalysisStatus::Failed
            }
        }
    }

    /// True once no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Analyzed | AnalysisStatus::Failed)
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analysis record, persisted per accepted upload.
#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub id: String,
    pub user_id: String,
    pub apk_name: String,
    pub content_hash: String,
    pub status: AnalysisStatus,
    pub output_path: Option<String>,
    pub error_details: Option<String>,
    pub report: Option<AnalysisReport>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Creates a fresh queued record with a generated id.
    pub fn new(user_id: &str, apk_name: &str, content_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            apk_name: apk_name.to_string(),
            content_hash: content_hash.to_string(),
            status: AnalysisStatus::Queued,
            output_path: None,
            error_details: None,
            report: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let id: String = row.get("id")?;
        let status_str: String = row.get("status")?;
        let report_json: Option<String> = row.get("report")?;

        let report = match report_json {
            Some(json) => match serde_json::from_str(&json) {
                Ok(report) => Some(report),
                Err(e) => {
                    log::warn!("Discarding unreadable report for record {}: {}", id, e);
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            status: AnalysisStatus::parse(&status_str, &id),
            user_id: row.get("user_id")?,
            apk_name: row.get("apk_name")?,
            content_hash: row.get("content_hash")?,
            output_path: row.get("output_path")?,
            error_details: row.get("error_details")?,
            report,
            version: row.get("version")?,
            created_at: parse_timestamp(&row.get::<_, String>("created_at")?),
            updated_at: parse_timestamp(&row.get::<_, String>("updated_at")?),
            id,
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("Failed to parse timestamp '{}': {}", s, e);
            Utc::now()
        })
}

/// Inserts a new record. Fails if the user already has a live
/// (non-failed) record with the same content hash.
pub fn insert(db: &Database, record: &AnalysisRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO analyses (id, user_id, apk_name, content_hash, status, output_path,
             error_details, report, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.user_id,
                record.apk_name,
                record.content_hash,
                record.status.as_str(),
                record.output_path,
                record.error_details,
                record
                    .report
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(|e| DatabaseError::InvalidPayload {
                        id: record.id.clone(),
                        reason: e.to_string(),
                    })?,
                record.version,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    })
}

/// Finds a record by its id.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<AnalysisRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM analyses WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], AnalysisRecord::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds the user's non-failed record with the given content hash
/// (dedup lookup). Scoped per user so dedup never hands a caller a
/// record they cannot read back.
pub fn find_active_by_hash(
    db: &Database,
    user_id: &str,
    content_hash: &str,
) -> Result<Option<AnalysisRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM analyses
             WHERE user_id = ?1 AND content_hash = ?2 AND status != 'failed'",
        )?;
        let mut rows = stmt.query_map(params![user_id, content_hash], AnalysisRecord::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Transitions `queued -> processing`. Returns false if the record was
/// not in `queued` (already claimed by an earlier delivery, or terminal).
pub fn mark_processing(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analyses SET status = 'processing', version = version + 1, updated_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    })
}

/// Transitions `processing -> analyzed`, writing the report and output
/// path. Version-checked: returns false when the record moved since it
/// was read, or is not in `processing`.
pub fn complete(
    db: &Database,
    id: &str,
    report: &AnalysisReport,
    output_path: &str,
    expected_version: i64,
) -> Result<bool, DatabaseError> {
    let report_json =
        serde_json::to_string(report).map_err(|e| DatabaseError::InvalidPayload {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analyses SET status = 'analyzed', report = ?2, output_path = ?3,
             version = version + 1, updated_at = ?4
             WHERE id = ?1 AND status = 'processing' AND version = ?5",
            params![
                id,
                report_json,
                output_path,
                Utc::now().to_rfc3339(),
                expected_version
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Transitions a non-terminal record to `failed` with error details.
/// Returns false if the record was already terminal.
pub fn mark_failed(db: &Database, id: &str, error: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analyses SET status = 'failed', error_details = ?2,
             version = version + 1, updated_at = ?3
             WHERE id = ?1 AND status IN ('queued', 'processing')",
            params![id, error, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    })
}

/// Counts records with the given status.
pub fn count_by_status(db: &Database, status: AnalysisStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM analyses WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
