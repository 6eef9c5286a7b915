use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApkscopeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid environment override '{name}': {reason}")]
    InvalidEnv { name: String, reason: String },
}

/// Structural validation verdicts for an uploaded package.
///
/// The variant names map one-to-one onto the wire-level reason codes
/// returned to clients (`FILE_NOT_FOUND`, `INVALID_ZIP_STRUCTURE`,
/// `MISSING_MANIFEST`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("FILE_NOT_FOUND")]
    FileNotFound,

    #[error("INVALID_ZIP_STRUCTURE")]
    InvalidZipStructure,

    #[error("MISSING_MANIFEST")]
    MissingManifest,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("No such job: {0}")]
    UnknownJob(String),
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Failed to read package '{path}': {source}")]
    ReadPackage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open archive: {0}")]
    OpenArchive(String),

    #[error("Failed to extract archive: {0}")]
    Extract(String),

    #[error("Manifest not found in extracted package")]
    ManifestMissing,

    #[error("Failed to parse AndroidManifest.xml: {0}")]
    ManifestParse(String),

    #[error("Failed to inventory resources: {0}")]
    ResourceScan(String),
}

/// Errors surfaced by the upload orchestrator. The API layer maps these
/// onto HTTP status codes and wire error codes.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file was uploaded")]
    NoFile,

    #[error("Validation failed: {0}")]
    Validation(ValidationFailure),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ApkscopeError>;
