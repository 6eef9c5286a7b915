pub mod analysis;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod hasher;
pub mod queue;
pub mod storage;
pub mod upload;
pub mod validator;
pub mod worker;

pub use analysis::{AnalysisReport, ApkAnalyzer};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{
    AnalysisError, ApkscopeError, ConfigError, QueueError, Result, StorageError, UploadError,
    ValidationFailure,
};
pub use queue::{JobQueue, QueueEvent};
pub use storage::UploadStore;
pub use upload::{UploadOrchestrator, UploadReceipt};
pub use validator::StructuralValidator;
pub use worker::WorkerPool;
