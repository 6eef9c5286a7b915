//! Background processing of queued analyses.

pub mod pool;

pub use pool::WorkerPool;
