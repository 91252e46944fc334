//! Infrastructure shared by the pipeline stages: logging setup and
//! crash-safe file writes.

pub mod fs;
pub mod logging;

pub use fs::WriterLock;
pub use logging::{init_logging, LogConfig, LogFormat};
