//! Sitemap hierarchy service.
//!
//! This crate drives the pipeline from upstream link events to crawlable
//! files:
//! - Event ingestion into the metadata store
//! - Time-triggered sweeps that batch pending records per partition
//! - Leaf file assembly, index linking and robots.txt promotion
//! - The HTTP read path crawlers fetch from

pub mod assembler;
pub mod bootstrap;
pub mod compression;
pub mod entries;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod linker;
pub mod lock;
pub mod metrics;
pub mod notify;
pub mod payload;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use assembler::{AssembleOutcome, FileAssembler};
pub use error::{ApiError, AssembleError};
pub use ingest::Ingestor;
pub use linker::IndexLinker;
pub use lock::{LockError, LockManager};
pub use routes::create_router;
pub use scheduler::{Scheduler, Sweep, SweepStats};
pub use state::AppState;
