//! Chunked upload scheduler.
//!
//! An [`Uploader`] splits a source into chunks and uploads them to a pool of
//! interchangeable endpoints with bounded concurrency, round-robin endpoint
//! reuse, per-chunk retries and graceful cancellation. Each session is
//! driven by a single coordinator task; running sessions are tracked in a
//! [`SessionRegistry`].

pub mod config;
pub mod error;
pub mod registry;
mod scheduler;
mod session;
pub mod store;
pub mod types;
mod uploader;

pub use config::SchedulerConfig;
pub use error::UploadError;
pub use registry::SessionRegistry;
pub use store::{HttpMetadataStore, JsonFileStore, MetadataStore, StoreFuture, url_expiry_ms};
pub use types::{UploadOutcome, UploadRequest};
pub use uploader::{UploadHandle, Uploader};
