pub mod events;
pub mod types;

// Re-export primary types for convenience.
pub use events::UploadEvent;
pub use types::{
    AttachmentDescriptor, Endpoint, FileRecord, StoredChunk, UploadProgress, UploadStatus,
};
