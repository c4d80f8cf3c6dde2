//! Persistence for the compiled artifact.
//!
//! A run deletes whatever the previous run left behind, then writes exactly one
//! artifact. There is no versioning.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod local;
pub mod s3;

pub use local::LocalArtifactStore;
pub use s3::S3ArtifactStore;

/// Name of the single artifact a run produces.
pub const COMPILED_ARTIFACT: &str = "compiled.log";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),
}

/// Where an artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    /// Filesystem path or `s3://bucket/key` URI.
    pub location: String,
    pub size_bytes: usize,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write_artifact(&self, name: &str, bytes: Bytes) -> Result<ArtifactHandle, StorageError>;

    /// Removes the previous artifact and any intermediate per-unit files.
    async fn delete_artifact(&self) -> Result<(), StorageError>;
}
