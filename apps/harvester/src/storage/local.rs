use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use crate::storage::{ArtifactHandle, ArtifactStore, StorageError, COMPILED_ARTIFACT};

/// Stores the artifact under an injected working directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    work_dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }
}

/// Per-unit files (`output-<n>.log`) written by older runs.
fn is_intermediate(name: &str) -> bool {
    name.strip_prefix("output-")
        .and_then(|rest| rest.strip_suffix(".log"))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

async fn remove_if_present(path: PathBuf) -> Result<(), StorageError> {
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn write_artifact(&self, name: &str, bytes: Bytes) -> Result<ArtifactHandle, StorageError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let path = self.work_dir.join(name);
        tokio::fs::write(&path, &bytes).await?;

        info!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(ArtifactHandle {
            location: path.display().to_string(),
            size_bytes: bytes.len(),
        })
    }

    async fn delete_artifact(&self) -> Result<(), StorageError> {
        remove_if_present(self.work_dir.join(COMPILED_ARTIFACT)).await?;

        let mut entries = match tokio::fs::read_dir(&self.work_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_str().is_some_and(is_intermediate) {
                remove_if_present(entry.path()).await?;
            }
        }
        Ok(())
    }
}
