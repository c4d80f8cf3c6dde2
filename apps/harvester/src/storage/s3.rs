use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::{debug, info};

use crate::storage::{ArtifactHandle, ArtifactStore, StorageError};

/// Stores the artifact in a bucket under a fixed key prefix.
#[derive(Clone)]
pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3ArtifactStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn key(&self, name: &str) -> String {
        object_key(&self.prefix, name)
    }

    fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }
}

fn object_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn write_artifact(&self, name: &str, bytes: Bytes) -> Result<ArtifactHandle, StorageError> {
        let key = self.key(name);
        let size_bytes = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type("text/plain")
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("upload failed: {}", DisplayErrorContext(e))))?;

        info!("Uploaded {} bytes to s3://{}/{}", size_bytes, self.bucket, key);
        Ok(ArtifactHandle {
            location: format!("s3://{}/{}", self.bucket, key),
            size_bytes,
        })
    }

    async fn delete_artifact(&self) -> Result<(), StorageError> {
        let prefix = self.list_prefix();
        let mut continuation: Option<String> = None;
        let mut removed = 0usize;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::S3(format!("list failed: {}", DisplayErrorContext(e))))?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| {
                        StorageError::S3(format!("delete of {key} failed: {}", DisplayErrorContext(e)))
                    })?;
                debug!("Deleted s3://{}/{}", self.bucket, key);
                removed += 1;
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        info!("Removed {} objects under s3://{}/{}", removed, self.bucket, prefix);
        Ok(())
    }
}
