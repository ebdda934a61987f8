//! services/api/src/adapters/storage.rs
//!
//! This module contains the S3 adapter, the concrete implementation of the
//! `ObjectStorageService` port. Objects are addressed by stable keys; read
//! access goes through presigned GET URLs with a bounded lifetime, derived
//! fresh on every call and never persisted.

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use moa_core::ports::{ObjectStorageService, PortError, PortResult};
use std::time::Duration;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `ObjectStorageService` port against S3.
#[derive(Clone)]
pub struct S3StorageAdapter {
    client: aws_sdk_s3::Client,
    bucket: String,
    presign_ttl: Duration,
}

impl S3StorageAdapter {
    /// Creates a new `S3StorageAdapter`.
    pub fn new(client: aws_sdk_s3::Client, bucket: String, presign_ttl: Duration) -> Self {
        Self {
            client,
            bucket,
            presign_ttl,
        }
    }
}

//=========================================================================================
// `ObjectStorageService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ObjectStorageService for S3StorageAdapter {
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> PortResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| PortError::Unavailable(format!("object upload failed: {e}")))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> PortResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| PortError::Unavailable(format!("object deletion failed: {e}")))?;
        Ok(())
    }

    async fn signed_read_url(&self, key: &str) -> PortResult<String> {
        let config = PresigningConfig::expires_in(self.presign_ttl)
            .map_err(|e| PortError::Unexpected(format!("invalid presign ttl: {e}")))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| PortError::Unavailable(format!("presigning failed: {e}")))?;
        Ok(presigned.uri().to_string())
    }
}
