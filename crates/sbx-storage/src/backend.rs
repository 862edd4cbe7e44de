//! Opaque blob backend interface and its OpenDAL implementation.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use opendal::{ErrorKind, Operator};

use sbx_core::{SbxError, SbxResult};

/// Per-request context: the bucket the keys live under and the opaque
/// bearer token the caller attached. The core never interprets the token;
/// it only carries it.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    pub bucket: String,
    pub token: Option<String>,
}

impl RequestCtx {
    pub fn new(bucket: impl Into<String>, token: Option<String>) -> Self {
        Self {
            bucket: bucket.into(),
            token,
        }
    }
}

/// An opaque keyed byte store.
///
/// Semantics the pipeline depends on:
/// - `put` is at-most-once: an occupied key fails with `AlreadyExists`;
/// - `get` yields `NotFound` for absent keys;
/// - `remove` is idempotent: removing an absent key succeeds.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    async fn put(
        &self,
        ctx: &RequestCtx,
        key: &str,
        data: Vec<u8>,
        meta: Option<HashMap<String, String>>,
    ) -> SbxResult<()>;

    async fn get(&self, ctx: &RequestCtx, key: &str) -> SbxResult<Vec<u8>>;

    async fn remove(&self, ctx: &RequestCtx, key: &str) -> SbxResult<()>;
}

/// Map an OpenDAL failure onto the behavioural taxonomy.
fn classify(key: &str, err: opendal::Error) -> SbxError {
    match err.kind() {
        ErrorKind::NotFound => SbxError::NotFound(key.to_string()),
        ErrorKind::AlreadyExists | ErrorKind::ConditionNotMatch => {
            SbxError::AlreadyExists(key.to_string())
        }
        _ if err.is_temporary() => SbxError::Transient(format!("{key}: {err}")),
        _ => SbxError::Permanent(format!("{key}: {err}")),
    }
}

/// OpenDAL-backed blob store.
pub struct OperatorBackend {
    op: Operator,
}

impl OperatorBackend {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// In-memory store, used by tests and throwaway runs.
    pub fn memory() -> SbxResult<Self> {
        let op = Operator::new(opendal::services::Memory::default())
            .map_err(|e| SbxError::Permanent(format!("memory operator: {e}")))?
            .finish();
        Ok(Self::new(op))
    }

    /// Local-filesystem store rooted at `root`.
    pub fn local_fs(root: &Path) -> SbxResult<Self> {
        let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
        let op = Operator::new(builder)
            .map_err(|e| SbxError::Permanent(format!("fs operator: {e}")))?
            .layer(opendal::layers::LoggingLayer::default())
            .finish();
        Ok(Self::new(op))
    }

    /// S3-compatible remote store. Path-style addressing is the OpenDAL
    /// default, which is what MinIO and SeaweedFS expect.
    pub fn s3(
        endpoint: &str,
        region: &str,
        bucket: &str,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> SbxResult<Self> {
        let builder = opendal::services::S3::default()
            .endpoint(endpoint)
            .region(region)
            .bucket(bucket)
            .access_key_id(access_key_id)
            .secret_access_key(secret_access_key);
        let op = Operator::new(builder)
            .map_err(|e| SbxError::Permanent(format!("s3 operator: {e}")))?
            .layer(opendal::layers::LoggingLayer::default())
            .finish();
        Ok(Self::new(op))
    }

    fn path(ctx: &RequestCtx, key: &str) -> String {
        format!("{}/{}", ctx.bucket, key)
    }
}

#[async_trait]
impl BlobBackend for OperatorBackend {
    async fn put(
        &self,
        ctx: &RequestCtx,
        key: &str,
        data: Vec<u8>,
        _meta: Option<HashMap<String, String>>,
    ) -> SbxResult<()> {
        let path = Self::path(ctx, key);
        // object stores are not universally at-most-once; probe first
        match self.op.exists(&path).await {
            Ok(true) => return Err(SbxError::AlreadyExists(key.to_string())),
            Ok(false) => {}
            Err(e) => return Err(classify(key, e)),
        }
        self.op
            .write(&path, data)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(())
    }

    async fn get(&self, ctx: &RequestCtx, key: &str) -> SbxResult<Vec<u8>> {
        let path = Self::path(ctx, key);
        self.op
            .read(&path)
            .await
            .map(|buf| buf.to_vec())
            .map_err(|e| classify(key, e))
    }

    async fn remove(&self, ctx: &RequestCtx, key: &str) -> SbxResult<()> {
        let path = Self::path(ctx, key);
        match self.op.delete(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(classify(key, e)),
        }
    }
}
