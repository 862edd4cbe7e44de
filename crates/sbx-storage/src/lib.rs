//! sbx-storage: the blob-store façade the pipeline talks to.
//!
//! A [`BlobBackend`] is an opaque keyed byte store; the bundled
//! [`OperatorBackend`] adapts an OpenDAL `Operator`, so the same client
//! runs against a local directory, an in-memory map, or any S3-compatible
//! endpoint. [`StoreClient`] batches operations through an embedded
//! working queue and reports them on a single tagged outcome stream.

pub mod auth;
pub mod backend;
pub mod client;

pub use auth::{StaticTokenIssuer, TokenIssuer, UserInfo};
pub use backend::{BlobBackend, OperatorBackend, RequestCtx};
pub use client::{ClientOptions, OpOutcome, OpResult, StoreClient};

// progress counter handle used throughout the client API
pub use sbx_queue::AtomicCounter;
