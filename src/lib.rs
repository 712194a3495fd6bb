//! Storage engine that streams multipart file uploads to Azure Blob Storage.
//!
//! An upload pipeline hands each in-flight file to [`AzureBlobEngine`], which
//! asks a caller-supplied resolver where the file belongs (credential,
//! container, blob path), streams the bytes there, and reports back a
//! [`StoredBlob`]. A companion operation removes a previously stored blob.
//!
//! The engine owns no retry policy, no buffering of whole files, and no
//! persistent state beyond an optional in-memory client cache.

mod client;
mod credentials;
mod engine;
mod error;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use crate::{
    credentials::Credential,
    engine::{AzureBlobEngine, AzureBlobEngineBuilder, Destination},
    error::EngineError,
};

/// Success value of [`StorageEngine::remove_file`].
///
/// A bare literal rather than a structured result; the upload path returns
/// [`StoredBlob`]. The asymmetry is inherited from the upstream storage-engine
/// contract and kept for compatibility.
pub const REMOVE_OK: &str = "ok";

/// Single-pass stream of an uploaded file's bytes.
///
/// Consumed exactly once per operation and never rewound.
pub type ByteStream = BoxStream<'static, anyhow::Result<Bytes>>;

/// Metadata of an uploaded file, as reported by the upload middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// Name of the form field the file arrived under.
    pub field_name: String,
    /// Filename on the uploader's machine.
    pub original_name: String,
    /// Value of the file part's `Content-Type` header.
    pub content_type: String,
    /// Size in bytes as declared by the middleware.
    pub size: u64,
}

/// An in-flight uploaded file: its metadata plus the byte stream.
pub struct UploadedFile {
    pub info: FileInfo,
    pub stream: ByteStream,
}

/// Result of a successful upload.
///
/// Carries the addressable destination fields plus what was observed on the
/// wire. Credential material never appears here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBlob {
    /// Container the blob was written to.
    pub container_name: String,
    /// Path of the blob within the container.
    pub blob_path: String,
    /// Bytes actually streamed to the blob.
    pub size: u64,
    /// Content type recorded on the blob.
    pub content_type: String,
}

/// Contract between the upload middleware and a storage engine.
///
/// `R` is the middleware's request-context type; the engine never inspects
/// it, only forwards it to the destination resolver. Both operations settle
/// exactly once, with either an error or a result.
#[async_trait]
pub trait StorageEngine<R>: Send + Sync {
    /// Stream an incoming file to its resolved destination.
    async fn handle_file(&self, req: &R, file: UploadedFile) -> Result<StoredBlob, EngineError>;

    /// Remove a previously stored file, resolving its destination the same
    /// way the upload did. Resolves to [`REMOVE_OK`] on success.
    async fn remove_file(&self, req: &R, file: &FileInfo) -> Result<&'static str, EngineError>;
}
