//! Object storage for media referenced by item text
//!
//! Downloads are streamed chunk by chunk from the HTTP response into the store, so
//! memory use is bounded by one chunk per in-flight download.

mod fs;

pub use fs::FsObjectStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from object storage
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("object {key}: expected {expected} bytes, received {actual}")]
    SizeMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },
}

/// A body that can be read chunk by chunk
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk, or `None` at the end of the body
    async fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>>;
}

#[async_trait]
impl ChunkSource for reqwest::Response {
    async fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        self.chunk()
            .await
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

/// Where media ends up
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes the whole stream under `key`, returning the number of bytes stored
    ///
    /// When `size` is known a short or long body is an error and nothing is kept.
    async fn save_stream(
        &self,
        key: &str,
        body: &mut dyn ChunkSource,
        size: Option<u64>,
    ) -> Result<u64, ObjectError>;

    /// Public prefix stored objects are served under
    fn assets_domain(&self) -> &str;

    /// Public URL of a stored object
    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.assets_domain().trim_end_matches('/'), key)
    }
}
