//! Upload sink seam and staged objects

use crate::error::{IoResultExt, Result, TransferError};
use async_trait::async_trait;
use std::io::Read;
use std::path::Path;
use tempfile::NamedTempFile;

#[cfg(test)]
use mockall::automock;

/// Longest key accepted by S3-compatible stores
pub const MAX_KEY_BYTES: usize = 1024;

/// Transformed content waiting for upload
///
/// Backed by a temp file that is removed when the object is dropped.
#[derive(Debug)]
pub struct StagedObject {
    file: NamedTempFile,
    len: u64,
}

impl StagedObject {
    /// Wrap a fully written staging file
    pub fn new(file: NamedTempFile, len: u64) -> Self {
        Self { file, len }
    }

    /// Stage in-memory bytes (tests and small payloads)
    pub fn from_bytes(dir: &Path, data: &[u8]) -> Result<Self> {
        use std::io::Write;
        let mut file = NamedTempFile::new_in(dir).with_path(dir)?;
        file.write_all(data).with_path(dir)?;
        file.flush().with_path(dir)?;
        Ok(Self::new(file, data.len() as u64))
    }

    /// Location of the staged content
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Size in bytes, used as the upload size hint
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the staged content is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the staged content into memory
    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.len as usize);
        std::fs::File::open(self.path())
            .and_then(|mut f| f.read_to_end(&mut data))
            .with_path(self.path())?;
        Ok(data)
    }
}

/// Confirmation of a committed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    /// Destination key
    pub key: String,
    /// Bytes stored
    pub bytes: u64,
    /// Entity tag reported by the store
    pub etag: Option<String>,
}

/// Durable object sink
///
/// A put either commits the whole object under `key` or fails; writing an
/// existing key overwrites it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Store `body` under `key`
    async fn put(&self, key: &str, body: StagedObject) -> Result<PutReceipt>;
}

/// Reject keys the store would refuse
pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(TransferError::SinkRejected {
            key: key.to_string(),
            message: "destination key is empty".to_string(),
        });
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(TransferError::SinkRejected {
            key: key.chars().take(64).collect(),
            message: format!("key is {} bytes, limit is {}", key.len(), MAX_KEY_BYTES),
        });
    }
    Ok(())
}
