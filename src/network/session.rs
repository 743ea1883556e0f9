//! Remote session abstraction
//!
//! The pipeline talks to the file server only through [`SessionConnector`]
//! and [`RemoteSession`]. Both are blocking; callers run them on the
//! blocking thread pool.

use crate::config::{ConnectionConfig, Timeouts};
use crate::error::Result;
use crate::secret::Credential;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Type of a listed remote entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Socket, device or unknown
    Other,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Snapshot of one entry from a remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFileEntry {
    /// File name (last path component)
    pub name: String,
    /// Full remote path
    pub path: PathBuf,
    /// Size in bytes as reported by the server
    pub size: u64,
    /// Modification time, if reported
    pub modified: Option<DateTime<Utc>>,
    /// Entry type
    pub kind: EntryKind,
}

impl RemoteFileEntry {
    /// Regular file entry named `name` inside `directory`
    pub fn file(directory: impl AsRef<Path>, name: impl Into<String>, size: u64) -> Self {
        let name = name.into();
        Self {
            path: directory.as_ref().join(&name),
            name,
            size,
            modified: None,
            kind: EntryKind::File,
        }
    }
}

/// Byte stream over one remote file
pub type RemoteReader = Box<dyn Read + Send>;

/// An authenticated session with the remote file server
///
/// Each call to [`open_read`](RemoteSession::open_read) yields an
/// independent stream, so workers never share one.
pub trait RemoteSession: Send + Sync {
    /// List a directory
    fn list(&self, directory: &Path) -> Result<Vec<RemoteFileEntry>>;

    /// Open a remote file for reading
    fn open_read(&self, path: &Path) -> Result<RemoteReader>;

    /// Release the connection. Safe to call more than once.
    fn close(&self) -> Result<()>;
}

/// Opens sessions from connection parameters and a credential
pub trait SessionConnector: Send + Sync {
    /// Connect and authenticate. The credential is consumed and wiped on drop.
    fn open(
        &self,
        config: &ConnectionConfig,
        credential: Credential,
        timeouts: &Timeouts,
    ) -> Result<Box<dyn RemoteSession>>;
}
