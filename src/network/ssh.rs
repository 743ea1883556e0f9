//! SSH/SFTP session
//!
//! Connects with an in-memory private key, verifies the server's host key
//! against a known_hosts file according to the configured policy, and
//! exposes listing and streaming reads over one SFTP channel.

use crate::config::{ConnectionConfig, HostKeyPolicy, Timeouts};
use crate::error::{Result, TransferError};
use crate::network::{EntryKind, RemoteFileEntry, RemoteReader, RemoteSession, SessionConnector};
use crate::secret::Credential;
use chrono::{TimeZone, Utc};
use ssh2::{
    CheckResult, ErrorCode, FileStat, HashType, KnownHostFileKind, KnownHosts, Session, Sftp,
};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

// libssh2 session error codes
const LIBSSH2_ERROR_BANNER_RECV: i32 = -2;
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_FILE: i32 = -16;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

// SFTP status codes
const SSH_FX_NO_SUCH_FILE: i32 = 2;
const SSH_FX_PERMISSION_DENIED: i32 = 3;
const SSH_FX_NO_SUCH_PATH: i32 = 10;

/// Opens [`SftpSession`]s over ssh2
#[derive(Debug, Default, Clone, Copy)]
pub struct SftpConnector;

impl SessionConnector for SftpConnector {
    fn open(
        &self,
        config: &ConnectionConfig,
        credential: Credential,
        timeouts: &Timeouts,
    ) -> Result<Box<dyn RemoteSession>> {
        Ok(Box::new(SftpSession::connect(config, credential, timeouts)?))
    }
}

/// Authenticated SFTP session
pub struct SftpSession {
    session: Session,
    sftp: Mutex<Option<Sftp>>,
    host: String,
    io_timeout: Duration,
    closed: AtomicBool,
}

impl SftpSession {
    /// Connect, verify the host key, authenticate and open the SFTP channel
    pub fn connect(
        config: &ConnectionConfig,
        credential: Credential,
        timeouts: &Timeouts,
    ) -> Result<Self> {
        let tcp = connect_tcp(config, timeouts.connect)?;

        let mut session = Session::new()
            .map_err(|e| TransferError::protocol(&config.host, e.message().to_string()))?;
        session.set_timeout(millis(timeouts.connect));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| handshake_error(&config.host, &e))?;

        verify_host_key(&session, config)?;
        authenticate(&session, config, &credential)?;
        drop(credential);

        session.set_timeout(millis(timeouts.io));
        let sftp = session
            .sftp()
            .map_err(|e| handshake_error(&config.host, &e))?;

        info!("Connected to {}@{}", config.username, config.address());

        Ok(Self {
            session,
            sftp: Mutex::new(Some(sftp)),
            host: config.host.clone(),
            io_timeout: timeouts.io,
            closed: AtomicBool::new(false),
        })
    }

    fn with_sftp<T>(&self, f: impl FnOnce(&Sftp) -> Result<T>) -> Result<T> {
        let guard = self
            .sftp
            .lock()
            .map_err(|_| TransferError::protocol(&self.host, "SFTP channel lock poisoned"))?;
        match guard.as_ref() {
            Some(sftp) => f(sftp),
            None => Err(TransferError::protocol(&self.host, "session already closed")),
        }
    }
}

impl RemoteSession for SftpSession {
    fn list(&self, directory: &Path) -> Result<Vec<RemoteFileEntry>> {
        let entries = self.with_sftp(|sftp| {
            sftp.readdir(directory).map_err(|e| {
                let missing = TransferError::DirectoryNotFound;
                sftp_error(&self.host, "list", directory, &e, self.io_timeout, missing)
            })
        })?;

        let mut listing: Vec<RemoteFileEntry> = entries
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                if name == "." || name == ".." {
                    return None;
                }
                Some(to_entry(directory, name, &stat))
            })
            .collect();

        listing.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(directory = %directory.display(), entries = listing.len(), "Listed remote directory");
        Ok(listing)
    }

    fn open_read(&self, path: &Path) -> Result<RemoteReader> {
        let file = self.with_sftp(|sftp| {
            sftp.open(path).map_err(|e| {
                let missing = TransferError::FileNotFound;
                sftp_error(&self.host, "open", path, &e, self.io_timeout, missing)
            })
        })?;
        Ok(Box::new(file))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Ok(mut guard) = self.sftp.lock() {
            guard.take();
        }

        self.session
            .disconnect(None, "transfer complete", None)
            .map_err(|e| TransferError::protocol(&self.host, e.message().to_string()))?;
        debug!(host = %self.host, "SFTP session closed");
        Ok(())
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(host = %self.host, "Error closing SFTP session: {}", e);
        }
    }
}

fn millis(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u128) as u32
}

fn connect_tcp(config: &ConnectionConfig, timeout: Duration) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| TransferError::unreachable(&config.host, format!("DNS lookup failed: {}", e)))?
        .collect();

    let mut last_error = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, "TCP connect failed: {}", e);
                last_error = Some(e);
            }
        }
    }

    Err(TransferError::unreachable(
        &config.host,
        match last_error {
            Some(e) => format!("connect to {} failed: {}", config.address(), e),
            None => format!("{} resolved to no addresses", config.host),
        },
    ))
}

fn authenticate(session: &Session, config: &ConnectionConfig, credential: &Credential) -> Result<()> {
    session
        .userauth_pubkey_memory(
            &config.username,
            None,
            credential.private_key(),
            credential.passphrase(),
        )
        .map_err(|e| match e.code() {
            ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT)
            | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_SEND)
            | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_RECV)
            | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_DISCONNECT) => {
                TransferError::unreachable(&config.host, e.message().to_string())
            }
            ErrorCode::Session(LIBSSH2_ERROR_FILE) => TransferError::auth(
                &config.username,
                &config.host,
                "private key could not be decoded (wrong passphrase or unsupported format)",
            ),
            ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED)
            | ErrorCode::Session(LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED) => {
                TransferError::auth(&config.username, &config.host, "public key rejected")
            }
            _ => TransferError::auth(&config.username, &config.host, e.message().to_string()),
        })?;

    if !session.authenticated() {
        return Err(TransferError::auth(
            &config.username,
            &config.host,
            "Authentication failed",
        ));
    }

    Ok(())
}

fn handshake_error(host: &str, err: &ssh2::Error) -> TransferError {
    match err.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT)
        | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_SEND)
        | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_RECV)
        | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_DISCONNECT)
        | ErrorCode::Session(LIBSSH2_ERROR_BANNER_RECV) => {
            TransferError::unreachable(host, err.message().to_string())
        }
        _ => TransferError::protocol(host, err.message().to_string()),
    }
}

fn sftp_error(
    host: &str,
    step: &str,
    path: &Path,
    err: &ssh2::Error,
    io_timeout: Duration,
    missing: fn(PathBuf) -> TransferError,
) -> TransferError {
    match err.code() {
        ErrorCode::SFTP(SSH_FX_NO_SUCH_FILE) | ErrorCode::SFTP(SSH_FX_NO_SUCH_PATH) => {
            missing(path.to_path_buf())
        }
        ErrorCode::SFTP(SSH_FX_PERMISSION_DENIED) => TransferError::PermissionDenied(path.to_path_buf()),
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => {
            TransferError::timeout(format!("{} {}", step, path.display()), io_timeout)
        }
        _ => TransferError::protocol(
            host,
            format!("{} {} failed: {}", step, path.display(), err.message()),
        ),
    }
}

fn to_entry(directory: &Path, name: String, stat: &FileStat) -> RemoteFileEntry {
    let file_type = stat.file_type();
    let kind = if file_type.is_file() {
        EntryKind::File
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::Other
    };

    RemoteFileEntry {
        path: directory.join(&name),
        name,
        size: stat.size.unwrap_or(0),
        modified: stat
            .mtime
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single()),
        kind,
    }
}

/// Name under which a host is recorded in known_hosts
fn known_hosts_name(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

fn fingerprint(session: &Session) -> String {
    session
        .host_key_hash(HashType::Sha256)
        .map(|hash| {
            hash.iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":")
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn verify_host_key(session: &Session, config: &ConnectionConfig) -> Result<()> {
    let (key, key_type) = session
        .host_key()
        .ok_or_else(|| TransferError::protocol(&config.host, "server presented no host key"))?;
    let fingerprint = fingerprint(session);

    if config.host_key_policy == HostKeyPolicy::AcceptAny {
        warn!(
            host = %config.host,
            fingerprint = %fingerprint,
            "Host key verification disabled, accepting server key"
        );
        return Ok(());
    }

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| TransferError::protocol(&config.host, e.message().to_string()))?;
    load_known_hosts(&mut known_hosts, config)?;

    match known_hosts.check_port(&config.host, config.port, key) {
        CheckResult::Match => {
            debug!(host = %config.host, "Host key matches known_hosts");
            Ok(())
        }
        CheckResult::Mismatch => Err(TransferError::protocol(
            &config.host,
            format!("host key mismatch (SHA256 {}), refusing to connect", fingerprint),
        )),
        CheckResult::Failure => Err(TransferError::protocol(
            &config.host,
            "known_hosts lookup failed",
        )),
        CheckResult::NotFound => match config.host_key_policy {
            HostKeyPolicy::Strict => Err(TransferError::protocol(
                &config.host,
                format!("unknown host key (SHA256 {})", fingerprint),
            )),
            _ => {
                let name = known_hosts_name(&config.host, config.port);
                known_hosts
                    .add(&name, key, "added by sftp-relay", key_type.into())
                    .map_err(|e| TransferError::protocol(&config.host, e.message().to_string()))?;
                info!(host = %name, fingerprint = %fingerprint, "Accepted new host key");
                save_known_hosts(&known_hosts, config);
                Ok(())
            }
        },
    }
}

fn load_known_hosts(known_hosts: &mut KnownHosts, config: &ConnectionConfig) -> Result<()> {
    let Some(path) = config.known_hosts_file.as_deref() else {
        return Ok(());
    };
    if !path.exists() {
        debug!(path = %path.display(), "known_hosts file does not exist yet");
        return Ok(());
    }

    if let Err(e) = known_hosts.read_file(path, KnownHostFileKind::OpenSSH) {
        let message = format!("cannot read {}: {}", path.display(), e.message());
        if config.host_key_policy == HostKeyPolicy::Strict {
            return Err(TransferError::protocol(&config.host, message));
        }
        warn!("{}", message);
    }
    Ok(())
}

fn save_known_hosts(known_hosts: &KnownHosts, config: &ConnectionConfig) {
    let Some(path) = config.known_hosts_file.as_deref() else {
        return;
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), "Cannot create known_hosts directory: {}", e);
            return;
        }
    }
    if let Err(e) = known_hosts.write_file(path, KnownHostFileKind::OpenSSH) {
        warn!(path = %path.display(), "Cannot persist known_hosts: {}", e.message());
    }
}
