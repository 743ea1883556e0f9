//! S3 upload sink
//!
//! Uploads staged files with the AWS SDK. Small objects go up in a single
//! `put_object`; anything above the multipart threshold is streamed from the
//! staging file in fixed-size parts. S3-compatible endpoints (MinIO, Wasabi,
//! LocalStack) are supported through a custom endpoint URL.

use crate::config::StorageConfig;
use crate::error::{Result, TransferError};
use crate::storage::{validate_key, PutReceipt, StagedObject, UploadSink};
use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

/// Part size for multipart upload: 8 MB.
pub const MULTIPART_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Error codes meaning our credentials or the service itself are the problem,
/// not the object.
const UNAVAILABLE_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
    "NoSuchBucket",
    "InternalError",
    "ServiceUnavailable",
    "SlowDown",
    "RequestTimeout",
];

/// Upper bound on a single abort request
const ABORT_TIMEOUT: Duration = Duration::from_secs(5);

type AbortFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Abort requests spawned after their upload was cancelled
#[derive(Debug, Clone, Default)]
struct PendingAborts(Arc<Mutex<JoinSet<()>>>);

impl PendingAborts {
    fn spawn(&self, abort: AbortFuture) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to abort cancelled multipart upload");
            return;
        };
        match self.0.lock() {
            Ok(mut set) => {
                set.spawn_on(abort, &handle);
            }
            Err(_) => warn!("Pending abort set poisoned, multipart upload left open"),
        }
    }

    fn len(&self) -> usize {
        self.0.lock().map(|set| set.len()).unwrap_or(0)
    }

    async fn drain(&self, limit: Duration) {
        let mut set = match self.0.lock() {
            Ok(mut set) => std::mem::take(&mut *set),
            Err(_) => return,
        };
        if set.is_empty() {
            return;
        }

        let outstanding = set.len();
        let joined = tokio::time::timeout(limit, async {
            while set.join_next().await.is_some() {}
        })
        .await;
        if joined.is_err() {
            warn!(outstanding, "Gave up waiting for multipart aborts");
        }
    }
}

/// Aborts a multipart upload unless disarmed first
///
/// Dropping the guard (for example when the caller's timeout cancels the
/// upload between parts) hands the abort to [`PendingAborts`].
struct AbortGuard {
    abort: Option<AbortFuture>,
    pending: PendingAborts,
}

impl AbortGuard {
    fn new(abort: AbortFuture, pending: PendingAborts) -> Self {
        Self {
            abort: Some(abort),
            pending,
        }
    }

    /// Upload completed, nothing to abort
    fn disarm(mut self) {
        self.abort = None;
    }

    /// Abort inline
    async fn abort_now(mut self) {
        if let Some(abort) = self.abort.take() {
            abort.await;
        }
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            self.pending.spawn(abort);
        }
    }
}

/// Load the shared AWS configuration
///
/// SDK retries are disabled: a failed upload is reported, and the next
/// scheduled invocation picks the file up again.
pub async fn load_sdk_config(region: Option<&str>) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .retry_config(aws_config::retry::RetryConfig::disabled());

    if let Some(region) = region {
        loader = loader.region(aws_config::Region::new(region.to_string()));
    }

    loader.load().await
}

/// S3 implementation of [`UploadSink`]
#[derive(Debug, Clone)]
pub struct S3Sink {
    client: aws_sdk_s3::Client,
    bucket: String,
    multipart_threshold: u64,
    pending: PendingAborts,
}

impl S3Sink {
    /// Create a sink for the configured bucket
    pub fn new(sdk_config: &aws_config::SdkConfig, storage: &StorageConfig) -> Self {
        let mut s3_config = aws_sdk_s3::config::Builder::from(sdk_config);

        // Custom endpoints are S3-compatible services that expect path-style addressing
        if let Some(ref endpoint) = storage.endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config.build()),
            bucket: storage.bucket.clone(),
            multipart_threshold: storage.multipart_threshold,
            pending: PendingAborts::default(),
        }
    }

    /// Wait up to `limit` for aborts of cancelled multipart uploads
    pub async fn drain_aborts(&self, limit: Duration) {
        self.pending.drain(limit).await;
    }

    /// Destination bucket
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Single-part upload streamed from the staging file.
    async fn put_simple(&self, key: &str, path: &Path) -> Result<Option<String>> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| staging_error(path, e))?;

        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error(key, "put_object", e))?;

        Ok(output.e_tag().map(str::to_string))
    }

    /// Multipart upload for large files.
    async fn put_multipart(&self, key: &str, path: &Path, size: u64) -> Result<Option<String>> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(key, "create_multipart_upload", e))?;

        let upload_id = create
            .upload_id()
            .ok_or_else(|| TransferError::SinkUnavailable {
                key: key.to_string(),
                message: "create_multipart_upload returned no upload id".to_string(),
            })?
            .to_string();

        // Incomplete uploads keep billing storage until aborted
        let guard = AbortGuard::new(self.abort_request(key, &upload_id), self.pending.clone());
        match self.upload_parts(key, path, size, &upload_id).await {
            Ok(etag) => {
                guard.disarm();
                Ok(etag)
            }
            Err(e) => {
                guard.abort_now().await;
                Err(e)
            }
        }
    }

    fn abort_request(&self, key: &str, upload_id: &str) -> AbortFuture {
        let request = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id);
        let key = key.to_string();

        Box::pin(async move {
            match tokio::time::timeout(ABORT_TIMEOUT, request.send()).await {
                Ok(Ok(_)) => debug!(key = %key, "Aborted multipart upload"),
                Ok(Err(e)) => {
                    warn!(key = %key, error = %DisplayErrorContext(&e), "Failed to abort multipart upload")
                }
                Err(_) => warn!(key = %key, "Timed out aborting multipart upload"),
            }
        })
    }

    async fn upload_parts(
        &self,
        key: &str,
        path: &Path,
        size: u64,
        upload_id: &str,
    ) -> Result<Option<String>> {
        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1i32;

        while offset < size {
            let length = MULTIPART_PART_SIZE.min(size - offset);
            let chunk = ByteStream::read_from()
                .path(path)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .map_err(|e| staging_error(path, e))?;

            let upload_part = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(chunk)
                .send()
                .await
                .map_err(|e| sdk_error(key, "upload_part", e))?;

            debug!(key, part_number, length, "Uploaded part");
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(upload_part.e_tag().map(str::to_string))
                    .build(),
            );

            offset += length;
            part_number += 1;
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| sdk_error(key, "complete_multipart_upload", e))?;

        Ok(output.e_tag().map(str::to_string))
    }
}

#[async_trait]
impl UploadSink for S3Sink {
    #[instrument(skip(self, body), fields(bucket = %self.bucket, bytes = body.len()))]
    async fn put(&self, key: &str, body: StagedObject) -> Result<PutReceipt> {
        validate_key(key)?;

        let size = body.len();
        let etag = if size > self.multipart_threshold {
            self.put_multipart(key, body.path(), size).await?
        } else {
            self.put_simple(key, body.path()).await?
        };

        Ok(PutReceipt {
            key: key.to_string(),
            bytes: size,
            etag,
        })
    }
}

/// Classify an SDK failure by its service error code
fn sdk_error<E, R>(key: &str, operation: &str, err: SdkError<E, R>) -> TransferError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = format!("S3 {} failed: {}", operation, DisplayErrorContext(&err));
    let rejected = match &err {
        SdkError::ServiceError(service) => service
            .err()
            .code()
            .map_or(true, |code| !UNAVAILABLE_CODES.contains(&code)),
        _ => false,
    };

    classify(key, message, rejected)
}

fn classify(key: &str, message: String, rejected: bool) -> TransferError {
    let key = key.to_string();
    if rejected {
        TransferError::SinkRejected { key, message }
    } else {
        TransferError::SinkUnavailable { key, message }
    }
}

fn staging_error(path: &Path, err: impl std::error::Error + Send + Sync + 'static) -> TransferError {
    TransferError::staging(path, std::io::Error::new(std::io::ErrorKind::Other, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sink(endpoint: Option<&str>, threshold: u64) -> S3Sink {
        let sdk_config = aws_config::SdkConfig::builder()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .build();
        let mut storage = StorageConfig::new("landing");
        storage.endpoint_url = endpoint.map(str::to_string);
        storage.multipart_threshold = threshold;
        S3Sink::new(&sdk_config, &storage)
    }

    #[test]
    fn test_sink_construction() {
        let sink = sink(Some("http://localhost:9000"), 1024);
        assert_eq!(sink.bucket(), "landing");
        assert_eq!(sink.multipart_threshold, 1024);
    }

    #[test]
    fn test_classify() {
        let err = classify("data/c.csv", "quota".into(), true);
        assert_eq!(err.kind(), ErrorKind::SinkRejected);
        let err = classify("data/c.csv", "dns".into(), false);
        assert_eq!(err.kind(), ErrorKind::SinkUnavailable);
    }

    #[tokio::test]
    async fn test_oversized_key_rejected_locally() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedObject::from_bytes(dir.path(), b"x").unwrap();
        let key = "k".repeat(2048);

        let err = sink(None, 1024).put(&key, staged).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SinkRejected);
    }

    fn signalling_abort() -> (AbortFuture, tokio::sync::oneshot::Receiver<()>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let abort: AbortFuture = Box::pin(async move {
            let _ = tx.send(());
        });
        (abort, rx)
    }

    #[tokio::test]
    async fn test_cancelled_upload_is_aborted() {
        let pending = PendingAborts::default();
        let (abort, aborted) = signalling_abort();
        let guard = AbortGuard::new(abort, pending.clone());

        // Upload stuck between parts when the caller's timeout fires
        let upload = async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        };
        assert!(tokio::time::timeout(Duration::from_millis(20), upload).await.is_err());
        assert_eq!(pending.len(), 1);

        pending.drain(Duration::from_secs(1)).await;
        assert!(aborted.await.is_ok());
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_completed_upload_is_not_aborted() {
        let pending = PendingAborts::default();
        let (abort, aborted) = signalling_abort();

        AbortGuard::new(abort, pending.clone()).disarm();

        assert_eq!(pending.len(), 0);
        assert!(aborted.await.is_err());
    }

    #[tokio::test]
    async fn test_failed_upload_aborts_inline() {
        let pending = PendingAborts::default();
        let (abort, mut aborted) = signalling_abort();

        AbortGuard::new(abort, pending.clone()).abort_now().await;

        assert!(aborted.try_recv().is_ok());
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_drain_without_pending_aborts_returns() {
        sink(None, 1024).drain_aborts(Duration::ZERO).await;
    }

    #[tokio::test]
    #[ignore = "requires an S3-compatible endpoint at localhost:9000"]
    async fn test_put_to_local_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedObject::from_bytes(dir.path(), b"hello").unwrap();

        let receipt = sink(Some("http://localhost:9000"), 1024)
            .put("misc/a.txt", staged)
            .await
            .unwrap();
        assert_eq!(receipt.bytes, 5);
    }
}
