//! Transfer pipeline
//!
//! One invocation resolves the secret, opens a single SFTP session, takes a
//! listing snapshot and then runs classify, stage and upload for every entry,
//! with a semaphore bounding how many run at once. Each task opens its own
//! read stream. Outcomes are merged in listing order once all tasks have
//! finished.
//!
//! Session-level failures (secret, connect, listing) abort the invocation.
//! Per-file failures become a `Failed` outcome and processing continues.

use crate::config::PipelineConfig;
use crate::core::{
    FileStep, InvocationContext, PipelineState, StateMachine, TransferOutcome, TransferReport,
    DEADLINE_REACHED,
};
use crate::error::{Result, TransferError};
use crate::network::{RemoteFileEntry, RemoteSession, SessionConnector};
use crate::route::{Classifier, RouteAction, RoutingDecision};
use crate::secret::{Credential, SecretProvider, SecretResolver};
use crate::storage::{StagedObject, UploadSink};
use crate::transform::{Transform, TransformOutput, TransformRequest, Transformer, STREAM_BUFFER_SIZE};
use futures::future::join_all;
use std::collections::HashMap;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Time kept free before the deadline for draining, closing and reporting
const DRAIN_RESERVE: Duration = Duration::from_secs(5);

/// Staged content plus the transform that produced it
struct Staged {
    object: StagedObject,
    output: TransformOutput,
}

/// The SFTP to object storage pipeline
pub struct Pipeline<P, U> {
    config: PipelineConfig,
    resolver: SecretResolver<P>,
    connector: Arc<dyn SessionConnector>,
    sink: U,
    classifier: Classifier,
    transformer: Transformer,
}

impl<P: SecretProvider, U: UploadSink> Pipeline<P, U> {
    /// Assemble a pipeline; compiles the rule table once
    pub fn new(
        config: PipelineConfig,
        provider: P,
        connector: Arc<dyn SessionConnector>,
        sink: U,
    ) -> Result<Self> {
        let classifier = Classifier::new(&config.routing)?;
        for id in classifier.transform_ids() {
            if let Err(e) = id.parse::<Transform>() {
                warn!("Routing table references an unknown transform, matching files will fail: {}", e);
            }
        }

        Ok(Self {
            resolver: SecretResolver::new(provider, config.timeouts.secret),
            transformer: Transformer::new(config.max_buffered_transform_bytes),
            config,
            connector,
            sink,
            classifier,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Compiled rule table
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Run one invocation. Always returns a report; fatal failures are
    /// recorded in it rather than returned.
    pub async fn run(&self, ctx: InvocationContext) -> TransferReport {
        let span = info_span!("invocation", request_id = %ctx.request_id);
        async move {
            let started = Instant::now();
            let mut report = TransferReport::new(&ctx.request_id);
            let mut state = StateMachine::new();

            match self.execute(&ctx, &mut state, &mut report).await {
                Ok(()) => state.advance(PipelineState::Done),
                Err(e) => {
                    error!(kind = %e.kind(), "Invocation aborted: {}", e);
                    state.advance(PipelineState::FatalError(e.kind()));
                    report.set_fatal(&e);
                }
            }

            report.finish(started.elapsed());
            info!(
                uploaded = report.uploaded,
                skipped = report.skipped,
                failed = report.failed,
                status = ?report.status,
                "{}",
                report.summary()
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        ctx: &InvocationContext,
        state: &mut StateMachine,
        report: &mut TransferReport,
    ) -> Result<()> {
        state.advance(PipelineState::ResolvingSecret);
        let credential = self.resolver.resolve(&self.config.secret_id).await?;

        let session = self.open_session(credential).await?;
        state.advance(PipelineState::SessionOpen);

        let directory = ctx
            .remote_directory
            .clone()
            .unwrap_or_else(|| self.config.connection.remote_directory.clone());

        let processed = self
            .list_and_process(ctx, state, &session, &directory, report)
            .await;
        if processed.is_ok() {
            state.advance(PipelineState::Draining);
        }

        // Exactly once, whether or not the listing or any file failed
        close_session(session).await;
        processed
    }

    async fn open_session(&self, credential: Credential) -> Result<Arc<dyn RemoteSession>> {
        let connector = Arc::clone(&self.connector);
        let connection = self.config.connection.clone();
        let timeouts = self.config.timeouts;
        let host = connection.host.clone();

        let session = tokio::task::spawn_blocking(move || {
            connector.open(&connection, credential, &timeouts)
        })
        .await
        .map_err(|e| TransferError::protocol(host, format!("session task failed: {}", e)))??;

        Ok(Arc::from(session))
    }

    async fn list_and_process(
        &self,
        ctx: &InvocationContext,
        state: &mut StateMachine,
        session: &Arc<dyn RemoteSession>,
        directory: &Path,
        report: &mut TransferReport,
    ) -> Result<()> {
        let listing = {
            let session = Arc::clone(session);
            let directory = directory.to_path_buf();
            let host = self.config.connection.host.clone();
            tokio::task::spawn_blocking(move || session.list(&directory))
                .await
                .map_err(|e| TransferError::protocol(host, format!("listing task failed: {}", e)))??
        };

        info!(directory = %directory.display(), files = listing.len(), "Remote directory listed");
        state.advance(PipelineState::Processing);

        let semaphore = Semaphore::new(self.config.upload_concurrency.max(1));
        let tasks = listing.into_iter().map(|entry| {
            let session = Arc::clone(session);
            let semaphore = &semaphore;
            async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire().await.ok();
                self.process_entry(ctx, session, entry).await
            }
        });

        // join_all yields outcomes in listing order
        for outcome in join_all(tasks).await {
            report.record(outcome);
        }
        warn_duplicate_keys(&report.outcomes);

        Ok(())
    }

    async fn process_entry(
        &self,
        ctx: &InvocationContext,
        session: Arc<dyn RemoteSession>,
        entry: RemoteFileEntry,
    ) -> TransferOutcome {
        let file = entry.name.clone();

        if !ctx.admits(self.config.timeouts.deadline_margin) {
            debug!(file = %file, "Not admitted, deadline approaching");
            return TransferOutcome::Skipped {
                file,
                reason: DEADLINE_REACHED.to_string(),
            };
        }

        let decision = self.classifier.classify(&entry);
        if let RouteAction::Skip { reason } = &decision.action {
            debug!(file = %file, reason = %reason, "Skipped");
            return TransferOutcome::Skipped {
                file,
                reason: reason.clone(),
            };
        }

        let outcome = self.transfer(ctx, session, &entry, &decision).await;
        match &outcome {
            TransferOutcome::Uploaded { key, bytes, .. } => {
                info!(file = %file, key = %key, bytes, "Uploaded");
            }
            TransferOutcome::Failed { step, kind, message, .. } => {
                warn!(file = %file, step = %step, kind = %kind, "Transfer failed: {}", message);
            }
            TransferOutcome::Skipped { .. } => {}
        }
        outcome
    }

    async fn transfer(
        &self,
        ctx: &InvocationContext,
        session: Arc<dyn RemoteSession>,
        entry: &RemoteFileEntry,
        decision: &RoutingDecision,
    ) -> TransferOutcome {
        let file = entry.name.as_str();

        let transform = match decision
            .transform
            .parse::<Transform>()
            .and_then(|t| self.transformer.check_input_size(t, entry.size).map(|_| t))
        {
            Ok(t) => t,
            Err(e) => return TransferOutcome::failed(file, FileStep::Transform, &e),
        };

        // The blocking read keeps going until the SFTP I/O timeout, but the
        // invocation stops waiting for it at the deadline
        let stage_budget = ctx.remaining().saturating_sub(DRAIN_RESERVE);
        let staged = match tokio::time::timeout(stage_budget, self.stage(session, entry, transform)).await {
            Ok(Ok(staged)) => staged,
            Ok(Err((step, e))) => return TransferOutcome::failed(file, step, &e),
            Err(_) => {
                return TransferOutcome::failed(
                    file,
                    FileStep::Stage,
                    &TransferError::timeout(format!("staging of '{}'", file), stage_budget),
                )
            }
        };

        let key = decision.destination_key(&staged.output.object_name);
        debug!(
            file,
            key = %key,
            transform = %staged.output.transform,
            bytes_in = staged.output.bytes_in,
            bytes_out = staged.output.bytes_out,
            "Staged"
        );

        if !ctx.admits(self.config.timeouts.deadline_margin) {
            debug!(file, key = %key, "Staged, upload not started, deadline approaching");
            return TransferOutcome::Skipped {
                file: file.to_string(),
                reason: DEADLINE_REACHED.to_string(),
            };
        }

        let upload_timeout = ctx.budget(self.config.timeouts.upload, DRAIN_RESERVE);
        match tokio::time::timeout(upload_timeout, self.sink.put(&key, staged.object)).await {
            Ok(Ok(receipt)) => TransferOutcome::Uploaded {
                file: file.to_string(),
                key: receipt.key,
                bytes: receipt.bytes,
            },
            Ok(Err(e)) => TransferOutcome::failed(file, FileStep::Upload, &e),
            Err(_) => TransferOutcome::failed(
                file,
                FileStep::Upload,
                &TransferError::timeout(format!("upload of '{}'", key), upload_timeout),
            ),
        }
    }

    /// Stream the remote file through the transform into a staging file
    async fn stage(
        &self,
        session: Arc<dyn RemoteSession>,
        entry: &RemoteFileEntry,
        transform: Transform,
    ) -> std::result::Result<Staged, (FileStep, TransferError)> {
        let transformer = self.transformer.clone();
        let staging_dir = self.config.staging_dir.clone();
        let source = entry.path.clone();
        let name = entry.name.clone();

        tokio::task::spawn_blocking(move || {
            stage_blocking(&*session, &transformer, transform, &source, &name, &staging_dir)
        })
        .await
        .map_err(|e| {
            let source = std::io::Error::new(std::io::ErrorKind::Other, e.to_string());
            (FileStep::Stage, TransferError::staging(&self.config.staging_dir, source))
        })?
    }
}

fn stage_blocking(
    session: &dyn RemoteSession,
    transformer: &Transformer,
    transform: Transform,
    source: &Path,
    name: &str,
    staging_dir: &Path,
) -> std::result::Result<Staged, (FileStep, TransferError)> {
    let mut reader = session.open_read(source).map_err(|e| (FileStep::Read, e))?;

    let file = tempfile::Builder::new()
        .prefix("sftp-relay-")
        .tempfile_in(staging_dir)
        .map_err(|e| (FileStep::Stage, TransferError::staging(staging_dir, e)))?;
    let staging_path = file.path().to_path_buf();
    let mut writer = BufWriter::with_capacity(STREAM_BUFFER_SIZE, file);

    let request = TransformRequest {
        transform_id: transform.id(),
        object_name: name,
        source_path: source,
        staging_path: &staging_path,
    };
    let output = transformer
        .apply(&request, &mut reader, &mut writer)
        .map_err(|e| (FileStep::Transform, e))?;

    let file = writer
        .into_inner()
        .map_err(|e| (FileStep::Stage, TransferError::staging(&staging_path, e.into_error())))?;

    Ok(Staged {
        object: StagedObject::new(file, output.bytes_out),
        output,
    })
}

async fn close_session(session: Arc<dyn RemoteSession>) {
    let result = tokio::task::spawn_blocking(move || session.close()).await;
    match result {
        Ok(Ok(())) => debug!("Session closed"),
        Ok(Err(e)) => warn!("Error closing session: {}", e),
        Err(e) => warn!("Session close task failed: {}", e),
    }
}

/// Later uploads to the same key overwrite earlier ones
fn warn_duplicate_keys(outcomes: &[TransferOutcome]) {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for outcome in outcomes {
        if let TransferOutcome::Uploaded { file, key, .. } = outcome {
            if let Some(previous) = seen.insert(key.as_str(), file.as_str()) {
                warn!(key = %key, first = %previous, second = %file, "Destination key written twice, last write wins");
            }
        }
    }
}
