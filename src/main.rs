//! SFTP Relay CLI
//!
//! Runs one transfer invocation per call, or previews routing decisions.
//! Logs go to stderr; the transfer report is printed as JSON on stdout.

use anyhow::Context;
use clap::Parser;
use sftp_relay::config::{CliArgs, Commands, LogFormat, PipelineConfig, RoutingConfig, Settings};
use sftp_relay::core::{InvocationContext, Pipeline, TransferReport, TriggerEvent};
use sftp_relay::network::{RemoteFileEntry, SftpConnector};
use sftp_relay::route::Classifier;
use sftp_relay::secret::SecretsManagerProvider;
use sftp_relay::storage::{load_sdk_config, S3Sink};
use sftp_relay::transform::Transform;
use sftp_relay::TransferError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments and environment once
    let args = CliArgs::parse();

    init_logging(args.log_format);

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .init(),
        LogFormat::Text => builder.init(),
    }
}

fn run(args: CliArgs) -> anyhow::Result<i32> {
    match &args.command {
        Commands::Run { event, request_id } => {
            cmd_run(&args.settings, event.as_deref(), request_id.clone())
        }
        Commands::Classify { names } => cmd_classify(&args.settings, names),
    }
}

fn cmd_run(settings: &Settings, event: Option<&str>, request_id: Option<String>) -> anyhow::Result<i32> {
    let started = Instant::now();
    let request_id = request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let config = match PipelineConfig::from_cli(settings) {
        Ok(config) => config,
        Err(e) => return emit_report(&fatal_report(&request_id, &e, started)),
    };

    let ctx = InvocationContext::new(request_id.clone(), config.timeouts.invocation)
        .with_event(TriggerEvent::parse(event));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let report = runtime.block_on(async move {
        let sdk_config = load_sdk_config(config.storage.region.as_deref()).await;
        let provider = SecretsManagerProvider::new(&sdk_config);
        let sink = S3Sink::new(&sdk_config, &config.storage);
        let cleanup = sink.clone();
        let deadline = ctx.deadline;

        let report = match Pipeline::new(config, provider, Arc::new(SftpConnector), sink) {
            Ok(pipeline) => pipeline.run(ctx).await,
            Err(e) => fatal_report(&request_id, &e, started),
        };

        // Multipart uploads cancelled by a timeout are aborted in the background
        cleanup
            .drain_aborts(deadline.saturating_duration_since(Instant::now()))
            .await;
        report
    });

    let code = emit_report(&report);
    // Staging reads cut short by the deadline may still be blocked on the socket
    runtime.shutdown_timeout(Duration::from_secs(1));
    code
}

/// Report for failures raised before the pipeline could start
fn fatal_report(request_id: &str, err: &TransferError, started: Instant) -> TransferReport {
    error!(kind = %err.kind(), "Invocation aborted: {}", err);
    let mut report = TransferReport::new(request_id);
    report.set_fatal(err);
    report.finish(started.elapsed());
    report
}

fn emit_report(report: &TransferReport) -> anyhow::Result<i32> {
    let json = serde_json::to_string(report).context("Failed to serialize transfer report")?;
    info!(report = %json, "Transfer report");
    println!("{}", json);
    Ok(report.exit_code())
}

fn cmd_classify(settings: &Settings, names: &[String]) -> anyhow::Result<i32> {
    let routing = RoutingConfig::from_settings(settings)?;
    let classifier = Classifier::new(&routing)?;

    for name in names {
        let entry = RemoteFileEntry::file(&settings.remote_directory, name.clone(), 0);
        let decision = classifier.classify(&entry);

        // Archive member names are only known after extraction
        let key = match decision.transform.parse::<Transform>() {
            Ok(t) if !decision.is_skip() && !t.buffers_input() => {
                let object_name = match t.name_suffix() {
                    Some(suffix) => format!("{}{}", name, suffix),
                    None => name.clone(),
                };
                Some(decision.destination_key(&object_name))
            }
            _ => None,
        };

        let line = serde_json::json!({
            "file": name,
            "key": key,
            "decision": decision,
        });
        println!("{}", line);
    }

    Ok(0)
}
