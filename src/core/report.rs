//! Transfer outcomes and the invocation report

use crate::error::{ErrorKind, TransferError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Skip reason for files not admitted before the deadline
pub const DEADLINE_REACHED: &str = "deadline reached";

/// Per-file step that produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStep {
    /// Opening or reading the remote file
    Read,
    /// Applying the routed transform
    Transform,
    /// Writing the staging file
    Stage,
    /// Uploading to object storage
    Upload,
}

impl FileStep {
    /// Step implied by an error kind, falling back to where it was raised
    pub fn for_error(raised_at: FileStep, err: &TransferError) -> Self {
        match err.kind() {
            ErrorKind::FileNotFound | ErrorKind::ReadFailed | ErrorKind::PermissionDenied => {
                Self::Read
            }
            ErrorKind::Staging => Self::Stage,
            _ => raised_at,
        }
    }
}

impl std::fmt::Display for FileStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Transform => "transform",
            Self::Stage => "stage",
            Self::Upload => "upload",
        };
        f.write_str(s)
    }
}

/// Terminal result for one listed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TransferOutcome {
    /// Committed to object storage
    Uploaded {
        /// Remote file name
        file: String,
        /// Destination key
        key: String,
        /// Bytes stored
        bytes: u64,
    },
    /// Intentionally not transferred
    Skipped {
        /// Remote file name
        file: String,
        /// Why
        reason: String,
    },
    /// Transfer attempted and failed
    Failed {
        /// Remote file name
        file: String,
        /// Step that failed
        step: FileStep,
        /// Error classification
        kind: ErrorKind,
        /// Error message
        message: String,
    },
}

impl TransferOutcome {
    /// Build a failure outcome from an error
    pub fn failed(file: impl Into<String>, step: FileStep, err: &TransferError) -> Self {
        Self::Failed {
            file: file.into(),
            step: FileStep::for_error(step, err),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Remote file name this outcome belongs to
    pub fn file(&self) -> &str {
        match self {
            Self::Uploaded { file, .. } | Self::Skipped { file, .. } | Self::Failed { file, .. } => {
                file
            }
        }
    }
}

/// Overall result of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Every attempted file succeeded
    Success,
    /// Some files failed, none fatally
    PartialSuccess,
    /// The invocation aborted
    Fatal,
}

/// Session-level failure that aborted the invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FatalFailure {
    /// Error classification
    pub kind: ErrorKind,
    /// Error message
    pub message: String,
}

/// Structured summary of one invocation
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    /// Request id for log correlation
    pub request_id: String,
    /// Overall status
    pub status: ReportStatus,
    /// Files uploaded
    pub uploaded: usize,
    /// Files skipped
    pub skipped: usize,
    /// Files failed
    pub failed: usize,
    /// Total bytes uploaded
    pub bytes_uploaded: u64,
    /// Set when the invocation aborted
    pub fatal: Option<FatalFailure>,
    /// Whether files were left unadmitted because of the deadline
    pub deadline_reached: bool,
    /// Invocation start
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Per-file outcomes in listing order
    pub outcomes: Vec<TransferOutcome>,
}

impl TransferReport {
    /// Empty report for a new invocation
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ReportStatus::Success,
            uploaded: 0,
            skipped: 0,
            failed: 0,
            bytes_uploaded: 0,
            fatal: None,
            deadline_reached: false,
            started_at: Utc::now(),
            duration_ms: 0,
            outcomes: Vec::new(),
        }
    }

    /// Add one file's outcome
    pub fn record(&mut self, outcome: TransferOutcome) {
        match &outcome {
            TransferOutcome::Uploaded { bytes, .. } => {
                self.uploaded += 1;
                self.bytes_uploaded += bytes;
            }
            TransferOutcome::Skipped { reason, .. } => {
                self.skipped += 1;
                if reason == DEADLINE_REACHED {
                    self.deadline_reached = true;
                }
            }
            TransferOutcome::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Mark the invocation as aborted
    pub fn set_fatal(&mut self, err: &TransferError) {
        self.fatal = Some(FatalFailure {
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    /// Seal the report with its duration and final status
    pub fn finish(&mut self, duration: Duration) {
        self.duration_ms = duration.as_millis() as u64;
        self.status = if self.fatal.is_some() {
            ReportStatus::Fatal
        } else if self.failed > 0 {
            ReportStatus::PartialSuccess
        } else {
            ReportStatus::Success
        };
    }

    /// Files that reached any terminal outcome
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the trigger should see success (success or partial success)
    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
    }

    /// Process exit code for this report
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Failed outcomes only
    pub fn failures(&self) -> impl Iterator<Item = &TransferOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TransferOutcome::Failed { .. }))
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} uploaded ({}), {} skipped, {} failed in {}",
            self.uploaded,
            humansize::format_size(self.bytes_uploaded, humansize::BINARY),
            self.skipped,
            self.failed,
            humantime::format_duration(Duration::from_millis(self.duration_ms)),
        );
        if let Some(fatal) = &self.fatal {
            line.push_str(&format!("; fatal {}: {}", fatal.kind, fatal.message));
        }
        if self.deadline_reached {
            line.push_str("; stopped at deadline");
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploaded(file: &str, key: &str) -> TransferOutcome {
        TransferOutcome::Uploaded {
            file: file.into(),
            key: key.into(),
            bytes: 10,
        }
    }

    #[test]
    fn test_counts_and_success() {
        let mut report = TransferReport::new("req-1");
        report.record(uploaded("a.txt", "misc/a.txt"));
        report.record(uploaded("c.csv", "data/c.csv"));
        report.record(TransferOutcome::Skipped {
            file: "manifest".into(),
            reason: "matched rule 1".into(),
        });
        report.finish(Duration::from_millis(1500));

        assert_eq!((report.uploaded, report.skipped, report.failed), (2, 1, 0));
        assert_eq!(report.bytes_uploaded, 20);
        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.duration_ms, 1500);
    }

    #[test]
    fn test_partial_success_is_not_fatal() {
        let mut report = TransferReport::new("req-2");
        report.record(uploaded("a.txt", "misc/a.txt"));
        let err = TransferError::SinkRejected {
            key: "archive/b.zip".into(),
            message: "quota exceeded".into(),
        };
        report.record(TransferOutcome::failed("b.zip", FileStep::Upload, &err));
        report.finish(Duration::ZERO);

        assert_eq!(report.status, ReportStatus::PartialSuccess);
        assert!(report.is_success());
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.file(), "b.zip");
    }

    #[test]
    fn test_fatal_report() {
        let mut report = TransferReport::new("req-3");
        report.set_fatal(&TransferError::SecretMalformed {
            secret_id: "arn".into(),
            message: "missing private_key field".into(),
        });
        report.finish(Duration::ZERO);

        assert_eq!(report.status, ReportStatus::Fatal);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.attempted(), 0);
        assert!(report.summary().contains("SecretMalformed"));
    }

    #[test]
    fn test_deadline_flag() {
        let mut report = TransferReport::new("req-4");
        report.record(TransferOutcome::Skipped {
            file: "late.csv".into(),
            reason: DEADLINE_REACHED.into(),
        });
        assert!(report.deadline_reached);
    }

    #[test]
    fn test_failure_step_follows_error_kind() {
        let err = TransferError::ReadFailed {
            path: "/outbound/a".into(),
            message: "connection reset".into(),
        };
        let outcome = TransferOutcome::failed("a", FileStep::Transform, &err);
        assert!(matches!(outcome, TransferOutcome::Failed { step: FileStep::Read, .. }));
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = TransferReport::new("req-5");
        let err = TransferError::UnsupportedTransform("rot13".into());
        report.record(TransferOutcome::failed("x", FileStep::Transform, &err));
        report.finish(Duration::ZERO);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "partial_success");
        assert_eq!(json["outcomes"][0]["outcome"], "failed");
        assert_eq!(json["outcomes"][0]["kind"], "UnsupportedTransform");
        assert_eq!(json["outcomes"][0]["step"], "transform");
    }
}
