//! # SFTP Relay - Scheduled SFTP to Object Storage Transfer
//!
//! SFTP Relay moves files from a remote SFTP directory into an S3 bucket.
//! Each invocation is stateless: it fetches the SSH key from a secret store,
//! opens one session, routes every listed file through an ordered rule table,
//! optionally transforms it, uploads it, and returns a [`TransferReport`].
//!
//! ## Features
//!
//! - **Scoped credentials**: SSH keys live only in wiped-on-drop memory
//! - **Declarative routing**: first-match-wins rules on suffix, prefix, exact name or glob
//! - **Streaming transforms**: gzip and LZ4 with bounded memory, ZIP extraction with an input cap
//! - **Failure isolation**: one bad file never aborts the batch
//! - **Bounded concurrency**: per-file workers with independent read streams
//! - **Deadline aware**: stops admitting files before the invocation is killed
//!
//! ## Quick Start
//!
//! ```no_run
//! use sftp_relay::config::{ConnectionConfig, PipelineConfig, StorageConfig};
//! use sftp_relay::core::{InvocationContext, Pipeline};
//! use sftp_relay::network::SftpConnector;
//! use sftp_relay::secret::SecretsManagerProvider;
//! use sftp_relay::storage::{load_sdk_config, S3Sink};
//! use std::sync::Arc;
//!
//! # async fn example() -> sftp_relay::Result<()> {
//! let config = PipelineConfig::new(
//!     ConnectionConfig::new("sftp.example.com", "relay"),
//!     "arn:aws:secretsmanager:us-east-1:123456789012:secret:sftp-key",
//!     StorageConfig::new("landing-bucket"),
//! );
//!
//! let sdk_config = load_sdk_config(None).await;
//! let pipeline = Pipeline::new(
//!     config.clone(),
//!     SecretsManagerProvider::new(&sdk_config),
//!     Arc::new(SftpConnector),
//!     S3Sink::new(&sdk_config, &config.storage),
//! )?;
//!
//! let report = pipeline
//!     .run(InvocationContext::generated(config.timeouts.invocation))
//!     .await;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Previewing Routing
//!
//! ```
//! use sftp_relay::config::RoutingConfig;
//! use sftp_relay::network::RemoteFileEntry;
//! use sftp_relay::route::{Classifier, MatchSpec, RuleSpec};
//!
//! let classifier = Classifier::new(&RoutingConfig {
//!     rules: vec![RuleSpec::route(MatchSpec::Suffix(".csv".into()), "csv/")],
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! let decision = classifier.classify(&RemoteFileEntry::file("/outbound", "report_2024.csv", 42));
//! assert_eq!(decision.destination_key("report_2024.csv"), "csv/report_2024.csv");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod route;
pub mod secret;
pub mod storage;
pub mod transform;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use core::{Pipeline, TransferOutcome, TransferReport};
pub use error::{ErrorKind, Result, TransferError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use sftp_relay::prelude::*;
    //! ```

    pub use crate::config::{
        ConnectionConfig, HostKeyPolicy, PipelineConfig, RoutingConfig, StorageConfig, Timeouts,
    };
    pub use crate::core::{
        InvocationContext, Pipeline, ReportStatus, TransferOutcome, TransferReport, TriggerEvent,
    };
    pub use crate::error::{ErrorKind, Result, TransferError};
    pub use crate::network::{RemoteFileEntry, RemoteSession, SessionConnector, SftpConnector};
    pub use crate::route::{Classifier, MatchSpec, RoutingDecision, RuleSpec};
    pub use crate::secret::{Credential, SecretProvider, SecretResolver, SecretsManagerProvider};
    pub use crate::storage::{load_sdk_config, S3Sink, StagedObject, UploadSink};
    pub use crate::transform::{Transform, Transformer};
}
