//! Per-invocation execution context

use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::warn;

/// Per-run overrides carried in the trigger payload
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct TriggerEvent {
    /// Directory to list instead of the configured one
    #[serde(default)]
    pub remote_directory: Option<PathBuf>,
}

impl TriggerEvent {
    /// Parse a trigger payload; unknown fields are ignored and invalid
    /// payloads are logged and treated as empty
    pub fn parse(payload: Option<&str>) -> Self {
        let Some(payload) = payload.map(str::trim).filter(|p| !p.is_empty()) else {
            return Self::default();
        };

        match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring unparsable trigger event: {}", e);
                Self::default()
            }
        }
    }
}

/// Execution context for one invocation
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Request id for log correlation
    pub request_id: String,
    /// Point after which the invocation will be killed
    pub deadline: Instant,
    /// Remote directory override from the trigger event
    pub remote_directory: Option<PathBuf>,
}

impl InvocationContext {
    /// Context with a deadline `timeout` from now
    pub fn new(request_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            deadline: Instant::now() + timeout,
            remote_directory: None,
        }
    }

    /// Context with a generated request id
    pub fn generated(timeout: Duration) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), timeout)
    }

    /// Apply overrides from a trigger event
    pub fn with_event(mut self, event: TriggerEvent) -> Self {
        self.remote_directory = event.remote_directory;
        self
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether a new file may still be started
    pub fn admits(&self, margin: Duration) -> bool {
        self.remaining() > margin
    }

    /// Time a step may take: `cap`, shortened so that `reserve` is left
    /// before the deadline
    pub fn budget(&self, cap: Duration, reserve: Duration) -> Duration {
        cap.min(self.remaining().saturating_sub(reserve))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_override() {
        let event = TriggerEvent::parse(Some(r#"{"remote_directory": "/outbound/daily", "source": "aws.events"}"#));
        assert_eq!(event.remote_directory, Some(PathBuf::from("/outbound/daily")));

        let ctx = InvocationContext::new("req", Duration::from_secs(60)).with_event(event);
        assert_eq!(ctx.remote_directory, Some(PathBuf::from("/outbound/daily")));
    }

    #[test]
    fn test_invalid_or_empty_event_is_ignored() {
        assert_eq!(TriggerEvent::parse(Some("not json")), TriggerEvent::default());
        assert_eq!(TriggerEvent::parse(Some("  ")), TriggerEvent::default());
        assert_eq!(TriggerEvent::parse(None), TriggerEvent::default());
    }

    #[test]
    fn test_admission_margin() {
        let ctx = InvocationContext::new("req", Duration::from_secs(60));
        assert!(ctx.admits(Duration::from_secs(30)));
        assert!(!ctx.admits(Duration::from_secs(120)));

        let expired = InvocationContext::new("req", Duration::ZERO);
        assert!(!expired.admits(Duration::ZERO));
        assert_eq!(expired.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_budget_never_reaches_past_deadline() {
        let ctx = InvocationContext::new("req", Duration::from_secs(60));
        assert_eq!(ctx.budget(Duration::from_secs(10), Duration::from_secs(5)), Duration::from_secs(10));

        let short = ctx.budget(Duration::from_secs(300), Duration::from_secs(5));
        assert!(short <= Duration::from_secs(55));
        assert!(short > Duration::from_secs(50));

        let expired = InvocationContext::new("req", Duration::ZERO);
        assert_eq!(expired.budget(Duration::from_secs(300), Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_generated_request_id() {
        let a = InvocationContext::generated(Duration::from_secs(1));
        let b = InvocationContext::generated(Duration::from_secs(1));
        assert_ne!(a.request_id, b.request_id);
    }
}
