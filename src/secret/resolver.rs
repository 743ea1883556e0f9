//! Credential parsing and the secret provider seam

use crate::error::{Result, TransferError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

/// SSH private key material for one invocation
///
/// Never persisted, never logged. Both fields are wiped when dropped.
pub struct Credential {
    private_key: Zeroizing<String>,
    passphrase: Option<Zeroizing<String>>,
}

impl Credential {
    /// Build a credential from PEM key material
    pub fn new(private_key: impl Into<String>, passphrase: Option<String>) -> Self {
        Self {
            private_key: Zeroizing::new(private_key.into()),
            passphrase: passphrase.filter(|p| !p.is_empty()).map(Zeroizing::new),
        }
    }

    /// PEM-encoded private key
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Key passphrase, if the key is encrypted
    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref().map(String::as_str)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("private_key", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Key-value secret store
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Fetch the raw secret payload for an identifier
    async fn get_secret(&self, secret_id: &str) -> Result<Zeroizing<String>>;
}

#[derive(Deserialize)]
struct SecretPayload {
    #[serde(alias = "privateKey", alias = "ssh_key", alias = "key")]
    private_key: Option<String>,
    #[serde(alias = "private_key_passphrase")]
    passphrase: Option<String>,
}

/// Resolves secret identifiers into [`Credential`]s
pub struct SecretResolver<P> {
    provider: P,
    timeout: Duration,
}

impl<P: SecretProvider> SecretResolver<P> {
    /// Create a resolver with a bounded fetch timeout
    pub fn new(provider: P, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Fetch and parse the credential stored under `secret_id`
    #[instrument(skip(self), fields(step = "resolve_secret"))]
    pub async fn resolve(&self, secret_id: &str) -> Result<Credential> {
        if secret_id.trim().is_empty() {
            return Err(TransferError::config("secret identifier is empty"));
        }

        let raw = tokio::time::timeout(self.timeout, self.provider.get_secret(secret_id))
            .await
            .map_err(|_| TransferError::SecretUnavailable {
                secret_id: secret_id.to_string(),
                message: format!("timed out after {:?}", self.timeout),
            })??;

        let credential = parse_credential(secret_id, &raw)?;
        debug!(
            encrypted = credential.passphrase().is_some(),
            "SSH credential resolved"
        );
        Ok(credential)
    }
}

/// Parse a secret payload into a credential
///
/// Error messages carry only the parse position, never payload content.
pub fn parse_credential(secret_id: &str, raw: &str) -> Result<Credential> {
    let malformed = |message: String| TransferError::SecretMalformed {
        secret_id: secret_id.to_string(),
        message,
    };

    let payload: SecretPayload = serde_json::from_str(raw).map_err(|e| {
        malformed(format!(
            "{:?} error at line {} column {}",
            e.classify(),
            e.line(),
            e.column()
        ))
    })?;

    let mut key = Zeroizing::new(
        payload
            .private_key
            .ok_or_else(|| malformed("missing private_key field".to_string()))?,
    );

    // Keys pasted into consoles often arrive with escaped newlines
    if !key.contains('\n') && key.contains("\\n") {
        key = Zeroizing::new(key.replace("\\n", "\n"));
    }

    if !key.contains("-----BEGIN") || !key.contains("PRIVATE KEY-----") {
        return Err(malformed("private_key is not PEM key material".to_string()));
    }

    Ok(Credential::new(key.as_str(), payload.passphrase))
}
