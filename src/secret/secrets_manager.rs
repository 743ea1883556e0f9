//! AWS Secrets Manager backed secret provider

use crate::error::{Result, TransferError};
use crate::secret::SecretProvider;
use async_trait::async_trait;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use zeroize::Zeroizing;

/// Reads `SecretString` values from AWS Secrets Manager
pub struct SecretsManagerProvider {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerProvider {
    /// Create a provider from a loaded SDK configuration
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_secretsmanager::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl SecretProvider for SecretsManagerProvider {
    async fn get_secret(&self, secret_id: &str) -> Result<Zeroizing<String>> {
        let resp = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| TransferError::SecretUnavailable {
                secret_id: secret_id.to_string(),
                message: format!("get_secret_value failed: {}", DisplayErrorContext(&e)),
            })?;

        match resp.secret_string() {
            Some(value) => Ok(Zeroizing::new(value.to_string())),
            None => Err(TransferError::SecretMalformed {
                secret_id: secret_id.to_string(),
                message: "secret has no string value".to_string(),
            }),
        }
    }
}
