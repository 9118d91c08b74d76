//! Access token verification against the backend API.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::AuthConfig;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("verifier endpoint is not a valid URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("verifier unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("verifier answered with status {0}")]
    UnexpectedStatus(u16),
    #[error("verification timed out")]
    Timeout,
}

/// Decides whether an access token is still honoured by the identity layer.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<bool, VerifyError>;
}

/// Verifies tokens with `GET {api_base_url}/auth/verify` and a bearer header.
///
/// 2xx means valid, 401/403 means rejected, anything else is an error.
pub struct HttpTokenVerifier {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTokenVerifier {
    pub fn new(api_base_url: &str, timeout: Duration) -> Result<Self, VerifyError> {
        let endpoint = Url::parse(&format!(
            "{}/auth/verify",
            api_base_url.trim_end_matches('/')
        ))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, VerifyError> {
        Self::new(
            &config.api_base_url,
            Duration::from_millis(config.verify_timeout_ms),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<bool, VerifyError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VerifyError::Timeout
                } else {
                    VerifyError::Transport(e)
                }
            })?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            status => Err(VerifyError::UnexpectedStatus(status.as_u16())),
        }
    }
}
