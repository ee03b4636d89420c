//! The AI backend as seen from the session core.

use crate::config::CoreConfig;
use async_trait::async_trait;
use dilemma_client::{Aftermath, AftermathRequest, Client};
use thiserror::Error;

/// Errors a provider reports for one request.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Backend error: {0}")]
    Client(#[from] dilemma_client::Error),

    #[error("Provider rejected the request: {0}")]
    Rejected(String),
}

/// Builds the end-of-game aftermath. One call per request; the core decides
/// how often it is called.
#[async_trait]
pub trait AftermathProvider: Send + Sync {
    async fn generate_aftermath(&self, request: AftermathRequest) -> Result<Aftermath, ProviderError>;
}

#[async_trait]
impl AftermathProvider for Client {
    async fn generate_aftermath(&self, request: AftermathRequest) -> Result<Aftermath, ProviderError> {
        Ok(Client::generate_aftermath(self, &request).await?)
    }
}

/// The backend client from `DILEMMA_API_URL`, bounded by the configured
/// request timeout.
pub fn provider_from_env(core: &CoreConfig) -> Result<Client, dilemma_client::Error> {
    Ok(Client::from_env()?.with_timeout(core.request_timeout))
}
