//! Minimal client for the Dilemma narrative backend.
//!
//! The backend owns every AI model call the game makes. This crate speaks the
//! one contract the session core needs from it:
//!
//! ```text
//! POST {base_url}/aftermath
//!   { sessionId, playerState, language, debug } -> { narrativeResult }
//! ```
//!
//! The payload is opaque to callers beyond the session tag; the game screens
//! that render the aftermath interpret `narrativeResult`.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Backend URL not configured - set DILEMMA_API_URL")]
    NoApiUrl,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Backend client.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl Client {
    /// Create a client for the backend at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Create a client from `DILEMMA_API_URL` (and optional `DILEMMA_API_KEY`).
    pub fn from_env() -> Result<Self, Error> {
        let base_url = std::env::var("DILEMMA_API_URL").map_err(|_| Error::NoApiUrl)?;
        let client = Self::new(base_url)?;
        Ok(match std::env::var("DILEMMA_API_KEY") {
            Ok(key) if !key.is_empty() => client.with_api_key(key),
            _ => client,
        })
    }

    /// Send a bearer token with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Bound each request; exceeding it yields [`Error::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask the backend to build the end-of-game aftermath for one session.
    pub async fn generate_aftermath(&self, request: &AftermathRequest) -> Result<Aftermath, Error> {
        let headers = self.build_headers()?;

        tracing::debug!(session_id = %request.session_id, "requesting aftermath");

        let response = self
            .http
            .post(format!("{}/aftermath", self.base_url))
            .headers(headers)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(Aftermath {
            session_id: request.session_id.clone(),
            narrative: api_response.narrative_result,
        })
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref key) = self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
            );
        }
        Ok(headers)
    }

    fn map_transport_error(&self, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Network(error.to_string())
        }
    }
}

// ============================================================================
// Public types
// ============================================================================

/// Everything the backend needs to write the aftermath, captured by the
/// caller at the moment the request is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AftermathRequest {
    pub session_id: String,
    pub player_state: serde_json::Value,
    pub language: String,
    #[serde(default)]
    pub debug: bool,
}

impl AftermathRequest {
    pub fn new(session_id: impl Into<String>, player_state: serde_json::Value) -> Self {
        Self {
            session_id: session_id.into(),
            player_state,
            language: "en".to_string(),
            debug: false,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// A generated aftermath, tagged with the session it was computed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aftermath {
    pub session_id: String,
    pub narrative: serde_json::Value,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    narrative_result: serde_json::Value,
}
