//! Testing utilities for the session core.
//!
//! - `MockProvider` stands in for the AI backend without network calls
//! - `MockOutcome` scripts what each call returns
//!
//! The provider can also hold every call behind a gate, which is how the
//! deduplication tests keep an attempt pending while racing `start` calls.

use crate::provider::{AftermathProvider, ProviderError};
use async_trait::async_trait;
use dilemma_client::{Aftermath, AftermathRequest};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::{watch, Semaphore};

/// What one scripted call does.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Return this narrative.
    Success(serde_json::Value),
    /// Fail with this message.
    Failure(String),
    /// Never answer.
    Hang,
}

/// A provider that returns scripted outcomes in order.
///
/// When the script runs out every further call succeeds with a small
/// placeholder narrative.
pub struct MockProvider {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    requests: Mutex<Vec<AftermathRequest>>,
    calls: watch::Sender<usize>,
    gate: Option<Semaphore>,
}

impl MockProvider {
    /// A provider that always succeeds immediately.
    pub fn new() -> Self {
        Self::with_outcomes(Vec::new())
    }

    /// A provider that answers with `outcomes`, in order.
    pub fn with_outcomes(outcomes: Vec<MockOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
            calls: watch::Sender::new(0),
            gate: None,
        }
    }

    /// Like [`with_outcomes`](Self::with_outcomes), but each call waits
    /// for [`release`](Self::release) before answering.
    pub fn gated(outcomes: Vec<MockOutcome>) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::with_outcomes(outcomes)
        }
    }

    /// Let `n` gated calls answer.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }

    /// Wait until at least `n` calls have been received.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        if rx.wait_for(|count| *count >= n).await.is_err() {
            tracing::warn!(n, "call counter closed before reaching target");
        }
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<AftermathRequest> {
        self.requests.lock().clone()
    }

    /// Queue another scripted outcome.
    pub fn queue(&self, outcome: MockOutcome) {
        self.outcomes.lock().push_back(outcome);
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AftermathProvider for MockProvider {
    async fn generate_aftermath(&self, request: AftermathRequest) -> Result<Aftermath, ProviderError> {
        let outcome = self.outcomes.lock().pop_front();
        self.requests.lock().push(request.clone());
        self.calls.send_modify(|count| *count += 1);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        match outcome {
            Some(MockOutcome::Success(narrative)) => Ok(Aftermath {
                session_id: request.session_id,
                narrative,
            }),
            Some(MockOutcome::Failure(message)) => Err(ProviderError::Rejected(message)),
            Some(MockOutcome::Hang) => std::future::pending().await,
            None => Ok(Aftermath {
                session_id: request.session_id,
                narrative: serde_json::json!({ "summary": "The days passed quietly." }),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_then_default() {
        let provider = MockProvider::with_outcomes(vec![MockOutcome::Failure("nope".to_string())]);

        let first = provider
            .generate_aftermath(AftermathRequest::new("g1", json!({})))
            .await;
        assert!(matches!(first, Err(ProviderError::Rejected(ref m)) if m == "nope"));

        let second = provider
            .generate_aftermath(AftermathRequest::new("g1", json!({})).with_language("he"))
            .await
            .unwrap();
        assert_eq!(second.session_id, "g1");

        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.requests()[1].language, "he");
    }
}
