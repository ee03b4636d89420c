//! At-most-once aftermath generation per session.
//!
//! Near the end of play several things may decide it is time to build the
//! aftermath: a screen mounting twice, two components racing, a player
//! double-clicking. [`SummaryPrefetchCoordinator::start`] collapses all of
//! them onto one provider call per session and hands every caller the same
//! [`PrefetchHandle`].
//!
//! Per session the slot moves through:
//!
//! ```text
//! Idle --start--> Pending --ok--> Resolved --clear--> Idle
//!                    |
//!                    +--error/timeout--> Idle
//! ```
//!
//! `start` while Pending or Resolved returns the existing handle. A failure
//! clears the slot entirely so the next `start` retries from scratch.
//!
//! Every attempt runs as a task on the coordinator's tokio runtime, so it
//! makes progress whether or not anyone awaits a handle, and a handle can be
//! awaited from any executor.

use crate::id::SessionId;
use crate::provider::AftermathProvider;
use dilemma_client::{Aftermath, AftermathRequest};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::panic::AssertUnwindSafe;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Why an attempt produced no aftermath.
///
/// Cloneable so every holder of a handle observes the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefetchError {
    #[error("Aftermath provider failed: {0}")]
    Provider(String),

    #[error("Aftermath request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Aftermath task did not finish: {0}")]
    Aborted(String),
}

/// Outcome shared by every handle to one attempt.
pub type PrefetchOutcome = Result<Arc<Aftermath>, PrefetchError>;

/// Where a session's slot stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchState {
    Idle,
    Pending { attempt: u64 },
    Resolved { attempt: u64 },
}

/// A claim on one attempt's outcome. Clones observe the same attempt.
#[derive(Clone)]
pub struct PrefetchHandle {
    session_id: SessionId,
    attempt: u64,
    outcome: Shared<BoxFuture<'static, PrefetchOutcome>>,
}

impl PrefetchHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Distinguishes attempts; a retry after failure gets a new number.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Wait for the attempt to finish.
    pub async fn outcome(&self) -> PrefetchOutcome {
        self.outcome.clone().await
    }

    /// The outcome if the attempt already finished.
    pub fn peek(&self) -> Option<PrefetchOutcome> {
        self.outcome.peek().cloned()
    }
}

impl fmt::Debug for PrefetchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchHandle")
            .field("session_id", &self.session_id)
            .field("attempt", &self.attempt)
            .field("finished", &self.outcome.peek().is_some())
            .finish()
    }
}

struct Slot {
    handle: PrefetchHandle,
    resolved: Option<Arc<Aftermath>>,
}

#[derive(Default)]
struct Slots {
    by_session: HashMap<SessionId, Slot>,
    next_attempt: u64,
}

/// Deduplicating front for [`AftermathProvider`], one slot per session.
pub struct SummaryPrefetchCoordinator {
    provider: Arc<dyn AftermathProvider>,
    timeout: Duration,
    runtime: Handle,
    slots: Arc<Mutex<Slots>>,
}

impl SummaryPrefetchCoordinator {
    /// Attempts are spawned on `runtime`; pass `Handle::current()` from
    /// inside async code.
    pub fn new(provider: Arc<dyn AftermathProvider>, timeout: Duration, runtime: Handle) -> Self {
        Self {
            provider,
            timeout,
            runtime,
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    /// Begin building the aftermath for `request.session_id`, unless an
    /// attempt is already pending or resolved for that session.
    ///
    /// The request is the snapshot sent to the provider; later changes to the
    /// session do not reach it. The call is driven to completion in the
    /// background.
    pub fn start(&self, request: AftermathRequest) -> PrefetchHandle {
        let session_id = SessionId::new(request.session_id.clone());
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.by_session.get(&session_id) {
            debug!(
                session_id = %session_id,
                attempt = slot.handle.attempt,
                resolved = slot.resolved.is_some(),
                "aftermath already requested"
            );
            return slot.handle.clone();
        }

        slots.next_attempt += 1;
        let attempt = slots.next_attempt;
        let handle = PrefetchHandle {
            session_id: session_id.clone(),
            attempt,
            outcome: self.attempt(session_id.clone(), attempt, request),
        };
        slots.by_session.insert(
            session_id.clone(),
            Slot {
                handle: handle.clone(),
                resolved: None,
            },
        );
        drop(slots);

        info!(session_id = %session_id, attempt, "requesting aftermath");
        handle
    }

    /// The resolved aftermath, if any. Does not clear it.
    pub fn consume(&self, session_id: &SessionId) -> Option<Arc<Aftermath>> {
        self.slots
            .lock()
            .by_session
            .get(session_id)
            .and_then(|slot| slot.resolved.clone())
    }

    /// Like [`consume`](Self::consume), but only if the aftermath is tagged
    /// with `session_id`.
    pub fn consume_checked(&self, session_id: &SessionId) -> Option<Arc<Aftermath>> {
        self.consume(session_id)
            .filter(|aftermath| aftermath.session_id == session_id.as_str())
    }

    /// Drop the session's slot, pending or resolved. Returns whether there
    /// was one. A pending attempt still finishes but its result is discarded.
    pub fn clear(&self, session_id: &SessionId) -> bool {
        let cleared = self.slots.lock().by_session.remove(session_id).is_some();
        if cleared {
            debug!(session_id = %session_id, "cleared aftermath slot");
        }
        cleared
    }

    pub fn state(&self, session_id: &SessionId) -> PrefetchState {
        match self.slots.lock().by_session.get(session_id) {
            None => PrefetchState::Idle,
            Some(slot) if slot.resolved.is_some() => PrefetchState::Resolved {
                attempt: slot.handle.attempt,
            },
            Some(slot) => PrefetchState::Pending {
                attempt: slot.handle.attempt,
            },
        }
    }

    fn attempt(
        &self,
        session_id: SessionId,
        attempt: u64,
        request: AftermathRequest,
    ) -> Shared<BoxFuture<'static, PrefetchOutcome>> {
        let provider = self.provider.clone();
        let slots = Arc::downgrade(&self.slots);
        let timeout = self.timeout;

        let task = {
            let slots = slots.clone();
            let session_id = session_id.clone();
            self.runtime.spawn(async move {
                let call = AssertUnwindSafe(provider.generate_aftermath(request)).catch_unwind();
                let outcome = match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(Ok(aftermath))) => Ok(Arc::new(aftermath)),
                    Ok(Ok(Err(e))) => Err(PrefetchError::Provider(e.to_string())),
                    Ok(Err(_)) => Err(PrefetchError::Provider("provider panicked".to_string())),
                    Err(_) => Err(PrefetchError::Timeout(timeout)),
                };
                settle(&slots, &session_id, attempt, &outcome);
                outcome
            })
        };

        task.map(move |joined| match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                let outcome = Err(PrefetchError::Aborted(e.to_string()));
                settle(&slots, &session_id, attempt, &outcome);
                outcome
            }
        })
        .boxed()
        .shared()
    }
}

fn settle(slots: &Weak<Mutex<Slots>>, session_id: &SessionId, attempt: u64, outcome: &PrefetchOutcome) {
    let Some(slots) = slots.upgrade() else {
        return;
    };
    let mut slots = slots.lock();

    let current = slots
        .by_session
        .get(session_id)
        .is_some_and(|slot| slot.handle.attempt == attempt);
    if !current {
        debug!(session_id = %session_id, attempt, "discarding superseded aftermath");
        return;
    }

    match outcome {
        Ok(aftermath) => {
            if let Some(slot) = slots.by_session.get_mut(session_id) {
                slot.resolved = Some(aftermath.clone());
            }
            info!(session_id = %session_id, attempt, "aftermath ready");
        }
        Err(e) => {
            slots.by_session.remove(session_id);
            warn!(session_id = %session_id, attempt, error = %e, "aftermath failed, slot reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockOutcome, MockProvider};
    use serde_json::json;

    fn request(session: &str) -> AftermathRequest {
        AftermathRequest::new(session, json!({ "day": 7 }))
    }

    fn coordinator(provider: &Arc<MockProvider>) -> SummaryPrefetchCoordinator {
        SummaryPrefetchCoordinator::new(provider.clone(), Duration::from_secs(15), Handle::current())
    }

    #[tokio::test]
    async fn test_resolves_and_caches() {
        let provider = Arc::new(MockProvider::new());
        let coordinator = coordinator(&provider);
        let id = SessionId::from("g1");

        assert_eq!(coordinator.state(&id), PrefetchState::Idle);
        let handle = coordinator.start(request("g1"));
        assert_eq!(coordinator.state(&id), PrefetchState::Pending { attempt: handle.attempt() });

        let aftermath = handle.outcome().await.unwrap();
        assert_eq!(aftermath.session_id, "g1");
        assert_eq!(coordinator.state(&id), PrefetchState::Resolved { attempt: handle.attempt() });

        let first = coordinator.consume(&id).unwrap();
        let second = coordinator.consume(&id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &aftermath));
    }

    #[tokio::test]
    async fn test_start_after_resolve_is_noop() {
        let provider = Arc::new(MockProvider::new());
        let coordinator = coordinator(&provider);

        let first = coordinator.start(request("g1"));
        first.outcome().await.unwrap();
        let again = coordinator.start(request("g1"));

        assert_eq!(again.attempt(), first.attempt());
        assert!(again.peek().is_some());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_clears_slot_for_retry() {
        let provider = Arc::new(MockProvider::with_outcomes(vec![
            MockOutcome::Failure("model overloaded".to_string()),
            MockOutcome::Success(json!({ "verdict": "remembered" })),
        ]));
        let coordinator = coordinator(&provider);
        let id = SessionId::from("g1");

        let failed = coordinator.start(request("g1"));
        let err = failed.outcome().await.unwrap_err();
        assert!(matches!(err, PrefetchError::Provider(ref m) if m.contains("model overloaded")));
        assert_eq!(coordinator.state(&id), PrefetchState::Idle);
        assert!(coordinator.consume(&id).is_none());

        let retry = coordinator.start(request("g1"));
        assert_ne!(retry.attempt(), failed.attempt());
        let aftermath = retry.outcome().await.unwrap();
        assert_eq!(aftermath.narrative["verdict"], "remembered");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_failure() {
        let provider = Arc::new(MockProvider::with_outcomes(vec![MockOutcome::Hang]));
        let coordinator = coordinator(&provider);

        let handle = coordinator.start(request("g1"));
        assert_eq!(
            handle.outcome().await.unwrap_err(),
            PrefetchError::Timeout(Duration::from_secs(15))
        );
        assert_eq!(coordinator.state(&SessionId::from("g1")), PrefetchState::Idle);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let provider = Arc::new(MockProvider::new());
        let coordinator = coordinator(&provider);

        let a = coordinator.start(request("g1"));
        let b = coordinator.start(request("g2"));
        assert_ne!(a.attempt(), b.attempt());

        assert_eq!(a.outcome().await.unwrap().session_id, "g1");
        assert_eq!(b.outcome().await.unwrap().session_id, "g2");
        assert_eq!(provider.calls(), 2);

        coordinator.clear(&SessionId::from("g1"));
        assert!(coordinator.consume(&SessionId::from("g1")).is_none());
        assert!(coordinator.consume_checked(&SessionId::from("g2")).is_some());
    }

    #[tokio::test]
    async fn test_cleared_attempt_does_not_resurrect() {
        let provider = Arc::new(MockProvider::gated(vec![
            MockOutcome::Success(json!({ "run": "first" })),
            MockOutcome::Success(json!({ "run": "second" })),
        ]));
        let coordinator = coordinator(&provider);
        let id = SessionId::from("g1");

        let stale = coordinator.start(request("g1"));
        provider.wait_for_calls(1).await;
        assert!(coordinator.clear(&id));

        let fresh = coordinator.start(request("g1"));
        provider.wait_for_calls(2).await;
        provider.release(2);

        stale.outcome().await.unwrap();
        fresh.outcome().await.unwrap();

        assert_eq!(coordinator.state(&id), PrefetchState::Resolved { attempt: fresh.attempt() });
        assert_eq!(coordinator.consume(&id).unwrap().narrative["run"], "second");
    }

    #[test]
    fn test_runs_without_being_awaited_and_from_any_executor() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let provider = Arc::new(MockProvider::new());
        let coordinator =
            SummaryPrefetchCoordinator::new(provider.clone(), Duration::from_secs(15), runtime.handle().clone());
        let id = SessionId::from("g1");

        let handle = coordinator.start(request("g1"));
        runtime.block_on(provider.wait_for_calls(1));

        let aftermath = futures::executor::block_on(handle.outcome()).unwrap();
        assert_eq!(aftermath.session_id, "g1");
        assert_eq!(coordinator.state(&id), PrefetchState::Resolved { attempt: handle.attempt() });
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_provider_frees_the_slot() {
        struct Panics;

        #[async_trait::async_trait]
        impl AftermathProvider for Panics {
            async fn generate_aftermath(
                &self,
                _request: AftermathRequest,
            ) -> Result<Aftermath, crate::provider::ProviderError> {
                panic!("backend exploded")
            }
        }

        let coordinator = SummaryPrefetchCoordinator::new(Arc::new(Panics), Duration::from_secs(15), Handle::current());
        let handle = coordinator.start(request("g1"));

        assert!(matches!(handle.outcome().await, Err(PrefetchError::Provider(_))));
        assert_eq!(coordinator.state(&SessionId::from("g1")), PrefetchState::Idle);
    }
}
