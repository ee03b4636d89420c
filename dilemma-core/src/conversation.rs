//! Registry of live AI conversations, keyed by game session.
//!
//! Every AI turn a session takes runs inside one long-lived conversation on
//! the provider's side. The registry remembers which provider conversation
//! belongs to which session and forgets it once it is too old.
//!
//! Expiry happens two ways, both under the same lock and the same TTL:
//! - lazily, when [`ConversationRegistry::get`] (or `touch`) finds an expired
//!   record, which is deleted on the spot;
//! - eagerly, by a background sweep (see [`ConversationRegistry::spawn_sweeper`])
//!   that bounds memory held by sessions nobody reads again.

use crate::clock::{Clock, SystemClock};
use crate::config::{CoreConfig, ExpiryAnchor, MIN_SWEEP_INTERVAL};
use crate::id::SessionId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// AI provider that issued a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "gemini" | "google" => Ok(Provider::Gemini),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Built-in scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Athens,
    NorthAmerica,
    MarsColony,
}

/// What the session attached to its conversation when it was opened.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationMeta {
    #[default]
    None,
    /// One of the hand-authored scenarios.
    Predefined { scenario: Scenario, total_days: u32 },
    /// A role the player described themselves.
    Custom {
        role: String,
        setting: String,
        total_days: u32,
    },
}

/// One session's conversation handle plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub session_id: SessionId,
    pub provider_conversation_id: String,
    pub provider: Provider,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub turn_count: u32,
    pub meta: ConversationMeta,
}

/// Read-only snapshot of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub total: usize,
    pub count_by_provider: BTreeMap<Provider, usize>,
    /// Age of the oldest record by creation time.
    pub oldest_age: Option<Duration>,
}

/// Session id -> conversation map with bounded lifetime.
///
/// Cloning is cheap and every clone shares the same records.
#[derive(Clone)]
pub struct ConversationRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    records: Mutex<HashMap<SessionId, ConversationRecord>>,
    ttl: chrono::Duration,
    anchor: ExpiryAnchor,
    sweep_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl Inner {
    fn is_expired(&self, record: &ConversationRecord, now: DateTime<Utc>) -> bool {
        let anchor = match self.anchor {
            ExpiryAnchor::CreatedAt => record.created_at,
            ExpiryAnchor::LastUsedAt => record.last_used_at,
        };
        now.signed_duration_since(anchor) > self.ttl
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| !self.is_expired(record, now));
        before - records.len()
    }
}

impl ConversationRegistry {
    pub fn new(config: &CoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CoreConfig, clock: Arc<dyn Clock>) -> Self {
        let ttl = chrono::Duration::from_std(config.conversation_ttl)
            .unwrap_or_else(|_| chrono::Duration::weeks(52_000));
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(HashMap::new()),
                ttl,
                anchor: config.expiry_anchor,
                sweep_interval: config.sweep_interval.max(MIN_SWEEP_INTERVAL),
                clock,
            }),
        }
    }

    /// Record the conversation opened for `session_id`, replacing any
    /// previous one.
    pub fn store(
        &self,
        session_id: SessionId,
        provider_conversation_id: impl Into<String>,
        provider: Provider,
        meta: ConversationMeta,
    ) {
        let now = self.inner.clock.now();
        let record = ConversationRecord {
            session_id: session_id.clone(),
            provider_conversation_id: provider_conversation_id.into(),
            provider,
            created_at: now,
            last_used_at: now,
            turn_count: 0,
            meta,
        };

        let replaced = self.inner.records.lock().insert(session_id.clone(), record);
        debug!(
            session_id = %session_id,
            provider = %provider,
            replaced = replaced.is_some(),
            "stored conversation"
        );
    }

    /// Look up a session's conversation. An expired record is deleted and
    /// reported as absent.
    pub fn get(&self, session_id: &SessionId) -> Option<ConversationRecord> {
        let now = self.inner.clock.now();
        let mut records = self.inner.records.lock();

        let expired = self.inner.is_expired(records.get(session_id)?, now);
        if expired {
            records.remove(session_id);
            debug!(session_id = %session_id, "conversation expired on read");
            return None;
        }
        records.get(session_id).cloned()
    }

    /// Note one more turn on a live conversation. Unknown or expired ids are
    /// ignored. Under [`ExpiryAnchor::CreatedAt`] this does not extend the
    /// record's lifetime.
    pub fn touch(&self, session_id: &SessionId) {
        let now = self.inner.clock.now();
        let mut records = self.inner.records.lock();

        let Some(record) = records.get_mut(session_id) else {
            return;
        };
        if self.inner.is_expired(record, now) {
            records.remove(session_id);
            debug!(session_id = %session_id, "conversation expired on touch");
            return;
        }
        record.last_used_at = now;
        record.turn_count = record.turn_count.saturating_add(1);
    }

    /// Forget a session's conversation. Returns whether one was stored.
    pub fn remove(&self, session_id: &SessionId) -> bool {
        let existed = self.inner.records.lock().remove(session_id).is_some();
        if existed {
            debug!(session_id = %session_id, "removed conversation");
        }
        existed
    }

    /// Counts and ages of everything currently held, expired or not.
    pub fn stats(&self) -> RegistryStats {
        let now = self.inner.clock.now();
        let records = self.inner.records.lock();

        let mut stats = RegistryStats {
            total: records.len(),
            ..RegistryStats::default()
        };
        for record in records.values() {
            *stats.count_by_provider.entry(record.provider).or_insert(0) += 1;
            let age = now
                .signed_duration_since(record.created_at)
                .to_std()
                .unwrap_or_default();
            stats.oldest_age = Some(stats.oldest_age.map_or(age, |oldest| oldest.max(age)));
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every expired record now. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.inner.sweep();
        if removed > 0 {
            info!(removed, "swept expired conversations");
        }
        removed
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `sweep_interval` on
    /// the current tokio runtime.
    ///
    /// The task stops when the returned handle is dropped or when the last
    /// clone of the registry goes away.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.sweep_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("registry dropped, stopping sweeper");
                    break;
                };
                let removed = inner.sweep();
                if removed > 0 {
                    info!(removed, "swept expired conversations");
                }
            }
        });

        SweeperHandle { task }
    }
}

/// Owns the background sweep task; dropping it stops the sweep.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
