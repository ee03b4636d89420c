//! Session lifecycle core for the Dilemma political narrative game.
//!
//! This crate provides:
//! - `PowerAllocation`: faction shares that always total exactly 100
//! - `SupportTracks`: three constituencies and the collapse check
//! - `ConversationRegistry`: session -> AI conversation map with expiry
//! - `SummaryPrefetchCoordinator`: at most one aftermath request per session
//!
//! # Quick Start
//!
//! ```ignore
//! use dilemma_core::{
//!     AftermathProvider, CoreConfig, GameSession, PowerAllocation, PowerShare,
//!     SessionConfig, SessionId, SummaryPrefetchCoordinator, SupportTracks, Track,
//! };
//! use std::sync::Arc;
//! use tokio::runtime::Handle;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let core = CoreConfig::from_env()?;
//!     let allocation = PowerAllocation::new(vec![
//!         PowerShare::new("assembly", "Assembly", 60),
//!         PowerShare::new("council", "Council", 40),
//!     ])?;
//!     let mut session = GameSession::new(
//!         SessionId::generate(),
//!         SessionConfig::new("Strategos of Athens"),
//!         allocation,
//!         SupportTracks::new(60, 55, 70),
//!         &core,
//!     );
//!
//!     session.end_day(&[(Track::People, -10)])?;
//!
//!     let provider = Arc::new(dilemma_client::Client::from_env()?);
//!     let prefetch = SummaryPrefetchCoordinator::new(provider, core.request_timeout, Handle::current());
//!     let aftermath = prefetch.start(session.aftermath_request()).outcome().await?;
//!     println!("{}", aftermath.narrative);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod conversation;
pub mod id;
pub mod power;
pub mod prefetch;
pub mod provider;
pub mod session;
pub mod support;
pub mod testing;

// Primary public API
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, CoreConfig, ExpiryAnchor, MIN_SWEEP_INTERVAL};
pub use conversation::{
    ConversationMeta, ConversationRecord, ConversationRegistry, Provider, RegistryStats, Scenario,
    SweeperHandle,
};
pub use dilemma_client::{Aftermath, AftermathRequest};
pub use id::SessionId;
pub use power::{AllocationError, PowerAllocation, PowerShare, ShareId};
pub use prefetch::{
    PrefetchError, PrefetchHandle, PrefetchOutcome, PrefetchState, SummaryPrefetchCoordinator,
};
pub use provider::{provider_from_env, AftermathProvider, ProviderError};
pub use session::{GameSession, SessionConfig, SessionError, SessionPhase};
pub use support::{SupportTracks, Track};
pub use testing::{MockOutcome, MockProvider};
