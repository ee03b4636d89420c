//! GameSession - one player's playthrough.
//!
//! Holds the power allocation (plus the baseline it can be reset to), the
//! support trackers, the day counter, and the session phase. The phase only
//! moves forward: once a session has collapsed or completed, every mutation
//! is refused.

use crate::config::CoreConfig;
use crate::id::SessionId;
use crate::power::{PowerAllocation, PowerShare};
use crate::support::{SupportTracks, Track};
use dilemma_client::AftermathRequest;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;

/// Errors from GameSession operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session collapsed on day {day}; no further changes are accepted")]
    Collapsed { day: u32 },

    #[error("Session already completed all {total_days} days")]
    Completed { total_days: u32 },
}

/// Configuration for a new session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The role the player is cast into.
    pub role: String,

    /// Number of days before the aftermath.
    pub total_days: u32,

    /// Language the aftermath is written in.
    pub language: String,

    /// Ask the backend for debug output.
    pub debug: bool,
}

impl SessionConfig {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            total_days: 7,
            language: "en".to_string(),
            debug: false,
        }
    }

    /// At least one day.
    pub fn with_total_days(mut self, days: u32) -> Self {
        self.total_days = days.max(1);
        self
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

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    Active,
    /// Every tracker fell below the collapse threshold. Terminal.
    Collapsed { day: u32 },
    /// The last day was played. Terminal.
    Completed,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionPhase::Active)
    }
}

/// A single playthrough.
#[derive(Debug, Clone)]
pub struct GameSession {
    id: SessionId,
    config: SessionConfig,
    collapse_threshold: u8,
    baseline: PowerAllocation,
    allocation: PowerAllocation,
    support: SupportTracks,
    day: u32,
    phase: SessionPhase,
}

impl GameSession {
    /// Start a session on day 1 from scenario baselines.
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        allocation: PowerAllocation,
        support: SupportTracks,
        core: &CoreConfig,
    ) -> Self {
        Self {
            id,
            config,
            collapse_threshold: core.collapse_threshold,
            baseline: allocation.clone(),
            allocation,
            support,
            day: 1,
            phase: SessionPhase::Active,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn allocation(&self) -> &PowerAllocation {
        &self.allocation
    }

    pub fn baseline(&self) -> &PowerAllocation {
        &self.baseline
    }

    pub fn support(&self) -> SupportTracks {
        self.support
    }

    /// Shares in the order they are displayed.
    pub fn displayed_shares(&self) -> Vec<PowerShare> {
        self.allocation.sorted_by_percent()
    }

    /// Set one share; the rest rescale so the total stays 100.
    pub fn edit_share(&mut self, index: usize, percent: f64) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.allocation = self.allocation.set_share(index, percent);
        Ok(())
    }

    pub fn rename_share(&mut self, index: usize, label: impl Into<String>) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.allocation = self.allocation.rename(index, label);
        Ok(())
    }

    /// Undo every allocation edit made this session.
    pub fn reset_allocation(&mut self) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.allocation = self.allocation.reset_to_baseline(&self.baseline);
        Ok(())
    }

    /// Apply the day's support changes, then advance the day.
    ///
    /// Collapse is checked after the deltas land and wins over completion.
    pub fn end_day(&mut self, deltas: &[(Track, i32)]) -> Result<SessionPhase, SessionError> {
        self.ensure_active()?;

        for (track, delta) in deltas {
            self.support = self.support.apply_delta(*track, *delta);
        }

        if self.support.is_collapsed(self.collapse_threshold) {
            self.phase = SessionPhase::Collapsed { day: self.day };
            info!(session_id = %self.id, day = self.day, "session collapsed");
        } else if self.day >= self.config.total_days {
            self.phase = SessionPhase::Completed;
            info!(session_id = %self.id, day = self.day, "session completed");
        } else {
            self.day += 1;
        }

        Ok(self.phase)
    }

    /// Snapshot of what the aftermath is written about.
    pub fn player_state(&self) -> serde_json::Value {
        json!({
            "role": self.config.role,
            "day": self.day,
            "totalDays": self.config.total_days,
            "phase": self.phase,
            "power": self.displayed_shares(),
            "support": self.support,
        })
    }

    /// Request for the aftermath as the session stands right now.
    pub fn aftermath_request(&self) -> AftermathRequest {
        AftermathRequest::new(self.id.as_str(), self.player_state())
            .with_language(self.config.language.clone())
            .with_debug(self.config.debug)
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Active => Ok(()),
            SessionPhase::Collapsed { day } => Err(SessionError::Collapsed { day }),
            SessionPhase::Completed => Err(SessionError::Completed {
                total_days: self.config.total_days,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total_days: u32) -> GameSession {
        let allocation = PowerAllocation::new(vec![
            PowerShare::new("assembly", "Assembly", 60),
            PowerShare::new("council", "Council", 25),
            PowerShare::new("generals", "Generals", 15),
        ])
        .unwrap();
        GameSession::new(
            SessionId::from("g1"),
            SessionConfig::new("Strategos of Athens").with_total_days(total_days),
            allocation,
            SupportTracks::new(45, 30, 25),
            &CoreConfig::default(),
        )
    }

    #[test]
    fn test_session_config() {
        let config = SessionConfig::new("Governor")
            .with_total_days(0)
            .with_language("he")
            .with_debug(true);

        assert_eq!(config.role, "Governor");
        assert_eq!(config.total_days, 1);
        assert_eq!(config.language, "he");
        assert!(config.debug);
    }

    #[test]
    fn test_edit_and_reset() {
        let mut session = session(7);
        session.edit_share(0, 40.0).unwrap();
        session.rename_share(2, "Strategoi").unwrap();
        assert_eq!(session.allocation().total(), 100);
        assert_eq!(session.displayed_shares()[0].id.as_str(), "assembly");

        session.reset_allocation().unwrap();
        assert_eq!(session.allocation(), session.baseline());
    }

    #[test]
    fn test_collapse_is_terminal() {
        let mut session = session(7);
        let phase = session
            .end_day(&[
                (Track::People, -30),
                (Track::Counterpower, -15),
                (Track::PersonalAnchor, -10),
            ])
            .unwrap();

        assert_eq!(phase, SessionPhase::Collapsed { day: 1 });
        assert!(phase.is_terminal());
        assert_eq!(
            session.end_day(&[(Track::People, 50)]),
            Err(SessionError::Collapsed { day: 1 })
        );
        assert_eq!(session.edit_share(0, 10.0), Err(SessionError::Collapsed { day: 1 }));
        assert_eq!(session.support().people, 15);
    }

    #[test]
    fn test_completes_after_last_day() {
        let mut session = session(2);
        assert_eq!(session.end_day(&[]).unwrap(), SessionPhase::Active);
        assert_eq!(session.day(), 2);
        assert_eq!(session.end_day(&[(Track::People, 5)]).unwrap(), SessionPhase::Completed);
        assert!(matches!(session.end_day(&[]), Err(SessionError::Completed { total_days: 2 })));
    }

    #[test]
    fn test_aftermath_request_snapshot() {
        let mut session = session(7);
        session.edit_share(2, 50.0).unwrap();

        let request = session.aftermath_request();
        assert_eq!(request.session_id, "g1");
        assert_eq!(request.language, "en");
        assert_eq!(request.player_state["power"][0]["id"], "generals");
        assert_eq!(request.player_state["support"]["people"], 45);
        assert_eq!(request.player_state["phase"]["phase"], "active");
    }
}
