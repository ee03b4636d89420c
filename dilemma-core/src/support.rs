//! Support among the player's three constituencies, and the collapse check.

use serde::{Deserialize, Serialize};

/// Upper bound of every tracker.
pub const MAX_SUPPORT: u8 = 100;

/// One of the three constituencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    /// The public at large.
    People,
    /// The institution that checks the player's power.
    Counterpower,
    /// The player's closest ally.
    PersonalAnchor,
}

impl Track {
    pub const ALL: [Track; 3] = [Track::People, Track::Counterpower, Track::PersonalAnchor];

    pub fn name(&self) -> &'static str {
        match self {
            Track::People => "People",
            Track::Counterpower => "Counterpower",
            Track::PersonalAnchor => "Personal Anchor",
        }
    }
}

/// Three independent 0..=100 trackers. Nothing ties them together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportTracks {
    pub people: u8,
    pub counterpower: u8,
    pub personal_anchor: u8,
}

impl SupportTracks {
    /// Scenario baselines, clamped to 100.
    pub fn new(people: u8, counterpower: u8, personal_anchor: u8) -> Self {
        Self {
            people: people.min(MAX_SUPPORT),
            counterpower: counterpower.min(MAX_SUPPORT),
            personal_anchor: personal_anchor.min(MAX_SUPPORT),
        }
    }

    pub fn get(&self, track: Track) -> u8 {
        match track {
            Track::People => self.people,
            Track::Counterpower => self.counterpower,
            Track::PersonalAnchor => self.personal_anchor,
        }
    }

    /// Add `delta` to one tracker, clamped to 0..=100.
    pub fn apply_delta(&self, track: Track, delta: i32) -> Self {
        let mut next = *self;
        let slot = match track {
            Track::People => &mut next.people,
            Track::Counterpower => &mut next.counterpower,
            Track::PersonalAnchor => &mut next.personal_anchor,
        };
        *slot = i32::from(*slot)
            .saturating_add(delta)
            .clamp(0, i32::from(MAX_SUPPORT)) as u8;
        next
    }

    /// True iff every tracker is strictly below `threshold`.
    ///
    /// Reaching this state is terminal for the session; nothing here stops a
    /// caller from mutating the trackers afterwards.
    pub fn is_collapsed(&self, threshold: u8) -> bool {
        Track::ALL.iter().all(|t| self.get(*t) < threshold)
    }
}

impl Default for SupportTracks {
    fn default() -> Self {
        Self::new(50, 50, 50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_COLLAPSE_THRESHOLD;

    #[test]
    fn test_apply_delta_clamps() {
        let tracks = SupportTracks::new(50, 60, 70);

        let up = tracks.apply_delta(Track::People, 80);
        assert_eq!(up.people, 100);
        assert_eq!(up.counterpower, 60);

        let down = tracks.apply_delta(Track::PersonalAnchor, -500);
        assert_eq!(down.personal_anchor, 0);

        let extreme = tracks.apply_delta(Track::Counterpower, i32::MIN);
        assert_eq!(extreme.counterpower, 0);
    }

    #[test]
    fn test_collapse_needs_all_three_below() {
        let threshold = DEFAULT_COLLAPSE_THRESHOLD;

        assert!(!SupportTracks::new(65, 55, 70).is_collapsed(threshold));
        assert!(SupportTracks::new(19, 5, 0).is_collapsed(threshold));

        let low = SupportTracks::new(10, 10, 10);
        assert!(low.is_collapsed(threshold));
        for track in Track::ALL {
            let recovered = low.apply_delta(track, 10);
            assert_eq!(recovered.get(track), 20);
            assert!(!recovered.is_collapsed(threshold), "{} at 20", track.name());
        }
    }

    #[test]
    fn test_default_is_not_collapsed() {
        assert!(!SupportTracks::default().is_collapsed(DEFAULT_COLLAPSE_THRESHOLD));
    }
}
