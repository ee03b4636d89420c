//! Power distribution between the factions of a scenario.
//!
//! A [`PowerAllocation`] is an ordered list of named shares whose percentages
//! always total exactly 100. Every operation returns a new allocation; the
//! caller keeps whichever copy it wants (typically the current one plus a
//! baseline captured when the session was configured).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Total every allocation sums to.
pub const TOTAL_PERCENT: u32 = 100;

/// Errors from constructing an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("An allocation needs at least one share")]
    Empty,

    #[error("Share {id} has percent {percent}, above 100")]
    PercentOutOfRange { id: ShareId, percent: u8 },

    #[error("Shares total {total}, expected 100")]
    BadTotal { total: u32 },
}

/// Stable identifier of a share (e.g. `"demos"`, `"council"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShareId(String);

impl ShareId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One faction's stake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerShare {
    pub id: ShareId,
    pub label: String,
    pub percent: u8,
}

impl PowerShare {
    pub fn new(id: impl Into<String>, label: impl Into<String>, percent: u8) -> Self {
        Self {
            id: ShareId::new(id),
            label: label.into(),
            percent,
        }
    }
}

/// Ordered set of shares summing to 100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PowerShare>", into = "Vec<PowerShare>")]
pub struct PowerAllocation {
    shares: Vec<PowerShare>,
}

impl PowerAllocation {
    /// Build an allocation from externally supplied shares.
    pub fn new(shares: Vec<PowerShare>) -> Result<Self, AllocationError> {
        if shares.is_empty() {
            return Err(AllocationError::Empty);
        }
        if let Some(share) = shares.iter().find(|s| s.percent > 100) {
            return Err(AllocationError::PercentOutOfRange {
                id: share.id.clone(),
                percent: share.percent,
            });
        }
        let total = sum(&shares);
        if total != TOTAL_PERCENT {
            return Err(AllocationError::BadTotal { total });
        }
        Ok(Self { shares })
    }

    pub fn shares(&self) -> &[PowerShare] {
        &self.shares
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn total(&self) -> u32 {
        sum(&self.shares)
    }

    pub fn get(&self, index: usize) -> Option<&PowerShare> {
        self.shares.get(index)
    }

    pub fn position(&self, id: &ShareId) -> Option<usize> {
        self.shares.iter().position(|s| &s.id == id)
    }

    /// Set one share and rescale the others to fill what is left.
    ///
    /// The requested value is clamped to 0..=100 and rounded (NaN counts as
    /// 0). The other shares are multiplied by `remaining / others_before`,
    /// rounded, and then nudged one unit at a time, left to right and
    /// skipping the edited share, until the total is exactly 100. When the
    /// others were all zero they start from zero and only the nudging pass
    /// fills the remainder. An out-of-range index returns an unchanged copy.
    pub fn set_share(&self, index: usize, new_percent: f64) -> Self {
        let mut next = self.clone();
        if index >= next.shares.len() {
            return next;
        }

        let value = clamp_percent(new_percent);
        let remaining = TOTAL_PERCENT - u32::from(value);
        let others_before: u32 = next
            .shares
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, s)| u32::from(s.percent))
            .sum();

        next.shares[index].percent = value;

        if others_before == 0 {
            for (i, share) in next.shares.iter_mut().enumerate() {
                if i != index {
                    share.percent = 0;
                }
            }
        } else {
            let factor = f64::from(remaining) / f64::from(others_before);
            for (i, share) in next.shares.iter_mut().enumerate() {
                if i != index {
                    share.percent = clamp_percent(f64::from(share.percent) * factor);
                }
            }
        }

        next.correct_drift(index);
        next
    }

    /// Replace the label of one share. Percentages and order are untouched.
    pub fn rename(&self, index: usize, label: impl Into<String>) -> Self {
        let mut next = self.clone();
        if let Some(share) = next.shares.get_mut(index) {
            share.label = label.into();
        }
        next
    }

    /// Undo every edit by returning a copy of the captured baseline.
    pub fn reset_to_baseline(&self, baseline: &PowerAllocation) -> Self {
        baseline.clone()
    }

    /// Shares in display order: descending percent, ties kept in list order.
    ///
    /// The model itself never reorders; callers re-sort after each edit.
    pub fn sorted_by_percent(&self) -> Vec<PowerShare> {
        let mut sorted = self.shares.clone();
        sorted.sort_by(|a, b| b.percent.cmp(&a.percent));
        sorted
    }

    fn correct_drift(&mut self, edited: usize) {
        if self.shares.len() == 1 {
            self.shares[0].percent = TOTAL_PERCENT as u8;
            return;
        }

        let mut diff = TOTAL_PERCENT as i32 - self.total() as i32;
        while diff != 0 {
            let mut moved = false;
            for (i, share) in self.shares.iter_mut().enumerate() {
                if diff == 0 {
                    break;
                }
                if i == edited {
                    continue;
                }
                if diff > 0 && share.percent < 100 {
                    share.percent += 1;
                    diff -= 1;
                    moved = true;
                } else if diff < 0 && share.percent > 0 {
                    share.percent -= 1;
                    diff += 1;
                    moved = true;
                }
            }
            if !moved {
                // Unreachable for a valid allocation; keep the total exact anyway.
                let share = &mut self.shares[edited];
                share.percent = (i32::from(share.percent) + diff).clamp(0, 100) as u8;
                break;
            }
        }
    }
}

impl TryFrom<Vec<PowerShare>> for PowerAllocation {
    type Error = AllocationError;

    fn try_from(shares: Vec<PowerShare>) -> Result<Self, Self::Error> {
        Self::new(shares)
    }
}

impl From<PowerAllocation> for Vec<PowerShare> {
    fn from(allocation: PowerAllocation) -> Self {
        allocation.shares
    }
}

fn sum(shares: &[PowerShare]) -> u32 {
    shares.iter().map(|s| u32::from(s.percent)).sum()
}

fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn athens() -> PowerAllocation {
        PowerAllocation::new(vec![
            PowerShare::new("assembly", "Assembly", 60),
            PowerShare::new("council", "Council", 25),
            PowerShare::new("generals", "Generals", 15),
        ])
        .unwrap()
    }

    fn percents(allocation: &PowerAllocation) -> Vec<u8> {
        allocation.shares().iter().map(|s| s.percent).collect()
    }

    #[test]
    fn test_new_validates_total() {
        assert_eq!(PowerAllocation::new(vec![]), Err(AllocationError::Empty));
        assert_eq!(
            PowerAllocation::new(vec![
                PowerShare::new("a", "A", 50),
                PowerShare::new("b", "B", 40),
            ]),
            Err(AllocationError::BadTotal { total: 90 })
        );
        assert!(matches!(
            PowerAllocation::new(vec![PowerShare::new("a", "A", 101)]),
            Err(AllocationError::PercentOutOfRange { .. })
        ));
    }

    #[test]
    fn test_proportional_redistribution() {
        let next = athens().set_share(0, 40.0);
        assert_eq!(percents(&next), vec![40, 37, 23]);
        assert_eq!(next.total(), 100);
    }

    #[test]
    fn test_set_share_clamps_and_rounds() {
        let next = athens().set_share(1, 140.0);
        assert_eq!(percents(&next), vec![0, 100, 0]);

        let next = athens().set_share(1, -12.0);
        assert_eq!(next.shares()[1].percent, 0);
        assert_eq!(next.total(), 100);

        let next = athens().set_share(2, 32.6);
        assert_eq!(next.shares()[2].percent, 33);
        assert_eq!(next.total(), 100);

        let next = athens().set_share(2, f64::NAN);
        assert_eq!(next.shares()[2].percent, 0);
        assert_eq!(next.total(), 100);
    }

    #[test]
    fn test_full_share_zeroes_everyone_else() {
        let next = athens().set_share(2, 100.0);
        assert_eq!(percents(&next), vec![0, 0, 100]);
    }

    #[test]
    fn test_zero_pool_does_not_divide_by_zero() {
        let monopoly = PowerAllocation::new(vec![
            PowerShare::new("tyrant", "Tyrant", 100),
            PowerShare::new("demos", "Demos", 0),
            PowerShare::new("oligarchs", "Oligarchs", 0),
        ])
        .unwrap();

        let unchanged = monopoly.set_share(0, 100.0);
        assert_eq!(percents(&unchanged), vec![100, 0, 0]);

        let next = monopoly.set_share(0, 40.0);
        assert_eq!(next.shares()[0].percent, 40);
        assert_eq!(percents(&next), vec![40, 30, 30]);
    }

    #[test]
    fn test_drift_correction_skips_edited_share() {
        let even = PowerAllocation::new(vec![
            PowerShare::new("a", "A", 34),
            PowerShare::new("b", "B", 33),
            PowerShare::new("c", "C", 33),
        ])
        .unwrap();

        let next = even.set_share(1, 51.0);
        assert_eq!(next.shares()[1].percent, 51);
        assert_eq!(next.total(), 100);
    }

    #[test]
    fn test_single_share_is_always_whole() {
        let solo = PowerAllocation::new(vec![PowerShare::new("crown", "Crown", 100)]).unwrap();
        assert_eq!(percents(&solo.set_share(0, 30.0)), vec![100]);
    }

    #[test]
    fn test_out_of_range_index_is_noop() {
        let allocation = athens();
        assert_eq!(allocation.set_share(7, 10.0), allocation);
        assert_eq!(allocation.rename(7, "Nobody"), allocation);
    }

    #[test]
    fn test_rename_keeps_percentages() {
        let renamed = athens().rename(1, "Boule");
        assert_eq!(renamed.shares()[1].label, "Boule");
        assert_eq!(percents(&renamed), percents(&athens()));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let baseline = athens();
        let edited = baseline.set_share(0, 10.0).rename(2, "Strategoi");

        let once = edited.reset_to_baseline(&baseline);
        let twice = once.reset_to_baseline(&baseline);
        assert_eq!(once, baseline);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_sorted_by_percent() {
        let next = athens().set_share(2, 70.0);
        let order: Vec<_> = next
            .sorted_by_percent()
            .into_iter()
            .map(|s| s.id.as_str().to_string())
            .collect();
        assert_eq!(order, vec!["generals", "assembly", "council"]);
    }

    #[test]
    fn test_serde_rejects_bad_total() {
        let json = r#"[{"id":"a","label":"A","percent":70},{"id":"b","label":"B","percent":20}]"#;
        assert!(serde_json::from_str::<PowerAllocation>(json).is_err());

        let round = serde_json::to_string(&athens()).unwrap();
        assert_eq!(serde_json::from_str::<PowerAllocation>(&round).unwrap(), athens());
    }

    fn allocation_strategy() -> impl Strategy<Value = PowerAllocation> {
        prop::collection::vec(0u8..=25, 0..4).prop_map(|others| {
            let rest: u32 = others.iter().map(|p| u32::from(*p)).sum();
            let mut shares = vec![PowerShare::new("s0", "S0", (100 - rest) as u8)];
            for (i, p) in others.into_iter().enumerate() {
                shares.push(PowerShare::new(format!("s{}", i + 1), "", p));
            }
            PowerAllocation::new(shares).unwrap()
        })
    }

    proptest! {
        #[test]
        fn prop_every_edit_sums_to_100(
            start in allocation_strategy(),
            edits in prop::collection::vec((0usize..6, -50.0f64..150.0), 1..20),
        ) {
            let mut current = start;
            for (index, value) in edits {
                current = current.set_share(index, value);
                prop_assert_eq!(current.total(), 100);
                if index < current.len() && current.len() > 1 {
                    prop_assert_eq!(
                        current.shares()[index].percent,
                        value.clamp(0.0, 100.0).round() as u8
                    );
                }
            }
        }
    }
}
