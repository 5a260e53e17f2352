//! Rank type for ordering siblings using midpoint insertion.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Distance between neighbours after renormalization, and the step used when
/// appending past either end of a sibling set.
pub const RANK_SPACING: i64 = 1024;

/// Ordering value of a column among its board's columns, or of a task among
/// its column's tasks.
///
/// Ranks are fixed-point integers. Inserting between two neighbours takes the
/// midpoint, so untouched siblings keep their ranks. When two neighbours are
/// adjacent integers there is no midpoint left and the sibling set has to be
/// renormalized with [`Rank::spaced`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(i64);

impl Rank {
    /// Wrap a raw rank value
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Rank given to the first entity of an empty sibling set
    pub const fn initial() -> Self {
        Self(RANK_SPACING)
    }

    /// The raw rank value
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Rank for a slot between `before` and `after`.
    ///
    /// `None` on either side means the slot is at that end of the sequence.
    /// Returns `None` when there is no room: the neighbours differ by less
    /// than 2, or stepping past an end would overflow.
    pub fn between(before: Option<Rank>, after: Option<Rank>) -> Option<Rank> {
        match (before, after) {
            (None, None) => Some(Self::initial()),
            (Some(b), None) => b.0.checked_add(RANK_SPACING).map(Self),
            (None, Some(a)) => a.0.checked_sub(RANK_SPACING).map(Self),
            (Some(b), Some(a)) => {
                let (lo, hi) = (i128::from(b.0), i128::from(a.0));
                if hi - lo < 2 {
                    return None;
                }
                // lo < mid < hi, so the midpoint always fits back in i64
                i64::try_from(lo + (hi - lo) / 2).ok().map(Self)
            }
        }
    }

    /// Evenly spaced ranks for a sibling set of `count` entities.
    pub fn spaced(count: usize) -> impl Iterator<Item = Rank> {
        (1..=count as i64).map(|i| Self(i * RANK_SPACING))
    }
}

impl Default for Rank {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Rank {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_initial() {
        assert_eq!(Rank::between(None, None), Some(Rank::initial()));
    }

    #[test]
    fn test_rank_between_is_midpoint() {
        let mid = Rank::between(Some(Rank::new(0)), Some(Rank::new(1024))).unwrap();
        assert_eq!(mid.value(), 512);
    }

    #[test]
    fn test_rank_before_first_and_after_last() {
        let first = Rank::new(1);
        let before = Rank::between(None, Some(first)).unwrap();
        assert!(before < first);

        let after = Rank::between(Some(first), None).unwrap();
        assert!(after > first);
    }

    #[test]
    fn test_rank_no_room_between_adjacent() {
        assert!(Rank::between(Some(Rank::new(1)), Some(Rank::new(2))).is_none());
        assert!(Rank::between(Some(Rank::new(5)), Some(Rank::new(5))).is_none());
        assert!(Rank::between(Some(Rank::new(1)), Some(Rank::new(3))).is_some());
    }

    #[test]
    fn test_rank_edges_overflow() {
        assert!(Rank::between(Some(Rank::new(i64::MAX)), None).is_none());
        assert!(Rank::between(None, Some(Rank::new(i64::MIN))).is_none());
        let wide = Rank::between(Some(Rank::new(i64::MIN)), Some(Rank::new(i64::MAX))).unwrap();
        assert!(wide > Rank::new(i64::MIN) && wide < Rank::new(i64::MAX));
    }

    #[test]
    fn test_rank_spaced() {
        let ranks: Vec<i64> = Rank::spaced(3).map(Rank::value).collect();
        assert_eq!(ranks, vec![1024, 2048, 3072]);
    }
}
