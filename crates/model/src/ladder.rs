//! Tiered minimum-increment ladder: maps a current price to the smallest
//! allowed increase for the next bid.

use {
    crate::money::Money,
    serde::{Deserialize, Serialize},
};

/// Increment used when no ladder step covers a price.
pub const DEFAULT_INCREMENT: Money = Money(1);

/// One price range of the ladder. Ranges are half-open
/// `[lower_bound, upper_bound)`; the final range has no upper bound.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LadderStep {
    pub lower_bound: Money,
    pub upper_bound: Option<Money>,
    pub increment: Money,
}

impl LadderStep {
    fn contains(&self, price: Money) -> bool {
        price >= self.lower_bound && self.upper_bound.is_none_or(|upper| price < upper)
    }
}

/// Ordered, disjoint price ranges each mapping to a minimum increment.
///
/// The increment for a bid is looked up by the price the auction currently
/// stands at, not by the candidate's price: a bid may jump several ranges
/// and the next minimum is then derived from the range the new price lands
/// in.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct IncrementLadder {
    steps: Vec<LadderStep>,
}

impl IncrementLadder {
    /// Builds a ladder from `(threshold, increment)` pairs. Thresholds are
    /// sorted ascending and each range ends where the next one begins; the
    /// highest threshold opens the final unbounded range.
    ///
    /// The caller is responsible for rejecting duplicate thresholds before
    /// calling this (see the engine's configuration loader).
    pub fn from_thresholds(mut pairs: Vec<(Money, Money)>) -> Self {
        pairs.sort_by_key(|(threshold, _)| *threshold);
        let uppers = pairs
            .iter()
            .skip(1)
            .map(|(threshold, _)| Some(*threshold))
            .chain(std::iter::once(None))
            .collect::<Vec<_>>();
        let steps = pairs
            .into_iter()
            .zip(uppers)
            .map(|((lower_bound, increment), upper_bound)| LadderStep {
                lower_bound,
                upper_bound,
                increment,
            })
            .collect();
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The minimum increase on top of `price` for the next bid.
    pub fn increment_for(&self, price: Money) -> Money {
        self.steps
            .iter()
            .find(|step| step.contains(price))
            .map(|step| step.increment)
            .unwrap_or(DEFAULT_INCREMENT)
    }

    /// The smallest price a new bid must reach given the current `price`.
    pub fn next_minimum_bid(&self, price: Money) -> Money {
        price + self.increment_for(price)
    }
}
