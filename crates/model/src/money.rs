//! Integer money in minor units of a single configured currency.

use serde::{Deserialize, Serialize};

/// An amount of money in minor units (e.g. cents). Auctions deal in a single
/// currency, so the unit is implicit and amounts stay exact integers.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Deserialize,
    Serialize,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::Sub,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    pub const ZERO: Self = Self(0);

    /// Rounds to the nearest multiple of `unit` with round-half-up
    /// semantics: `(value + unit / 2) div unit * unit`.
    pub fn rounded_to(self, unit: Money) -> Money {
        if unit.0 <= 1 {
            return self;
        }
        Money((self.0 + unit.0 / 2).div_euclid(unit.0) * unit.0)
    }

    /// Whether the amount is already a multiple of `unit`, i.e. rounding it
    /// would leave it unchanged.
    pub fn is_aligned_to(self, unit: Money) -> bool {
        self.rounded_to(unit) == self
    }
}
