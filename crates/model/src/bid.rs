//! Bids and their total order.

use {
    crate::{money::Money, AuctionId, BidId, PartyRef, RegistrationId},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::cmp::Ordering,
};

/// A placed bid. Immutable once created except for the `cancelled` flag and
/// the derived `autobid` flag.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Bid {
    pub id: BidId,
    pub auction: AuctionId,
    pub registration: RegistrationId,
    pub bidder: PartyRef,
    pub price: Money,
    /// Hidden proxy limit. When present it is `>= price` and the engine may
    /// raise the bidder's position up to it automatically.
    pub max_price: Option<Money>,
    pub created_at: DateTime<Utc>,
    pub cancelled: bool,
    /// Whether this bid was synthesized by the engine during a proxy duel
    /// rather than placed by the bidder directly.
    pub autobid: bool,
}

impl Bid {
    /// Cancelled bids stay on record for audit but never participate in
    /// price computations.
    pub fn live(&self) -> bool {
        !self.cancelled
    }

    /// The highest price this bid can be raised to: its proxy limit, or its
    /// placed price when no limit was given.
    pub fn ceiling(&self) -> Money {
        self.max_price.unwrap_or(self.price)
    }

    /// Whether this bid's limit can still push above `price`.
    pub fn has_headroom_above(&self, price: Money) -> bool {
        self.ceiling() > price
    }

    /// The total order on bids: higher price first, then earlier placement,
    /// then lower id. An earlier bid beats a later one at equal price, which
    /// is what makes proxy-duel ties deterministic.
    pub fn ranking(&self, other: &Self) -> Ordering {
        other
            .price
            .cmp(&self.price)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.id.cmp(&other.id))
    }
}

/// The best live bid according to the total order, if any.
pub fn leading<'a>(bids: impl IntoIterator<Item = &'a Bid>) -> Option<&'a Bid> {
    bids.into_iter()
        .filter(|bid| bid.live())
        .min_by(|a, b| a.ranking(b))
}
