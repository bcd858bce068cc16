//! Auctions and their lifecycle states.

use {
    crate::{ladder::IncrementLadder, money::Money, AuctionId, PartyRef},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    strum::{Display, EnumString},
};

/// The authoritative states an auction passes through.
///
/// `offered -> accepted -> in_sale -> bidding_ended` is the happy path;
/// the result then splits on whether the reserve was met. `refused`,
/// `cancelled`, `sold` and `not_sold` are terminal.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuctionState {
    #[default]
    Offered,
    Accepted,
    Refused,
    Cancelled,
    InSale,
    BiddingEnded,
    AuctionedSuccessfully,
    AuctionedUnsuccessfully,
    Sold,
    NotSold,
}

impl AuctionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Refused | Self::Cancelled | Self::Sold | Self::NotSold
        )
    }
}

/// One sale item under auction rules. Owned by an external seller entity;
/// exclusively owns its bids through bidder registrations.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Auction {
    pub id: AuctionId,
    pub seller: PartyRef,
    pub item: PartyRef,
    pub state: AuctionState,

    pub offered_price: Money,
    /// The price a bidder would pay if the auction closed now. Unset until
    /// the sale starts.
    pub current_price: Option<Money>,
    /// Optional floor below which a win is not considered successful.
    pub reserve_price: Option<Money>,

    /// The originally announced deadline.
    pub ends_at: DateTime<Utc>,
    /// The live deadline. Reset to `ends_at` when the sale starts and only
    /// ever moved later afterwards, by anti-snipe extensions.
    pub currently_ends_at: Option<DateTime<Utc>>,

    /// Per-auction increment ladder. Empty means the engine's configured
    /// default ladder applies.
    #[serde(default)]
    pub increment_ladder: IncrementLadder,
    /// Per-auction anti-snipe window override; falls back to the pack
    /// override and then the global configuration.
    #[serde(default, with = "humantime_serde")]
    pub prolonging_window: Option<std::time::Duration>,
    /// Sales-pack membership, used for pack-level configuration overrides.
    pub pack: Option<String>,

    pub applied_bid_count: u64,
    /// The winner frozen at `close_bidding`; while bidding runs the winner
    /// is always derived from the live bids instead.
    pub winner: Option<PartyRef>,
    pub sold_price: Option<Money>,

    /// Disables automatic closing; such an auction is closed explicitly by
    /// an operator after bidding has been locked.
    pub must_be_closed_manually: bool,
    /// Evaluate the result immediately when bidding closes.
    pub auto_finalize: bool,

    /// When set, new bids are frozen without closing the auction.
    pub bidding_locked_at: Option<DateTime<Utc>>,
    pub bidding_locked_by: Option<PartyRef>,
}

impl Auction {
    /// Whether new bids may currently be applied.
    pub fn open_for_bids(&self) -> bool {
        self.state == AuctionState::InSale && !self.bidding_locked()
    }

    pub fn bidding_locked(&self) -> bool {
        self.bidding_locked_at.is_some()
    }

    /// Whether the bidding outcome counts as a successful sale: at least one
    /// applied bid and a current price at or above the reserve. Only
    /// meaningful once bidding has ended.
    pub fn success(&self) -> bool {
        self.applied_bid_count > 0
            && self.current_price.unwrap_or(Money::ZERO)
                >= self.reserve_price.unwrap_or(Money::ZERO)
    }

    /// The live deadline, defaulting to the announced one before the sale
    /// has started.
    pub fn effective_deadline(&self) -> DateTime<Utc> {
        self.currently_ends_at.unwrap_or(self.ends_at)
    }

    /// Pushes the live deadline to `until` if that is later. Returns whether
    /// anything moved; the deadline never shortens.
    pub fn extend_deadline(&mut self, until: DateTime<Utc>) -> bool {
        if until > self.effective_deadline() {
            self.currently_ends_at = Some(until);
            true
        } else {
            false
        }
    }
}

/// Convenience constructor used by tests and hosts seeding new auctions.
impl Auction {
    pub fn offered(
        id: AuctionId,
        seller: PartyRef,
        item: PartyRef,
        offered_price: Money,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            seller,
            item,
            state: AuctionState::Offered,
            offered_price,
            current_price: None,
            reserve_price: None,
            ends_at,
            currently_ends_at: None,
            increment_ladder: IncrementLadder::default(),
            prolonging_window: None,
            pack: None,
            applied_bid_count: 0,
            winner: None,
            sold_price: None,
            must_be_closed_manually: false,
            auto_finalize: false,
            bidding_locked_at: None,
            bidding_locked_by: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::{Duration, TimeZone},
    };

    fn auction() -> Auction {
        Auction::offered(
            AuctionId(1),
            PartyRef::new("user", 1),
            PartyRef::new("item", 1),
            Money(1000),
            Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn state_string_forms() {
        assert_eq!(AuctionState::InSale.to_string(), "in_sale");
        assert_eq!(
            "bidding_ended".parse::<AuctionState>().unwrap(),
            AuctionState::BiddingEnded
        );
    }

    #[test]
    fn success_requires_bids_and_reserve() {
        let mut auction = auction();
        auction.current_price = Some(Money(1500));
        assert!(!auction.success(), "no applied bids");

        auction.applied_bid_count = 2;
        assert!(auction.success(), "no reserve means any price wins");

        auction.reserve_price = Some(Money(2000));
        assert!(!auction.success(), "price below reserve");

        auction.current_price = Some(Money(2000));
        assert!(auction.success(), "price at reserve");
    }

    #[test]
    fn deadline_only_extends_forward() {
        let mut auction = auction();
        auction.currently_ends_at = Some(auction.ends_at);

        let earlier = auction.ends_at - Duration::seconds(60);
        assert!(!auction.extend_deadline(earlier));
        assert_eq!(auction.effective_deadline(), auction.ends_at);

        let later = auction.ends_at + Duration::seconds(60);
        assert!(auction.extend_deadline(later));
        assert_eq!(auction.effective_deadline(), later);
    }

    #[test]
    fn locked_auction_is_not_open_for_bids() {
        let mut auction = auction();
        auction.state = AuctionState::InSale;
        assert!(auction.open_for_bids());
        auction.bidding_locked_at = Some(auction.ends_at);
        assert!(!auction.open_for_bids());
    }

    #[test]
    fn auction_serde_roundtrip() {
        let mut auction = auction();
        auction.prolonging_window = Some(std::time::Duration::from_secs(120));
        let json = serde_json::to_value(&auction).unwrap();
        assert_eq!(serde_json::from_value::<Auction>(json).unwrap(), auction);
    }
}
