//! The auction lifecycle state machine.
//!
//! An explicit transition table keyed by (state, event) gates every state
//! change; events with guards or parameters run their checks before the
//! state shifts. Illegal (state, event) pairs are caller errors and raise,
//! unlike business rejections on the bid path.

use {
    crate::bidding::SaleResult,
    chrono::{DateTime, Utc},
    model::{
        auction::{Auction, AuctionState},
        money::Money,
        PartyRef,
    },
    strum::Display,
    thiserror::Error,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Event {
    AcceptOffer,
    RefuseOffer,
    Cancel,
    StartSale,
    CloseBidding,
    SoldInAuction,
    NotSoldInAuction,
    Sell,
    NotSell,
}

#[derive(Clone, Debug, Error)]
pub enum TransitionError {
    #[error("event {event} is not allowed in state {from}")]
    Illegal { from: AuctionState, event: Event },
    #[error("auction result does not match: {}", errors.join("; "))]
    InvalidResult { errors: Vec<String> },
    #[error("auction has a winner and cannot end unsold")]
    WinnerExists,
    #[error("manual close not authorized: {0}")]
    NotAuthorized(&'static str),
}

struct Transition {
    event: Event,
    from: &'static [AuctionState],
    to: AuctionState,
}

use AuctionState::*;

const TRANSITIONS: &[Transition] = &[
    Transition {
        event: Event::AcceptOffer,
        from: &[Offered],
        to: Accepted,
    },
    Transition {
        event: Event::RefuseOffer,
        from: &[Offered],
        to: Refused,
    },
    // Once bidding has started cancellation is forbidden; bidders'
    // expectations take precedence over the seller's.
    Transition {
        event: Event::Cancel,
        from: &[Offered, Accepted],
        to: Cancelled,
    },
    Transition {
        event: Event::StartSale,
        from: &[Accepted],
        to: InSale,
    },
    Transition {
        event: Event::CloseBidding,
        from: &[InSale],
        to: BiddingEnded,
    },
    Transition {
        event: Event::SoldInAuction,
        from: &[BiddingEnded],
        to: AuctionedSuccessfully,
    },
    Transition {
        event: Event::NotSoldInAuction,
        from: &[BiddingEnded],
        to: AuctionedUnsuccessfully,
    },
    Transition {
        event: Event::Sell,
        from: &[AuctionedSuccessfully],
        to: Sold,
    },
    Transition {
        event: Event::NotSell,
        from: &[AuctionedUnsuccessfully],
        to: NotSold,
    },
];

/// Moves the auction to the event's target state, or fails when the table
/// has no entry for the current state.
fn shift(auction: &mut Auction, event: Event) -> Result<(), TransitionError> {
    let transition = TRANSITIONS
        .iter()
        .find(|transition| transition.event == event && transition.from.contains(&auction.state))
        .ok_or(TransitionError::Illegal {
            from: auction.state,
            event,
        })?;
    tracing::info!(
        auction_id = %auction.id,
        from = %auction.state,
        to = %transition.to,
        %event,
        "auction transition"
    );
    auction.state = transition.to;
    Ok(())
}

pub fn accept_offer(auction: &mut Auction) -> Result<(), TransitionError> {
    shift(auction, Event::AcceptOffer)
}

pub fn refuse_offer(auction: &mut Auction) -> Result<(), TransitionError> {
    shift(auction, Event::RefuseOffer)
}

pub fn cancel(auction: &mut Auction) -> Result<(), TransitionError> {
    shift(auction, Event::Cancel)
}

/// Opens bidding: the current price starts at the asking price, the live
/// deadline at the announced one, and any stale result is cleared.
pub fn start_sale(auction: &mut Auction) -> Result<(), TransitionError> {
    shift(auction, Event::StartSale)?;
    auction.current_price = Some(auction.offered_price);
    auction.currently_ends_at = Some(auction.ends_at);
    auction.applied_bid_count = 0;
    auction.winner = None;
    auction.sold_price = None;
    Ok(())
}

/// Ends bidding and freezes the final price. The winner is frozen only when
/// the sale actually succeeded (bids were applied and the reserve, if any,
/// was met); an unsuccessful auction ends without one.
pub fn close_bidding(auction: &mut Auction, result: &SaleResult) -> Result<(), TransitionError> {
    shift(auction, Event::CloseBidding)?;
    auction.current_price = result.current_price.or(auction.current_price);
    auction.winner = if auction.success() {
        result.winner.clone()
    } else {
        None
    };
    Ok(())
}

/// Marks the auction successfully auctioned. Guarded: the supplied buyer
/// and price must match the frozen bidding result; a mismatch fails with
/// the collected validation errors instead of silently passing.
pub fn sold_in_auction(
    auction: &mut Auction,
    buyer: &PartyRef,
    price: Money,
) -> Result<(), TransitionError> {
    let mut errors = Vec::new();
    match &auction.winner {
        Some(winner) if winner == buyer => {}
        Some(winner) => errors.push(format!("buyer {buyer} is not the winner {winner}")),
        None => errors.push(format!("buyer {buyer} supplied but there is no winner")),
    }
    if auction.current_price != Some(price) {
        errors.push(format!(
            "price {price} does not match the winning price {}",
            auction.current_price.unwrap_or(Money::ZERO)
        ));
    }
    if !errors.is_empty() {
        return Err(TransitionError::InvalidResult { errors });
    }
    shift(auction, Event::SoldInAuction)?;
    auction.sold_price = Some(price);
    Ok(())
}

/// Marks the auction unsuccessful. Guarded: there must be no winner.
pub fn not_sold_in_auction(auction: &mut Auction) -> Result<(), TransitionError> {
    if auction.winner.is_some() {
        return Err(TransitionError::WinnerExists);
    }
    shift(auction, Event::NotSoldInAuction)
}

pub fn sell(auction: &mut Auction) -> Result<(), TransitionError> {
    shift(auction, Event::Sell)
}

pub fn not_sell(auction: &mut Auction) -> Result<(), TransitionError> {
    shift(auction, Event::NotSell)
}

/// Freezes new bids without closing the auction. Idempotent; the first
/// locking actor and time stay recorded.
pub fn lock_bidding(auction: &mut Auction, by: &PartyRef, now: DateTime<Utc>) {
    if auction.bidding_locked() {
        return;
    }
    tracing::info!(auction_id = %auction.id, %by, "bidding locked");
    auction.bidding_locked_at = Some(now);
    auction.bidding_locked_by = Some(by.clone());
}

/// Reopens bidding. Idempotent.
pub fn unlock_bidding(auction: &mut Auction, by: &PartyRef) {
    if !auction.bidding_locked() {
        return;
    }
    tracing::info!(auction_id = %auction.id, %by, "bidding unlocked");
    auction.bidding_locked_at = None;
    auction.bidding_locked_by = None;
}

/// Checks that an explicit manual close is permitted: the auction must be
/// flagged for manual closing and bidding must have been locked first.
pub fn authorize_manual_close(auction: &Auction) -> Result<(), TransitionError> {
    if !auction.must_be_closed_manually {
        return Err(TransitionError::NotAuthorized(
            "auction closes automatically",
        ));
    }
    if !auction.bidding_locked() {
        return Err(TransitionError::NotAuthorized(
            "bidding must be locked before closing manually",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone, model::AuctionId};

    fn auction() -> Auction {
        Auction::offered(
            AuctionId(1),
            PartyRef::new("user", 1),
            PartyRef::new("item", 9),
            Money(1000),
            Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap(),
        )
    }

    fn no_bids_result() -> SaleResult {
        SaleResult {
            current_price: Some(Money(1000)),
            next_minimum_bid: Money(1000),
            winner: None,
            winning_bid: None,
        }
    }

    #[test]
    fn happy_path_to_sold() {
        let mut auction = auction();
        accept_offer(&mut auction).unwrap();
        start_sale(&mut auction).unwrap();
        assert_eq!(auction.state, AuctionState::InSale);
        assert_eq!(auction.current_price, Some(Money(1000)));
        assert_eq!(auction.currently_ends_at, Some(auction.ends_at));

        let result = SaleResult {
            current_price: Some(Money(2000)),
            next_minimum_bid: Money(2001),
            winner: Some(PartyRef::new("user", 2)),
            winning_bid: None,
        };
        auction.applied_bid_count = 3;
        close_bidding(&mut auction, &result).unwrap();
        assert_eq!(auction.state, AuctionState::BiddingEnded);
        assert_eq!(auction.winner, Some(PartyRef::new("user", 2)));

        sold_in_auction(&mut auction, &PartyRef::new("user", 2), Money(2000)).unwrap();
        assert_eq!(auction.state, AuctionState::AuctionedSuccessfully);
        assert_eq!(auction.sold_price, Some(Money(2000)));

        sell(&mut auction).unwrap();
        assert_eq!(auction.state, AuctionState::Sold);
        assert!(auction.state.is_terminal());
    }

    #[test]
    fn unknown_pair_is_an_illegal_transition() {
        let mut auction = auction();
        let err = start_sale(&mut auction).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Illegal {
                from: AuctionState::Offered,
                event: Event::StartSale,
            }
        ));
        assert_eq!(auction.state, AuctionState::Offered);
    }

    #[test]
    fn cancel_is_forbidden_once_bidding_started() {
        let mut auction = auction();
        accept_offer(&mut auction).unwrap();
        cancel(&mut auction).unwrap();
        assert_eq!(auction.state, AuctionState::Cancelled);

        let mut auction = self::auction();
        accept_offer(&mut auction).unwrap();
        start_sale(&mut auction).unwrap();
        assert!(matches!(
            cancel(&mut auction),
            Err(TransitionError::Illegal { .. })
        ));
    }

    #[test]
    fn sold_in_auction_rejects_wrong_buyer_and_price() {
        let mut auction = auction();
        accept_offer(&mut auction).unwrap();
        start_sale(&mut auction).unwrap();
        let result = SaleResult {
            current_price: Some(Money(2000)),
            next_minimum_bid: Money(2001),
            winner: Some(PartyRef::new("user", 2)),
            winning_bid: None,
        };
        close_bidding(&mut auction, &result).unwrap();

        let err =
            sold_in_auction(&mut auction, &PartyRef::new("user", 3), Money(1500)).unwrap_err();
        match err {
            TransitionError::InvalidResult { errors } => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        // The failed guard left the state alone.
        assert_eq!(auction.state, AuctionState::BiddingEnded);
    }

    #[test]
    fn not_sold_requires_no_winner() {
        let mut auction = auction();
        accept_offer(&mut auction).unwrap();
        start_sale(&mut auction).unwrap();
        let result = SaleResult {
            winner: Some(PartyRef::new("user", 2)),
            ..no_bids_result()
        };
        auction.applied_bid_count = 1;
        close_bidding(&mut auction, &result).unwrap();

        assert!(matches!(
            not_sold_in_auction(&mut auction),
            Err(TransitionError::WinnerExists)
        ));

        auction.winner = None;
        not_sold_in_auction(&mut auction).unwrap();
        not_sell(&mut auction).unwrap();
        assert_eq!(auction.state, AuctionState::NotSold);
    }

    #[test]
    fn lock_and_unlock_are_idempotent() {
        let mut auction = auction();
        let operator = PartyRef::new("admin", 1);
        let later_operator = PartyRef::new("admin", 2);
        let now = Utc.with_ymd_and_hms(2021, 6, 1, 10, 0, 0).unwrap();

        lock_bidding(&mut auction, &operator, now);
        lock_bidding(&mut auction, &later_operator, now + chrono::Duration::hours(1));
        assert_eq!(auction.bidding_locked_at, Some(now));
        assert_eq!(auction.bidding_locked_by, Some(operator.clone()));

        unlock_bidding(&mut auction, &operator);
        unlock_bidding(&mut auction, &operator);
        assert!(!auction.bidding_locked());
    }

    #[test]
    fn manual_close_requires_flag_and_lock() {
        let mut auction = auction();
        assert!(matches!(
            authorize_manual_close(&auction),
            Err(TransitionError::NotAuthorized(_))
        ));

        auction.must_be_closed_manually = true;
        assert!(matches!(
            authorize_manual_close(&auction),
            Err(TransitionError::NotAuthorized(_))
        ));

        auction.bidding_locked_at = Some(Utc::now());
        assert!(authorize_manual_close(&auction).is_ok());
    }
}
