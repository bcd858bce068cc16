//! Bidder registration workflow and autobid-flag maintenance.

use {
    chrono::{DateTime, Utc},
    model::{
        auction::{Auction, AuctionState},
        bid::Bid,
        money::Money,
        registration::{BidderRegistration, RegistrationState},
        PartyRef, RegistrationId,
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Error)]
pub enum RegistrationError {
    #[error("auction in state {0} does not accept new registrations")]
    AuctionClosedForRegistrations(AuctionState),
    #[error("registration cannot move from {from} to {to}")]
    IllegalTransition {
        from: RegistrationState,
        to: RegistrationState,
    },
}

/// Creates a registration for one bidder on one auction. Only auctions that
/// are accepted or already in sale take new registrations.
pub fn create(
    id: RegistrationId,
    auction: &Auction,
    bidder: PartyRef,
) -> Result<BidderRegistration, RegistrationError> {
    match auction.state {
        AuctionState::Accepted | AuctionState::InSale => {
            Ok(BidderRegistration::new(id, auction.id, bidder))
        }
        state => Err(RegistrationError::AuctionClosedForRegistrations(state)),
    }
}

pub fn approve(
    registration: &mut BidderRegistration,
    now: DateTime<Utc>,
) -> Result<(), RegistrationError> {
    transition(registration, RegistrationState::Approved, now)
}

pub fn reject(
    registration: &mut BidderRegistration,
    now: DateTime<Utc>,
) -> Result<(), RegistrationError> {
    transition(registration, RegistrationState::Rejected, now)
}

/// Moves an approved registration back to pending.
pub fn unapprove(
    registration: &mut BidderRegistration,
    now: DateTime<Utc>,
) -> Result<(), RegistrationError> {
    transition(registration, RegistrationState::Pending, now)
}

fn transition(
    registration: &mut BidderRegistration,
    to: RegistrationState,
    now: DateTime<Utc>,
) -> Result<(), RegistrationError> {
    use RegistrationState::*;
    let allowed = matches!(
        (registration.state, to),
        (Pending, Approved) | (Pending, Rejected) | (Approved, Pending)
    );
    if !allowed {
        return Err(RegistrationError::IllegalTransition {
            from: registration.state,
            to,
        });
    }
    tracing::info!(
        registration_id = %registration.id,
        bidder = %registration.bidder,
        from = %registration.state,
        %to,
        "registration transition"
    );
    registration.state = to;
    registration.handled_at = Some(now);
    Ok(())
}

/// Recomputes the `autobid` flag over one registration's bid history.
///
/// Replays the bids most recent first, tracking the running limit: a bid
/// whose `max_price` raises the limit was a fresh decision by the bidder
/// (manual); a bid at or under an already-known limit is a system-generated
/// increment. Bids without a limit are always manual. Batch repair, not part
/// of the live bid path; applying it twice yields the same flags.
pub fn recompute_autobid_flags(bids: &mut [Bid]) {
    let mut order: Vec<usize> = (0..bids.len()).collect();
    order.sort_by(|&a, &b| {
        bids[b]
            .created_at
            .cmp(&bids[a].created_at)
            .then(bids[b].id.cmp(&bids[a].id))
    });

    let mut limit: Option<Money> = None;
    for index in order {
        let bid = &mut bids[index];
        match bid.max_price {
            None => bid.autobid = false,
            Some(max_price) => {
                if limit.is_none_or(|limit| max_price > limit) {
                    bid.autobid = false;
                    limit = Some(max_price);
                } else {
                    bid.autobid = true;
                }
            }
        }
    }
}
