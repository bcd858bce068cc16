//! The bid application engine.
//!
//! Given an auction, its bid history and a candidate bid, decides
//! acceptance, resolves proxy duels between hidden limits and computes the
//! new price and winner. The functions here are pure over the passed state;
//! persistence and hooks are the facade's concern.

use {
    crate::validation::BidValidationError,
    chrono::{DateTime, Duration, Utc},
    model::{
        auction::Auction,
        bid::{self, Bid},
        ladder::IncrementLadder,
        money::Money,
        BidId, PartyRef, RegistrationId,
    },
    serde::Serialize,
    strum::Display,
};

/// A candidate bid that already passed stateless validation. Either a
/// direct `price`, a hidden `max_price` limit, or both.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub bidder: PartyRef,
    pub registration: RegistrationId,
    pub price: Option<Money>,
    pub max_price: Option<Money>,
    pub placed_at: DateTime<Utc>,
}

/// Why a candidate was rejected. Business rejections, not errors: state is
/// left untouched and the caller may resubmit.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectionReason {
    AuctionNotOpen,
    RegistrationMismatch,
    BidTooLow,
    SelfOverbid,
}

/// How a bid attempt failed, for the `after_bid_not_appended` hook.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BidFailure {
    Invalid(Vec<BidValidationError>),
    Rejected(RejectionReason),
}

/// The state of the bidding at one instant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SaleResult {
    pub current_price: Option<Money>,
    /// The smallest price a new direct bid must reach. Equals the current
    /// price while no bid has been applied yet.
    pub next_minimum_bid: Money,
    pub winner: Option<PartyRef>,
    pub winning_bid: Option<Bid>,
}

/// Outcome of applying one candidate.
#[derive(Clone, Debug)]
pub enum Application {
    Accepted {
        /// The candidate plus any autobids synthesized by the proxy duel,
        /// in append order.
        appended: Vec<Bid>,
        /// New deadline when the bid triggered an anti-snipe extension.
        extended_until: Option<DateTime<Utc>>,
        result: SaleResult,
    },
    Rejected {
        reason: RejectionReason,
        result: SaleResult,
    },
}

/// Reports the bidding state without mutating anything. Usable with no
/// candidate pending.
pub fn result_of(auction: &Auction, bids: &[Bid], ladder: &IncrementLadder) -> SaleResult {
    match bid::leading(bids) {
        Some(leader) => {
            let price = auction.current_price.unwrap_or(leader.price).max(leader.price);
            SaleResult {
                current_price: Some(price),
                next_minimum_bid: ladder.next_minimum_bid(price),
                winner: Some(leader.bidder.clone()),
                winning_bid: Some(leader.clone()),
            }
        }
        None => {
            let price = auction.current_price.unwrap_or(auction.offered_price);
            SaleResult {
                current_price: auction.current_price,
                // The first bid may match the asking price exactly.
                next_minimum_bid: price,
                winner: None,
                winning_bid: None,
            }
        }
    }
}

/// Applies a candidate bid. On acceptance the candidate is appended, the
/// proxy duel resolved, the auction's price, bid count and (possibly)
/// deadline updated.
pub fn apply(
    auction: &mut Auction,
    bids: &mut Vec<Bid>,
    candidate: &Candidate,
    ladder: &IncrementLadder,
    prolonging_window: std::time::Duration,
) -> Application {
    let before = result_of(auction, bids, ladder);

    if !auction.open_for_bids() {
        return rejected(RejectionReason::AuctionNotOpen, before);
    }

    let leader = bid::leading(bids.as_slice()).cloned();
    if let Some(leader) = &leader {
        // The current leader must not overbid themselves with a direct
        // price; raising their own hidden limit is allowed.
        if leader.bidder == candidate.bidder && candidate.price.is_some() {
            return rejected(RejectionReason::SelfOverbid, before);
        }
    }

    // A direct bid is judged by its price; a limit-only bid by how far the
    // proxy placement could reach.
    let reach = match (candidate.price, candidate.max_price) {
        (Some(price), _) => price,
        (None, Some(max_price)) => max_price,
        (None, None) => return rejected(RejectionReason::BidTooLow, before),
    };
    let raising_own_limit = leader
        .as_ref()
        .is_some_and(|leader| leader.bidder == candidate.bidder);
    if raising_own_limit {
        // A limit raise must actually raise the leader's standing limit.
        let standing = best_limit(bids, |bid| bid.bidder == candidate.bidder)
            .map(Bid::ceiling)
            .unwrap_or(Money::ZERO);
        if reach <= standing {
            return rejected(RejectionReason::BidTooLow, before);
        }
    } else if reach < before.next_minimum_bid {
        return rejected(RejectionReason::BidTooLow, before);
    }

    // Placement price: an explicit price is used as given; a limit-only bid
    // is placed at the lowest acceptable price, or at the unchanged current
    // price when the leader merely raises their own limit.
    let placed_price = match candidate.price {
        Some(price) => price,
        None if raising_own_limit => before.current_price.unwrap_or(before.next_minimum_bid),
        None => before.next_minimum_bid,
    };

    let first_new_id = next_bid_id(bids);
    let mut next_id = first_new_id;
    bids.push(Bid {
        id: next_id,
        auction: auction.id,
        registration: candidate.registration,
        bidder: candidate.bidder.clone(),
        price: placed_price,
        max_price: candidate.max_price,
        created_at: candidate.placed_at,
        cancelled: false,
        autobid: false,
    });
    next_id = BidId(next_id.0 + 1);

    resolve_proxies(auction.id, bids, ladder, &mut next_id);
    let result = settle(auction, bids, ladder);

    let window = Duration::from_std(prolonging_window).unwrap_or_else(|_| Duration::zero());
    let deadline = auction.effective_deadline();
    let extended_until = (candidate.placed_at + window > deadline
        && auction.extend_deadline(candidate.placed_at + window))
    .then(|| auction.effective_deadline());
    if let Some(until) = extended_until {
        tracing::info!(auction_id = %auction.id, %until, "anti-snipe deadline extension");
    }

    let appended = bids
        .iter()
        .filter(|bid| bid.id >= first_new_id)
        .cloned()
        .collect();

    Application::Accepted {
        appended,
        extended_until,
        result,
    }
}

/// Recomputes price, winner and bid count from the live bids, resolving any
/// outstanding proxy headroom. Used after a cancellation and by the apply
/// path itself.
pub fn recompute(auction: &mut Auction, bids: &mut Vec<Bid>, ladder: &IncrementLadder) -> SaleResult {
    let mut next_id = next_bid_id(bids);
    resolve_proxies(auction.id, bids, ladder, &mut next_id);
    settle(auction, bids, ladder)
}

fn rejected(reason: RejectionReason, result: SaleResult) -> Application {
    tracing::debug!(%reason, "bid rejected");
    Application::Rejected { reason, result }
}

fn settle(auction: &mut Auction, bids: &[Bid], ladder: &IncrementLadder) -> SaleResult {
    auction.applied_bid_count = bids.iter().filter(|bid| bid.live()).count() as u64;
    match bid::leading(bids) {
        Some(leader) => {
            auction.current_price = Some(leader.price);
        }
        None => {
            // All bids gone: the price falls back to the asking price.
            auction.current_price = Some(auction.offered_price);
        }
    }
    result_of(auction, bids, ladder)
}

fn next_bid_id(bids: &[Bid]) -> BidId {
    BidId(bids.iter().map(|bid| bid.id.0).max().unwrap_or(0) + 1)
}

/// The proxy duel.
///
/// While a rival bidder holds an unclaimed limit above the current price,
/// the duel plays both limits against each other and appends only the final
/// position of each side: the losing limit is exhausted at its ceiling and
/// the winning side counters one increment above it (capped by its own
/// ceiling). Synthesized bids carry the originating bid's timestamp so that
/// price ties keep resolving to the earliest genuine bid.
///
/// Every round permanently prices at least one bidder's limit out, so the
/// loop runs at most once per live bidder.
fn resolve_proxies(
    auction: model::AuctionId,
    bids: &mut Vec<Bid>,
    ladder: &IncrementLadder,
    next_id: &mut BidId,
) {
    loop {
        let Some(leader) = bid::leading(bids.as_slice()).cloned() else {
            return;
        };
        let current = leader.price;

        // The bid holding the leader's highest live limit.
        let leader_limit = best_limit(bids, |bid| bid.bidder == leader.bidder)
            .cloned()
            .unwrap_or_else(|| leader.clone());
        // The strongest rival limit with headroom above the current price.
        let Some(rival) = best_limit(bids, |bid| {
            bid.bidder != leader.bidder && bid.has_headroom_above(current)
        })
        .cloned() else {
            return;
        };

        let leader_ceiling = leader_limit.ceiling().max(leader.price);
        let rival_ceiling = rival.ceiling();

        if rival_ceiling > leader_ceiling {
            // The leader's limit is exhausted; the rival takes over one
            // increment above it.
            if leader_ceiling > leader.price {
                append_autobid(bids, auction, &leader_limit, leader_ceiling, next_id);
            }
            let target = rival_ceiling.min(ladder.next_minimum_bid(leader_ceiling));
            append_autobid(bids, auction, &rival, target, next_id);
        } else {
            // The rival's limit is exhausted at its ceiling; the leader
            // counters just above it, or matches it on an exact tie and the
            // earlier bid keeps the lead.
            if rival_ceiling > rival.price {
                append_autobid(bids, auction, &rival, rival_ceiling, next_id);
            }
            let target = leader_ceiling.min(ladder.next_minimum_bid(rival_ceiling));
            if target > leader.price {
                append_autobid(bids, auction, &leader_limit, target, next_id);
            }
        }
    }
}

/// The live bid with the highest ceiling among those matching `filter`;
/// earliest placement breaks ceiling ties.
fn best_limit<'a>(bids: &'a [Bid], filter: impl Fn(&Bid) -> bool) -> Option<&'a Bid> {
    bids.iter()
        .filter(|bid| bid.live() && filter(bid))
        .min_by(|a, b| {
            b.ceiling()
                .cmp(&a.ceiling())
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        })
}

fn append_autobid(
    bids: &mut Vec<Bid>,
    auction: model::AuctionId,
    origin: &Bid,
    price: Money,
    next_id: &mut BidId,
) {
    tracing::debug!(
        bidder = %origin.bidder,
        %price,
        "appending autobid"
    );
    bids.push(Bid {
        id: *next_id,
        auction,
        registration: origin.registration,
        bidder: origin.bidder.clone(),
        price,
        max_price: origin.max_price,
        created_at: origin.created_at,
        cancelled: false,
        autobid: true,
    });
    *next_id = BidId(next_id.0 + 1);
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::TimeZone,
        model::{auction::AuctionState, AuctionId},
        std::time::Duration as StdDuration,
    };

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap()
    }

    fn auction_in_sale(offered: i64) -> Auction {
        let mut auction = Auction::offered(
            AuctionId(1),
            PartyRef::new("user", 100),
            PartyRef::new("item", 1),
            Money(offered),
            start() + Duration::hours(2),
        );
        auction.state = AuctionState::InSale;
        auction.current_price = Some(Money(offered));
        auction.currently_ends_at = Some(auction.ends_at);
        auction
    }

    fn candidate(bidder: i64, price: Option<i64>, max: Option<i64>, minute: i64) -> Candidate {
        Candidate {
            bidder: PartyRef::new("user", bidder),
            registration: RegistrationId(bidder),
            price: price.map(Money),
            max_price: max.map(Money),
            placed_at: start() + Duration::minutes(minute),
        }
    }

    fn tiered_ladder() -> IncrementLadder {
        IncrementLadder::from_thresholds(vec![
            (Money(0), Money(100)),
            (Money(3000), Money(500)),
            (Money(5000), Money(1000)),
        ])
    }

    fn accept(
        auction: &mut Auction,
        bids: &mut Vec<Bid>,
        c: Candidate,
        ladder: &IncrementLadder,
    ) -> SaleResult {
        match apply(auction, bids, &c, ladder, StdDuration::from_secs(120)) {
            Application::Accepted { result, .. } => result,
            Application::Rejected { reason, .. } => panic!("unexpected rejection: {reason}"),
        }
    }

    fn reject(
        auction: &mut Auction,
        bids: &mut Vec<Bid>,
        c: Candidate,
        ladder: &IncrementLadder,
    ) -> RejectionReason {
        match apply(auction, bids, &c, ladder, StdDuration::from_secs(120)) {
            Application::Rejected { reason, .. } => reason,
            Application::Accepted { .. } => panic!("unexpected acceptance"),
        }
    }

    #[test]
    fn walks_the_increment_ladder() {
        let ladder = tiered_ladder();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();

        let result = accept(&mut auction, &mut bids, candidate(1, Some(1000), None, 0), &ladder);
        assert_eq!(result.current_price, Some(Money(1000)));
        assert_eq!(result.next_minimum_bid, Money(1100));

        let result = accept(&mut auction, &mut bids, candidate(2, Some(1100), None, 1), &ladder);
        assert_eq!(result.current_price, Some(Money(1100)));
        assert_eq!(result.next_minimum_bid, Money(1200));
        assert_eq!(result.winner, Some(PartyRef::new("user", 2)));
    }

    #[test]
    fn one_unit_below_minimum_is_too_low() {
        let ladder = tiered_ladder();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();
        accept(&mut auction, &mut bids, candidate(1, Some(1000), None, 0), &ladder);

        let reason = reject(&mut auction, &mut bids, candidate(2, Some(1099), None, 1), &ladder);
        assert_eq!(reason, RejectionReason::BidTooLow);
        assert_eq!(auction.current_price, Some(Money(1000)));
        assert_eq!(auction.applied_bid_count, 1);
    }

    #[test]
    fn bid_exactly_at_minimum_is_accepted() {
        let ladder = tiered_ladder();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();
        accept(&mut auction, &mut bids, candidate(1, Some(1000), None, 0), &ladder);
        let result = accept(&mut auction, &mut bids, candidate(2, Some(1100), None, 1), &ladder);
        assert_eq!(result.current_price, Some(Money(1100)));
    }

    #[test]
    fn closed_auction_rejects_without_mutation() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        auction.state = AuctionState::Accepted;
        let mut bids = Vec::new();

        let reason = reject(&mut auction, &mut bids, candidate(1, Some(2000), None, 0), &ladder);
        assert_eq!(reason, RejectionReason::AuctionNotOpen);
        assert!(bids.is_empty());
        assert_eq!(auction.applied_bid_count, 0);
    }

    #[test]
    fn locked_bidding_rejects_as_not_open() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        auction.bidding_locked_at = Some(start());
        let mut bids = Vec::new();

        let reason = reject(&mut auction, &mut bids, candidate(1, Some(2000), None, 0), &ladder);
        assert_eq!(reason, RejectionReason::AuctionNotOpen);
    }

    #[test]
    fn leader_cannot_overbid_themselves_directly() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();
        accept(&mut auction, &mut bids, candidate(1, Some(1000), None, 0), &ladder);

        let reason = reject(&mut auction, &mut bids, candidate(1, Some(1500), None, 1), &ladder);
        assert_eq!(reason, RejectionReason::SelfOverbid);
    }

    #[test]
    fn leader_may_raise_their_own_limit() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();
        accept(
            &mut auction,
            &mut bids,
            candidate(1, Some(1000), Some(2000), 0),
            &ladder,
        );

        // Raising the limit does not move the price.
        let result = accept(&mut auction, &mut bids, candidate(1, None, Some(2500), 1), &ladder);
        assert_eq!(result.current_price, Some(Money(1000)));
        assert_eq!(result.winner, Some(PartyRef::new("user", 1)));

        // A rival above the old limit now duels against the raised one.
        let result = accept(&mut auction, &mut bids, candidate(2, None, Some(2200), 2), &ladder);
        assert_eq!(result.current_price, Some(Money(2201)));
        assert_eq!(result.winner, Some(PartyRef::new("user", 1)));
    }

    #[test]
    fn lowering_own_limit_is_too_low() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();
        accept(
            &mut auction,
            &mut bids,
            candidate(1, Some(1000), Some(2000), 0),
            &ladder,
        );
        let reason = reject(&mut auction, &mut bids, candidate(1, None, Some(1500), 1), &ladder);
        assert_eq!(reason, RejectionReason::BidTooLow);
    }

    #[test]
    fn proxy_duel_settles_at_second_price_plus_increment() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();

        accept(
            &mut auction,
            &mut bids,
            candidate(1, Some(1101), Some(3000), 0),
            &ladder,
        );
        let result = accept(&mut auction, &mut bids, candidate(2, None, Some(2222), 1), &ladder);

        assert_eq!(result.current_price, Some(Money(2223)));
        assert_eq!(result.winner, Some(PartyRef::new("user", 1)));
        assert_eq!(result.next_minimum_bid, Money(2224));
        // The loser's limit is fully claimed, visible as an autobid at its
        // ceiling.
        assert!(bids
            .iter()
            .any(|bid| bid.bidder == PartyRef::new("user", 2)
                && bid.price == Money(2222)
                && bid.autobid));
        // The winner's counter carries the genuine bid's timestamp.
        let winning = result.winning_bid.unwrap();
        assert!(winning.autobid);
        assert_eq!(winning.created_at, start());
    }

    #[test]
    fn equal_limits_resolve_to_the_earliest_bid() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();

        accept(
            &mut auction,
            &mut bids,
            candidate(1, Some(1000), Some(2000), 0),
            &ladder,
        );
        let result = accept(&mut auction, &mut bids, candidate(2, None, Some(2000), 1), &ladder);

        assert_eq!(result.current_price, Some(Money(2000)));
        assert_eq!(result.winner, Some(PartyRef::new("user", 1)));
    }

    #[test]
    fn direct_bid_below_hidden_limit_is_countered() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();

        accept(
            &mut auction,
            &mut bids,
            candidate(1, Some(1000), Some(2500), 0),
            &ladder,
        );
        let result = accept(&mut auction, &mut bids, candidate(2, Some(2000), None, 1), &ladder);

        assert_eq!(result.current_price, Some(Money(2001)));
        assert_eq!(result.winner, Some(PartyRef::new("user", 1)));
    }

    #[test]
    fn direct_bid_above_hidden_limit_takes_the_lead() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();

        accept(
            &mut auction,
            &mut bids,
            candidate(1, Some(1000), Some(2500), 0),
            &ladder,
        );
        let result = accept(&mut auction, &mut bids, candidate(2, Some(3000), None, 1), &ladder);

        // The direct price is the floor of the current price even though the
        // runner-up ceiling was far lower.
        assert_eq!(result.current_price, Some(Money(3000)));
        assert_eq!(result.winner, Some(PartyRef::new("user", 2)));
    }

    #[test]
    fn three_way_duel_is_deterministic() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();

        accept(
            &mut auction,
            &mut bids,
            candidate(1, Some(1000), Some(1500), 0),
            &ladder,
        );
        accept(&mut auction, &mut bids, candidate(2, None, Some(1800), 1), &ladder);
        let result = accept(&mut auction, &mut bids, candidate(3, None, Some(5000), 2), &ladder);

        // Winner holds the top limit; price is one unit above the runner-up.
        assert_eq!(result.winner, Some(PartyRef::new("user", 3)));
        assert_eq!(result.current_price, Some(Money(1801)));
    }

    #[test]
    fn late_bid_extends_the_deadline() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        auction.currently_ends_at = Some(start() + Duration::minutes(1));
        let mut bids = Vec::new();

        let c = candidate(1, Some(1000), None, 0);
        let placed_at = c.placed_at;
        match apply(&mut auction, &mut bids, &c, &ladder, StdDuration::from_secs(120)) {
            Application::Accepted { extended_until, .. } => {
                let expected = placed_at + Duration::seconds(120);
                assert_eq!(extended_until, Some(expected));
                assert_eq!(auction.effective_deadline(), expected);
            }
            Application::Rejected { reason, .. } => panic!("rejected: {reason}"),
        }
    }

    #[test]
    fn early_bid_does_not_extend() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        let deadline = auction.effective_deadline();
        let mut bids = Vec::new();

        match apply(
            &mut auction,
            &mut bids,
            &candidate(1, Some(1000), None, 0),
            &ladder,
            StdDuration::from_secs(120),
        ) {
            Application::Accepted { extended_until, .. } => {
                assert_eq!(extended_until, None);
                assert_eq!(auction.effective_deadline(), deadline);
            }
            Application::Rejected { reason, .. } => panic!("rejected: {reason}"),
        }
    }

    #[test]
    fn cancelling_the_leader_recomputes_from_live_bids() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();

        accept(&mut auction, &mut bids, candidate(1, Some(1000), None, 0), &ladder);
        accept(&mut auction, &mut bids, candidate(2, Some(1200), None, 1), &ladder);

        let leader_id = result_of(&auction, &bids, &ladder).winning_bid.unwrap().id;
        bids.iter_mut()
            .find(|bid| bid.id == leader_id)
            .unwrap()
            .cancelled = true;

        let result = recompute(&mut auction, &mut bids, &ladder);
        assert_eq!(result.current_price, Some(Money(1000)));
        assert_eq!(result.winner, Some(PartyRef::new("user", 1)));
        assert_eq!(auction.applied_bid_count, 1);
    }

    #[test]
    fn cancelling_all_bids_falls_back_to_the_asking_price() {
        let ladder = IncrementLadder::default();
        let mut auction = auction_in_sale(1000);
        let mut bids = Vec::new();
        accept(&mut auction, &mut bids, candidate(1, Some(1500), None, 0), &ladder);

        for bid in &mut bids {
            bid.cancelled = true;
        }
        let result = recompute(&mut auction, &mut bids, &ladder);
        assert_eq!(result.current_price, Some(Money(1000)));
        assert_eq!(result.winner, None);
        assert_eq!(result.next_minimum_bid, Money(1000));
        assert_eq!(auction.applied_bid_count, 0);
    }
}
