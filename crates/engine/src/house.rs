//! The `AuctionHouse` facade: the operations HTTP/API and job layers call.
//!
//! Wraps the pure algorithms with the per-auction lock, the store
//! transaction, trigger (re)scheduling and the notification hooks.

use {
    crate::{
        bidding::{self, Application, BidFailure, Candidate, RejectionReason, SaleResult},
        config::Settings,
        infra::{AuctionLocks, Commit, Hooks, Scheduler, Store, StoreError, TriggerKey, TriggerKind},
        lifecycle::{self, TransitionError},
        registration::{self, RegistrationError},
        registry::KindRegistry,
        validation::{self, BidValidationError},
    },
    chrono::{DateTime, Duration, Utc},
    model::{
        auction::Auction,
        bid::Bid,
        money::Money,
        registration::BidderRegistration,
        AuctionId, BidId, PartyRef, RegistrationId,
    },
    std::sync::Arc,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("scheduling failed: {0}")]
    Scheduler(#[source] anyhow::Error),
}

/// A bid submission. `registration` may be omitted for bidders registered
/// on this auction or eligible for auto-registration; `placed_at` defaults
/// to now and exists so job-driven hosts can pass the receive time.
#[derive(Clone, Debug, Default)]
pub struct BidRequest {
    pub bidder: PartyRef,
    pub registration: Option<RegistrationId>,
    pub price: Option<Money>,
    pub max_price: Option<Money>,
    pub dont_confirm_bids: Option<bool>,
    pub placed_at: Option<DateTime<Utc>>,
}

/// What the caller gets back from `apply_bid`. Business rejections and
/// validation failures land here, not in `Err`.
#[derive(Clone, Debug)]
pub struct BidOutcome {
    pub accepted: bool,
    pub reason: Option<RejectionReason>,
    pub validation_errors: Vec<BidValidationError>,
    pub result: SaleResult,
}

pub struct AuctionHouse {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) hooks: Arc<dyn Hooks>,
    pub(crate) locks: AuctionLocks,
    pub(crate) settings: Settings,
    registry: KindRegistry,
}

impl AuctionHouse {
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: Arc<dyn Scheduler>,
        hooks: Arc<dyn Hooks>,
        settings: Settings,
        registry: KindRegistry,
    ) -> Self {
        Self {
            store,
            scheduler,
            hooks,
            locks: AuctionLocks::default(),
            settings,
            registry,
        }
    }

    /// Records a newly offered auction and pre-registers every instance of
    /// the configured auto-registered kinds as approved.
    pub async fn offer(&self, auction: Auction) -> Result<(), OperationError> {
        let mut registrations = Vec::new();
        for kind in &self.settings.autoregister_kinds {
            for party in self.registry.instances_of(kind) {
                let id = self.store.next_registration_id().await?;
                let mut registration = BidderRegistration::new(id, auction.id, party);
                registration.state = model::registration::RegistrationState::Approved;
                registration.handled_at = Some(Utc::now());
                registrations.push(registration);
            }
        }
        self.store
            .commit(Commit {
                auction: Some(auction),
                registrations,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    pub async fn accept_offer(&self, id: AuctionId) -> Result<(), OperationError> {
        self.transition(id, lifecycle::accept_offer).await
    }

    pub async fn refuse_offer(&self, id: AuctionId) -> Result<(), OperationError> {
        self.transition(id, lifecycle::refuse_offer).await
    }

    pub async fn cancel(&self, id: AuctionId) -> Result<(), OperationError> {
        self.transition(id, lifecycle::cancel).await
    }

    pub async fn sell(&self, id: AuctionId) -> Result<(), OperationError> {
        self.transition(id, lifecycle::sell).await
    }

    pub async fn not_sell(&self, id: AuctionId) -> Result<(), OperationError> {
        self.transition(id, lifecycle::not_sell).await
    }

    async fn transition(
        &self,
        id: AuctionId,
        op: impl FnOnce(&mut Auction) -> Result<(), TransitionError>,
    ) -> Result<(), OperationError> {
        let _guard = self.locks.acquire(id).await;
        let mut auction = self.store.auction(id).await?;
        op(&mut auction)?;
        self.commit_auction(auction).await
    }

    /// Opens bidding and schedules the closing and close-to-end triggers.
    pub async fn start_sale(&self, id: AuctionId) -> Result<(), OperationError> {
        let _guard = self.locks.acquire(id).await;
        let mut auction = self.store.auction(id).await?;
        lifecycle::start_sale(&mut auction)?;
        self.commit_auction(auction.clone()).await?;

        self.schedule(id, TriggerKind::Close, auction.effective_deadline())
            .await?;
        let lead = Duration::from_std(self.settings.close_to_end_notify_lead)
            .unwrap_or_else(|_| Duration::zero());
        self.schedule(id, TriggerKind::CloseToEnd, auction.ends_at - lead)
            .await?;

        self.hooks.after_start_sale(&auction).await;
        Ok(())
    }

    /// Ends bidding now, regardless of the deadline.
    pub async fn close_bidding(&self, id: AuctionId) -> Result<(), OperationError> {
        let _guard = self.locks.acquire(id).await;
        let auction = self.store.auction(id).await?;
        let bids = self.store.bids(id).await?;
        self.close_under_lock(auction, bids).await
    }

    /// The explicit operator path for auctions flagged as manually closed:
    /// requires the manual flag and previously locked bidding.
    pub async fn close_manually(
        &self,
        id: AuctionId,
        by: &PartyRef,
    ) -> Result<(), OperationError> {
        let _guard = self.locks.acquire(id).await;
        let auction = self.store.auction(id).await?;
        lifecycle::authorize_manual_close(&auction)?;
        tracing::info!(auction_id = %id, %by, "manual close");
        let bids = self.store.bids(id).await?;
        self.close_under_lock(auction, bids).await
    }

    /// Shared closing path; the caller holds the auction lock.
    pub(crate) async fn close_under_lock(
        &self,
        mut auction: Auction,
        bids: Vec<Bid>,
    ) -> Result<(), OperationError> {
        let ladder = self.settings.ladder_for(&auction).clone();
        let result = bidding::result_of(&auction, &bids, &ladder);
        lifecycle::close_bidding(&mut auction, &result)?;
        self.commit_auction(auction.clone()).await?;
        self.hooks.after_close_bidding(&auction).await;

        if auction.auto_finalize {
            match auction.winner.clone() {
                Some(winner) => {
                    let price = auction.current_price.unwrap_or(auction.offered_price);
                    self.finalize_sold(&mut auction, &winner, price).await?;
                }
                None => self.finalize_not_sold(&mut auction).await?,
            }
        }
        Ok(())
    }

    pub async fn sold_in_auction(
        &self,
        id: AuctionId,
        buyer: &PartyRef,
        price: Money,
    ) -> Result<(), OperationError> {
        let _guard = self.locks.acquire(id).await;
        let mut auction = self.store.auction(id).await?;
        self.finalize_sold(&mut auction, buyer, price).await
    }

    pub async fn not_sold_in_auction(&self, id: AuctionId) -> Result<(), OperationError> {
        let _guard = self.locks.acquire(id).await;
        let mut auction = self.store.auction(id).await?;
        self.finalize_not_sold(&mut auction).await
    }

    async fn finalize_sold(
        &self,
        auction: &mut Auction,
        buyer: &PartyRef,
        price: Money,
    ) -> Result<(), OperationError> {
        lifecycle::sold_in_auction(auction, buyer, price)?;
        self.commit_auction(auction.clone()).await?;
        self.hooks.after_sold_in_auction(auction).await;
        Ok(())
    }

    async fn finalize_not_sold(&self, auction: &mut Auction) -> Result<(), OperationError> {
        lifecycle::not_sold_in_auction(auction)?;
        self.commit_auction(auction.clone()).await?;
        self.hooks.after_not_sold_in_auction(auction).await;
        Ok(())
    }

    pub async fn lock_bidding(&self, id: AuctionId, by: &PartyRef) -> Result<(), OperationError> {
        let _guard = self.locks.acquire(id).await;
        let mut auction = self.store.auction(id).await?;
        lifecycle::lock_bidding(&mut auction, by, Utc::now());
        self.commit_auction(auction).await
    }

    pub async fn unlock_bidding(
        &self,
        id: AuctionId,
        by: &PartyRef,
    ) -> Result<(), OperationError> {
        let _guard = self.locks.acquire(id).await;
        let mut auction = self.store.auction(id).await?;
        lifecycle::unlock_bidding(&mut auction, by);
        self.commit_auction(auction).await
    }

    /// The bid path: validate, check admission, apply, persist, reschedule
    /// the closing trigger on anti-snipe extensions, fire hooks.
    pub async fn apply_bid(
        &self,
        id: AuctionId,
        request: BidRequest,
    ) -> Result<BidOutcome, OperationError> {
        let _guard = self.locks.acquire(id).await;
        let mut auction = self.store.auction(id).await?;
        let ladder = self.settings.ladder_for(&auction).clone();
        let window = self.settings.prolonging_window_for(&auction);
        let bids = self.store.bids(id).await?;

        let mut pending = Commit::default();

        let mut registration = match request.registration {
            Some(registration_id) => Some(self.store.registration(registration_id).await?),
            None => self.store.registration_of(id, &request.bidder).await?,
        };
        // The bidder's confirmation opt-out is persisted even when the bid
        // attempt itself fails, but only ever onto their own registration;
        // a rejected bid must not touch anyone else's record.
        if let (Some(registration), Some(flag)) = (&mut registration, request.dont_confirm_bids)
        {
            if registration.auction == id
                && registration.bidder == request.bidder
                && registration.dont_confirm_bids != flag
            {
                registration.dont_confirm_bids = flag;
                pending.registrations.push(registration.clone());
            }
        }

        if !auction.open_for_bids() {
            return self
                .reject(&auction, &bids, &ladder, pending, RejectionReason::AuctionNotOpen)
                .await;
        }

        let registration = match registration {
            Some(registration)
                if registration.auction == id
                    && registration.bidder == request.bidder
                    && registration.approved() =>
            {
                registration
            }
            Some(_) => {
                return self
                    .reject(
                        &auction,
                        &bids,
                        &ladder,
                        pending,
                        RejectionReason::RegistrationMismatch,
                    )
                    .await;
            }
            None => match self.auto_register(&auction, &request).await? {
                Some(registration) => {
                    pending.registrations.push(registration.clone());
                    registration
                }
                None => {
                    return self
                        .reject(
                            &auction,
                            &bids,
                            &ladder,
                            pending,
                            RejectionReason::RegistrationMismatch,
                        )
                        .await;
                }
            },
        };

        let validation_errors =
            validation::validate(request.price, request.max_price, self.settings.rounding_unit);
        if !validation_errors.is_empty() {
            if !pending.is_empty() {
                self.store.commit(pending).await?;
            }
            self.hooks
                .after_bid_not_appended(&auction, &BidFailure::Invalid(validation_errors.clone()))
                .await;
            return Ok(BidOutcome {
                accepted: false,
                reason: None,
                validation_errors,
                result: bidding::result_of(&auction, &bids, &ladder),
            });
        }

        let candidate = Candidate {
            bidder: request.bidder.clone(),
            registration: registration.id,
            price: request.price,
            max_price: request.max_price,
            placed_at: request.placed_at.unwrap_or_else(Utc::now),
        };
        let mut bids = bids;
        match bidding::apply(&mut auction, &mut bids, &candidate, &ladder, window) {
            Application::Accepted {
                appended,
                extended_until,
                result,
            } => {
                pending.auction = Some(auction.clone());
                pending.bids = appended.clone();
                self.store.commit(pending).await?;

                if let Some(until) = extended_until {
                    // The closing check for the old deadline becomes a
                    // no-op; this fresh one is authoritative.
                    self.schedule(id, TriggerKind::Close, until).await?;
                }

                if let Some(placed) = appended.first() {
                    self.hooks.after_bid_appended(&auction, placed).await;
                }
                Ok(BidOutcome {
                    accepted: true,
                    reason: None,
                    validation_errors: Vec::new(),
                    result,
                })
            }
            Application::Rejected { reason, result } => {
                if !pending.is_empty() {
                    self.store.commit(pending).await?;
                }
                self.hooks
                    .after_bid_not_appended(&auction, &BidFailure::Rejected(reason))
                    .await;
                Ok(BidOutcome {
                    accepted: false,
                    reason: Some(reason),
                    validation_errors: Vec::new(),
                    result,
                })
            }
        }
    }

    async fn reject(
        &self,
        auction: &Auction,
        bids: &[Bid],
        ladder: &model::ladder::IncrementLadder,
        pending: Commit,
        reason: RejectionReason,
    ) -> Result<BidOutcome, OperationError> {
        if !pending.is_empty() {
            self.store.commit(pending).await?;
        }
        self.hooks
            .after_bid_not_appended(auction, &BidFailure::Rejected(reason))
            .await;
        Ok(BidOutcome {
            accepted: false,
            reason: Some(reason),
            validation_errors: Vec::new(),
            result: bidding::result_of(auction, bids, ladder),
        })
    }

    /// First-bid auto-registration: allowed when configuration opts every
    /// bidder in, or when the host's capability check for the bidder's kind
    /// permits it.
    async fn auto_register(
        &self,
        auction: &Auction,
        request: &BidRequest,
    ) -> Result<Option<BidderRegistration>, OperationError> {
        let permitted = self.settings.autoregister_on_first_bid
            || self.registry.permits_bidding(&request.bidder);
        if !permitted {
            return Ok(None);
        }
        let registration_id = self.store.next_registration_id().await?;
        let mut registration =
            registration::create(registration_id, auction, request.bidder.clone())?;
        registration::approve(&mut registration, Utc::now())?;
        if let Some(flag) = request.dont_confirm_bids {
            registration.dont_confirm_bids = flag;
        }
        tracing::info!(
            auction_id = %auction.id,
            bidder = %registration.bidder,
            "auto-registered bidder on first bid"
        );
        Ok(Some(registration))
    }

    /// Read-only bidding state; works with no bid pending.
    pub async fn current_result(&self, id: AuctionId) -> Result<SaleResult, OperationError> {
        let auction = self.store.auction(id).await?;
        let bids = self.store.bids(id).await?;
        Ok(bidding::result_of(
            &auction,
            &bids,
            self.settings.ladder_for(&auction),
        ))
    }

    /// Cancels a bid and synchronously recomputes price and winner from the
    /// remaining live bids.
    pub async fn withdraw_bid(&self, id: BidId) -> Result<SaleResult, OperationError> {
        let bid = self.store.bid(id).await?;
        let _guard = self.locks.acquire(bid.auction).await;
        let mut auction = self.store.auction(bid.auction).await?;
        let ladder = self.settings.ladder_for(&auction).clone();
        let mut bids = self.store.bids(bid.auction).await?;

        let highest_before = bids.iter().map(|bid| bid.id).max();
        if let Some(bid) = bids.iter_mut().find(|bid| bid.id == id) {
            bid.cancelled = true;
        }
        tracing::info!(auction_id = %auction.id, bid_id = %id, "bid cancelled");
        let result = bidding::recompute(&mut auction, &mut bids, &ladder);

        let changed = bids
            .iter()
            .filter(|bid| bid.id == id || Some(bid.id) > highest_before)
            .cloned()
            .collect();
        self.store
            .commit(Commit {
                auction: Some(auction),
                bids: changed,
                ..Default::default()
            })
            .await?;
        Ok(result)
    }

    /// Creates a pending registration for a bidder entering the auction.
    pub async fn register_bidder(
        &self,
        id: AuctionId,
        bidder: PartyRef,
    ) -> Result<BidderRegistration, OperationError> {
        let _guard = self.locks.acquire(id).await;
        let auction = self.store.auction(id).await?;
        let registration_id = self.store.next_registration_id().await?;
        let registration = registration::create(registration_id, &auction, bidder)?;
        self.store
            .commit(Commit {
                registrations: vec![registration.clone()],
                ..Default::default()
            })
            .await?;
        Ok(registration)
    }

    pub async fn approve_registration(&self, id: RegistrationId) -> Result<(), OperationError> {
        self.handle_registration(id, registration::approve).await
    }

    pub async fn reject_registration(&self, id: RegistrationId) -> Result<(), OperationError> {
        self.handle_registration(id, registration::reject).await
    }

    pub async fn unapprove_registration(&self, id: RegistrationId) -> Result<(), OperationError> {
        self.handle_registration(id, registration::unapprove).await
    }

    async fn handle_registration(
        &self,
        id: RegistrationId,
        op: impl FnOnce(&mut BidderRegistration, DateTime<Utc>) -> Result<(), RegistrationError>,
    ) -> Result<(), OperationError> {
        let registration = self.store.registration(id).await?;
        let _guard = self.locks.acquire(registration.auction).await;
        // Re-read under the lock so the transition starts from current state.
        let mut registration = self.store.registration(id).await?;
        op(&mut registration, Utc::now())?;
        self.store
            .commit(Commit {
                registrations: vec![registration],
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Batch repair of the autobid flags over one registration's history.
    pub async fn recompute_autobid_flags(
        &self,
        id: RegistrationId,
    ) -> Result<(), OperationError> {
        let registration = self.store.registration(id).await?;
        let _guard = self.locks.acquire(registration.auction).await;
        let mut bids = self.store.bids_of_registration(id).await?;
        registration::recompute_autobid_flags(&mut bids);
        self.store
            .commit(Commit {
                bids,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    pub(crate) async fn schedule(
        &self,
        auction: AuctionId,
        kind: TriggerKind,
        at: DateTime<Utc>,
    ) -> Result<(), OperationError> {
        self.scheduler
            .schedule(TriggerKey { auction, kind }, at)
            .await
            .map_err(OperationError::Scheduler)
    }

    async fn commit_auction(&self, auction: Auction) -> Result<(), OperationError> {
        self.store
            .commit(Commit {
                auction: Some(auction),
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}
