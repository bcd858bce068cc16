//! External collaborators the engine consumes through narrow interfaces:
//! persistence, wall-clock scheduling, lifecycle notifications and the
//! per-auction mutual exclusion used by the closing path.

pub mod mem;

use {
    crate::bidding::BidFailure,
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    model::{
        auction::Auction,
        bid::Bid,
        registration::BidderRegistration,
        AuctionId, BidId, PartyRef, RegistrationId,
    },
    std::{collections::HashMap, sync::Arc},
    thiserror::Error,
    tokio::sync::{Mutex, OwnedMutexGuard},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("auction {0} not found")]
    AuctionNotFound(AuctionId),
    #[error("bid {0} not found")]
    BidNotFound(BidId),
    #[error("registration {0} not found")]
    RegistrationNotFound(RegistrationId),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One atomic write: everything in it is persisted in a single transaction
/// or not at all. Bids and registrations are upserted by id.
#[derive(Clone, Debug, Default)]
pub struct Commit {
    pub auction: Option<Auction>,
    pub bids: Vec<Bid>,
    pub registrations: Vec<BidderRegistration>,
}

impl Commit {
    pub fn is_empty(&self) -> bool {
        self.auction.is_none() && self.bids.is_empty() && self.registrations.is_empty()
    }
}

/// Persistence. The store must apply [`Commit`]s atomically; serialization
/// of writers for one auction is the caller's job via [`AuctionLocks`].
#[async_trait]
pub trait Store: Send + Sync {
    async fn auction(&self, id: AuctionId) -> Result<Auction, StoreError>;
    /// All bids of the auction, cancelled ones included.
    async fn bids(&self, auction: AuctionId) -> Result<Vec<Bid>, StoreError>;
    async fn bid(&self, id: BidId) -> Result<Bid, StoreError>;
    async fn registration(&self, id: RegistrationId)
        -> Result<BidderRegistration, StoreError>;
    async fn registration_of(
        &self,
        auction: AuctionId,
        bidder: &PartyRef,
    ) -> Result<Option<BidderRegistration>, StoreError>;
    async fn bids_of_registration(&self, id: RegistrationId) -> Result<Vec<Bid>, StoreError>;
    async fn next_registration_id(&self) -> Result<RegistrationId, StoreError>;
    async fn commit(&self, write: Commit) -> Result<(), StoreError>;
}

/// Which scheduled check a trigger fires.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TriggerKind {
    /// Evaluate closing at the auction's live deadline.
    Close,
    /// Fire the "bidding is close to its end" notification.
    CloseToEnd,
}

/// Key identifying one (re)schedulable trigger.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TriggerKey {
    pub auction: AuctionId,
    pub kind: TriggerKind,
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let kind = match self.kind {
            TriggerKind::Close => "close",
            TriggerKind::CloseToEnd => "close_to_end",
        };
        write!(f, "{kind}:{}", self.auction)
    }
}

/// Fires a named operation at (or after) a wall-clock time. Scheduling an
/// existing key replaces the previous time; delivery may be at-least-once,
/// which the checks themselves tolerate.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, key: TriggerKey, at: DateTime<Utc>) -> anyhow::Result<()>;
    async fn cancel(&self, key: TriggerKey) -> anyhow::Result<()>;
}

/// Notification sink for lifecycle moments. Every hook is a no-op by
/// default; hosts override what they care about.
#[async_trait]
pub trait Hooks: Send + Sync {
    async fn after_start_sale(&self, _auction: &Auction) {}
    async fn after_bid_appended(&self, _auction: &Auction, _bid: &Bid) {}
    async fn after_bid_not_appended(&self, _auction: &Auction, _failure: &BidFailure) {}
    async fn before_bidding_is_close_to_end(&self, _auction: &Auction) {}
    async fn after_close_bidding(&self, _auction: &Auction) {}
    async fn after_sold_in_auction(&self, _auction: &Auction) {}
    async fn after_not_sold_in_auction(&self, _auction: &Auction) {}
}

/// The do-nothing sink.
pub struct NoopHooks;

#[async_trait]
impl Hooks for NoopHooks {}

/// Mutual exclusion keyed by auction identity. Scoped to exactly the
/// read-evaluate-transition sequence of one check or bid application; no
/// cross-auction coordination.
#[derive(Default)]
pub struct AuctionLocks {
    locks: std::sync::Mutex<HashMap<AuctionId, Arc<Mutex<()>>>>,
}

impl AuctionLocks {
    pub async fn acquire(&self, auction: AuctionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("auction lock registry poisoned");
            Arc::clone(locks.entry(auction).or_default())
        };
        lock.lock_owned().await
    }
}
