//! In-memory collaborator implementations. The engine is tested against
//! these; hosts swap in database- and queue-backed ones with the same
//! contracts.

use {
    super::{Commit, Scheduler, Store, StoreError, TriggerKey},
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    model::{
        auction::Auction,
        bid::Bid,
        registration::BidderRegistration,
        AuctionId, BidId, PartyRef, RegistrationId,
    },
    std::collections::{BTreeMap, HashMap},
    tokio::sync::Mutex,
};

#[derive(Default)]
struct Records {
    auctions: HashMap<AuctionId, Auction>,
    bids: BTreeMap<BidId, Bid>,
    registrations: HashMap<RegistrationId, BidderRegistration>,
    next_registration_id: i64,
}

/// Store keeping everything under one mutex, which is what makes each
/// [`Commit`] atomic.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    /// Seeds an auction, for tests and demo hosts.
    pub async fn insert_auction(&self, auction: Auction) {
        self.records
            .lock()
            .await
            .auctions
            .insert(auction.id, auction);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn auction(&self, id: AuctionId) -> Result<Auction, StoreError> {
        self.records
            .lock()
            .await
            .auctions
            .get(&id)
            .cloned()
            .ok_or(StoreError::AuctionNotFound(id))
    }

    async fn bids(&self, auction: AuctionId) -> Result<Vec<Bid>, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .bids
            .values()
            .filter(|bid| bid.auction == auction)
            .cloned()
            .collect())
    }

    async fn bid(&self, id: BidId) -> Result<Bid, StoreError> {
        self.records
            .lock()
            .await
            .bids
            .get(&id)
            .cloned()
            .ok_or(StoreError::BidNotFound(id))
    }

    async fn registration(
        &self,
        id: RegistrationId,
    ) -> Result<BidderRegistration, StoreError> {
        self.records
            .lock()
            .await
            .registrations
            .get(&id)
            .cloned()
            .ok_or(StoreError::RegistrationNotFound(id))
    }

    async fn registration_of(
        &self,
        auction: AuctionId,
        bidder: &PartyRef,
    ) -> Result<Option<BidderRegistration>, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .registrations
            .values()
            .find(|registration| {
                registration.auction == auction && registration.bidder == *bidder
            })
            .cloned())
    }

    async fn bids_of_registration(&self, id: RegistrationId) -> Result<Vec<Bid>, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .bids
            .values()
            .filter(|bid| bid.registration == id)
            .cloned()
            .collect())
    }

    async fn next_registration_id(&self) -> Result<RegistrationId, StoreError> {
        let mut records = self.records.lock().await;
        records.next_registration_id += 1;
        Ok(RegistrationId(records.next_registration_id))
    }

    async fn commit(&self, write: Commit) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if let Some(auction) = write.auction {
            records.auctions.insert(auction.id, auction);
        }
        for bid in write.bids {
            records.bids.insert(bid.id, bid);
        }
        for registration in write.registrations {
            records.registrations.insert(registration.id, registration);
        }
        Ok(())
    }
}

/// Scheduler that records the latest requested fire time per key. Tests
/// drive the fires by hand via [`MemoryScheduler::due`].
#[derive(Default)]
pub struct MemoryScheduler {
    triggers: std::sync::Mutex<HashMap<TriggerKey, DateTime<Utc>>>,
}

impl MemoryScheduler {
    pub fn scheduled_at(&self, key: TriggerKey) -> Option<DateTime<Utc>> {
        self.triggers.lock().expect("scheduler poisoned").get(&key).copied()
    }

    /// Keys whose fire time has passed, removed from the schedule.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<TriggerKey> {
        let mut triggers = self.triggers.lock().expect("scheduler poisoned");
        let due: Vec<TriggerKey> = triggers
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &due {
            triggers.remove(key);
        }
        due
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    async fn schedule(&self, key: TriggerKey, at: DateTime<Utc>) -> anyhow::Result<()> {
        tracing::debug!(%key, %at, "scheduling trigger");
        self.triggers.lock().expect("scheduler poisoned").insert(key, at);
        Ok(())
    }

    async fn cancel(&self, key: TriggerKey) -> anyhow::Result<()> {
        self.triggers.lock().expect("scheduler poisoned").remove(&key);
        Ok(())
    }
}
