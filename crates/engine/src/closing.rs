//! Deadline-driven checks fired by the scheduler.
//!
//! Both checks re-read the auction under its lock and re-evaluate their
//! condition against the stored state, so stale and duplicate deliveries
//! degrade to no-ops. A trigger scheduled for a deadline that has since
//! moved (an anti-snipe extension landed after the fire was enqueued) finds
//! the deadline in the future and yields to the rescheduled trigger.

use {
    crate::house::{AuctionHouse, OperationError},
    chrono::{DateTime, Utc},
    model::{auction::AuctionState, AuctionId},
};

impl AuctionHouse {
    /// Closes the auction if its live deadline has passed. Safe under
    /// at-least-once delivery and after reschedules.
    pub async fn closing_check(
        &self,
        id: AuctionId,
        now: DateTime<Utc>,
    ) -> Result<(), OperationError> {
        let _guard = self.locks.acquire(id).await;
        let auction = self.store.auction(id).await?;

        if auction.state != AuctionState::InSale {
            tracing::debug!(auction_id = %id, state = %auction.state, "closing check: not in sale");
            return Ok(());
        }
        if auction.must_be_closed_manually {
            tracing::debug!(auction_id = %id, "closing check: awaiting manual close");
            return Ok(());
        }
        if auction.effective_deadline() > now {
            tracing::debug!(
                auction_id = %id,
                deadline = %auction.effective_deadline(),
                "closing check: deadline moved"
            );
            return Ok(());
        }

        let bids = self.store.bids(id).await?;
        self.close_under_lock(auction, bids).await
    }

    /// Fires the close-to-end notification for auctions still in sale. The
    /// notification is meaningless once bidding has ended, so a late fire
    /// does nothing.
    pub async fn close_to_end_check(
        &self,
        id: AuctionId,
        now: DateTime<Utc>,
    ) -> Result<(), OperationError> {
        let _guard = self.locks.acquire(id).await;
        let auction = self.store.auction(id).await?;

        if auction.state == AuctionState::InSale && auction.effective_deadline() > now {
            self.hooks.before_bidding_is_close_to_end(&auction).await;
        }
        Ok(())
    }
}
