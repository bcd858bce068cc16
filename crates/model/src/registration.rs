//! Bidder registrations: the approval record that authorizes a bidder to
//! participate in one auction.

use {
    crate::{AuctionId, PartyRef, RegistrationId},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    strum::{Display, EnumString},
};

#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegistrationState {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// One registration per (auction, bidder) pair. A bid cannot exist without
/// an approved registration for the bid's target auction.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct BidderRegistration {
    pub id: RegistrationId,
    pub auction: AuctionId,
    pub bidder: PartyRef,
    pub state: RegistrationState,
    pub handled_at: Option<DateTime<Utc>>,
    /// Bidder's opt-out of the bid confirmation UI. Persisted even when the
    /// bid attempt it arrived with fails.
    pub dont_confirm_bids: bool,
}

impl BidderRegistration {
    pub fn new(id: RegistrationId, auction: AuctionId, bidder: PartyRef) -> Self {
        Self {
            id,
            auction,
            bidder,
            state: RegistrationState::Pending,
            handled_at: None,
            dont_confirm_bids: false,
        }
    }

    pub fn approved(&self) -> bool {
        self.state == RegistrationState::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_pending() {
        let registration =
            BidderRegistration::new(RegistrationId(1), AuctionId(1), PartyRef::new("user", 3));
        assert_eq!(registration.state, RegistrationState::Pending);
        assert!(!registration.approved());
        assert!(registration.handled_at.is_none());
    }

    #[test]
    fn state_string_forms() {
        assert_eq!(RegistrationState::Approved.to_string(), "approved");
        assert_eq!(
            "rejected".parse::<RegistrationState>().unwrap(),
            RegistrationState::Rejected
        );
    }
}
