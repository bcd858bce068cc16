//! Contains the domain types shared between the bidding engine and its
//! callers: identifiers, money, auctions, bids and bidder registrations.

pub mod auction;
pub mod bid;
pub mod ladder;
pub mod money;
pub mod registration;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Copy,
            Clone,
            Debug,
            Default,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            Deserialize,
            Serialize,
            derive_more::Display,
            derive_more::From,
            derive_more::Into,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);
    };
}

id_type!(AuctionId);
id_type!(BidId);
id_type!(RegistrationId);

/// A reference to a party living outside the core: sellers, buyers and
/// bidders are all "some record of some kind" to the engine. The kind tag
/// is resolved through the registry built at process startup.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct PartyRef {
    pub kind: Kind,
    pub id: i64,
}

impl PartyRef {
    pub fn new(kind: impl Into<Kind>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl std::fmt::Display for PartyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Tag identifying which external model a [`PartyRef`] points at.
#[derive(
    Clone,
    Debug,
    Default,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Deserialize,
    Serialize,
    derive_more::Display,
)]
#[serde(transparent)]
pub struct Kind(pub String);

impl From<&str> for Kind {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn party_ref_display() {
        let party = PartyRef::new("user", 7);
        assert_eq!(party.to_string(), "user:7");
    }

    #[test]
    fn party_ref_serde() {
        let party = PartyRef::new("user", 7);
        let json = serde_json::to_value(&party).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "user", "id": 7}));
        assert_eq!(
            serde_json::from_value::<PartyRef>(json).unwrap(),
            party
        );
    }

    #[test]
    fn ids_are_transparent_in_serde() {
        assert_eq!(serde_json::to_string(&AuctionId(42)).unwrap(), "42");
        assert_eq!(
            serde_json::from_str::<BidId>("13").unwrap(),
            BidId(13)
        );
    }
}
