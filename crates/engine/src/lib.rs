//! The auction engine: bid application with proxy bidding, the auction
//! lifecycle state machine, bidder registration handling and time-based
//! closing.
//!
//! The engine owns no I/O of its own. Persistence, scheduling and
//! notifications are consumed through the traits in [`infra`]; the
//! [`house::AuctionHouse`] facade wires them around the pure algorithms.

pub mod bidding;
pub mod closing;
pub mod config;
pub mod house;
pub mod infra;
pub mod lifecycle;
pub mod registration;
pub mod registry;
pub mod validation;

pub use {
    config::Settings,
    house::{AuctionHouse, BidOutcome, BidRequest, OperationError},
};
