//! Channel Relay — polls a channel feed, stores new items and publishes
//! them to a message bus.

pub mod bus;
pub mod config;
pub mod error;
pub mod feed;
pub mod poller;
pub mod store;
