//! Tether hub library.
//!
//! The hub is the relay-side routing core of the Tether bridge: it sits
//! between the cloud relay transport and local agent sessions, multiplexing
//! many client devices against many independent conversations.

pub mod driver;
pub mod history;
pub mod hub;
pub mod permission;
pub mod persist;
pub mod relay;
pub mod settings;
pub mod store;
