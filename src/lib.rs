//! Referendum Alert — OpenGov vote notifier.
//!
//! Chats subscribe to referenda on Polkadot or Kusama; a periodic pass
//! polls external vote providers and pushes every newly observed vote to
//! the subscribers, tracking a per-(referendum, network) watermark so
//! each vote is announced once, in chronological order.

pub mod commands;
pub mod config;
pub mod format;
pub mod identity;
pub mod notifier;
pub mod server;
pub mod sources;
pub mod store;
pub mod telegram;
pub mod types;
