//! API clients for communicating with GDAX.
//!
//! This module contains:
//!
//! - [`rest`] - HTTP client for snapshots and market data
//! - [`websocket`] - WebSocket client for the real-time feed
//! - [`auth`] - HMAC-SHA256 request signing

pub mod auth;
pub mod rest;
pub mod websocket;

pub use auth::Signer;
pub use rest::RestClient;
pub use websocket::{FeedClient, ReconnectingFeed};
