//! Fishing Outcome Server Library
//!
//! Authoritative fishing rules for a multiplayer island: species sampling,
//! bite timing, catch windows and scoring, served over WebSocket.
//!
//! # Features
//!
//! - `dos_ratelimit` - Per-message rate limiting on client sockets (enabled by default)

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod metrics;
