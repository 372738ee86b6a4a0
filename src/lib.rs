//! Capture Arena Server Library
//!
//! Authoritative state synchronization for a two-team capture-the-flag arena:
//! flags, team score and buffs, coin custody, command de-duplication and
//! replication to non-authoritative peers.
//!
//! # Features
//!
//! - `metrics_server` - Prometheus/JSON metrics endpoint in the binary (enabled by default)

pub mod command;
pub mod config;
pub mod game;
pub mod metrics;
pub mod net;
pub mod util;
