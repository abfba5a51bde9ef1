//! `outpost_server`
//!
//! Server-side systems:
//! - Session table keyed by transport endpoint
//! - Entity table (one avatar per client)
//! - Single-stepped packet dispatch with ownership checks, duplicate
//!   detection and malus bookkeeping
//!
//! Networking model:
//! - UDP only; every datagram is one packet
//! - Transport and clock are injected, so tests drive the loop one step at a
//!   time over in-memory queues

pub mod entity;
pub mod server;
pub mod session;

pub use server::{GameServer, StepOutcome};
