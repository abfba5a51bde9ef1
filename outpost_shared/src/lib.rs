//! `outpost_shared`
//!
//! Shared libraries used by the server and its tests.
//!
//! Design goals:
//! - Deterministic: nothing here reads the wall clock except `TickClock`.
//! - Explicit, versionable byte codec for packets.
//! - Traits at the I/O seams (transport, clock) so the server can be driven
//!   step by step from tests.
//! - No `unsafe`.

pub mod clock;
pub mod config;
pub mod endpoint;
pub mod math;
pub mod packet;
pub mod transport;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::clock::*;
    pub use crate::config::*;
    pub use crate::endpoint::*;
    pub use crate::math::*;
    pub use crate::packet::*;
    pub use crate::transport::*;
}
