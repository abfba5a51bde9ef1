//! Shared helpers for the integration tests.

use outpost_server::GameServer;
use outpost_shared::{
    clock::{FakeClock, TickClock},
    config::ServerConfig,
    packet::{welcome_entity_id, EntityId},
    transport::{FakeTransport, Outbound, UdpTransport},
};

/// Server wired to in-memory transport and a manual clock.
pub type FakeServer = GameServer<FakeTransport, FakeClock>;

/// Server on a real UDP socket.
pub type UdpServer = GameServer<UdpTransport, TickClock>;

/// Fresh server with default config.
pub fn fake_server() -> FakeServer {
    fake_server_with(ServerConfig::default())
}

pub fn fake_server_with(cfg: ServerConfig) -> FakeServer {
    GameServer::new(cfg, FakeTransport::new(), FakeClock::new())
}

/// Entity id carried by a `Welcome` datagram.
///
/// Panics if `out` is not a well-formed `Welcome`.
pub fn welcome_id(out: &Outbound) -> EntityId {
    welcome_entity_id(&out.data)
        .unwrap_or_else(|| panic!("not a Welcome: {:?}", out.data.as_ref()))
}

/// Installs a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}
