//! Server implementation.
//!
//! An authoritative, step-driven server loop. Each call to
//! [`GameServer::single_step`] pulls at most one datagram from the transport,
//! resolves the sender's session, decides what the packet is allowed to do,
//! and pushes the resulting packets back out.
//!
//! Determinism notes:
//! - One inbound item per step, never more.
//! - The loop reads the clock but never advances it.
//! - Broadcasts iterate sessions in join order and entities in id order.
//!
//! Hostile input never escapes a step: duplicate, unauthorized and redundant
//! packets are absorbed (dropped or counted as malus), not returned as errors.

use std::net::SocketAddr;

use anyhow::Context;
use outpost_shared::{
    clock::{Clock, TickClock},
    config::ServerConfig,
    endpoint::Endpoint,
    math::Vec3,
    packet::{EntityId, Packet, Payload},
    transport::{Transport, TransportError, UdpTransport},
};
use tracing::{debug, info, warn};

use crate::{
    entity::{Entity, EntityError, EntityTable},
    session::{ClientSession, Resolved, SessionTable},
};

/// What a single step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing was waiting.
    Idle,
    /// A datagram was consumed but could not be decoded.
    Dropped,
    /// A packet was dispatched.
    Processed,
}

/// Session-level decision about one packet.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Verdict {
    /// Sequence id already processed for this session.
    Duplicate(u32),
    Rejected(Rejection),
    /// Server-to-client payload sent by a client.
    Ignored,
    Accepted { ack: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Rejection {
    NotOwner { target: EntityId, owned: EntityId },
    NonFinite(Vec3),
}

/// Game server.
pub struct GameServer<T, C> {
    cfg: ServerConfig,
    transport: T,
    clock: C,
    sessions: SessionTable,
    entities: EntityTable,
}

impl<T: Transport, C: Clock> GameServer<T, C> {
    pub fn new(cfg: ServerConfig, transport: T, clock: C) -> Self {
        let sessions = SessionTable::new(cfg.ack_window);
        Self {
            cfg,
            transport,
            clock,
            sessions,
            entities: EntityTable::new(),
        }
    }

    /// Current tick, straight from the clock.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn num_clients(&self) -> usize {
        self.sessions.count()
    }

    pub fn num_game_objects(&self) -> usize {
        self.entities.count()
    }

    pub fn game_object(&self, id: EntityId) -> Result<&Entity, EntityError> {
        self.entities.get(id)
    }

    pub fn session(&self, endpoint: &Endpoint) -> Option<&ClientSession> {
        self.sessions.get(endpoint)
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Processes at most one inbound datagram.
    ///
    /// Only transport I/O failures are returned as errors.
    pub fn single_step(&mut self) -> anyhow::Result<StepOutcome> {
        match self.transport.recv() {
            Ok((packet, from)) => {
                self.dispatch(packet, from);
                Ok(StepOutcome::Processed)
            }
            Err(TransportError::QueueEmpty) => Ok(StepOutcome::Idle),
            Err(TransportError::Malformed { from, reason }) => {
                debug!(endpoint = %from, %reason, "Dropping malformed datagram");
                Ok(StepOutcome::Dropped)
            }
            Err(e @ TransportError::Io(_)) => Err(e).context("transport recv"),
        }
    }

    /// Calls [`single_step`](Self::single_step) until the transport is idle
    /// or `max_steps` items were consumed. Returns the number consumed.
    pub fn run_until_idle(&mut self, max_steps: usize) -> anyhow::Result<usize> {
        let mut consumed = 0;
        while consumed < max_steps {
            if self.single_step()? == StepOutcome::Idle {
                break;
            }
            consumed += 1;
        }
        Ok(consumed)
    }

    fn dispatch(&mut self, packet: Packet, from: Endpoint) {
        let now = self.clock.now();
        let (owned, created, verdict) = {
            let Resolved { session, created } =
                match self.sessions.resolve(&from, &mut self.entities, now) {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        warn!(endpoint = %from, error = %e, "Cannot create session");
                        return;
                    }
                };
            let verdict = judge(session, created, &packet);
            (session.entity_id, created, verdict)
        };

        if created {
            self.announce_join(&from, owned);
        }

        match verdict {
            Verdict::Duplicate(sequence) => {
                debug!(endpoint = %from, sequence, "Duplicate packet, re-acking");
                self.transport.send(&Packet::ack(sequence), &from);
            }
            Verdict::Rejected(Rejection::NotOwner { target, owned }) => {
                debug!(endpoint = %from, %target, %owned, "Rejected mutation of unowned entity");
            }
            Verdict::Rejected(Rejection::NonFinite(position)) => {
                debug!(endpoint = %from, ?position, "Rejected non-finite position");
            }
            Verdict::Ignored => {
                debug!(endpoint = %from, ty = ?packet.packet_type(), "Ignoring server-only packet");
            }
            Verdict::Accepted { ack } => {
                self.apply(&packet.payload, &from, owned, created);
                if let Some(sequence) = ack {
                    self.transport.send(&Packet::ack(sequence), &from);
                }
            }
        }
    }

    fn apply(&mut self, payload: &Payload, from: &Endpoint, owned: EntityId, created: bool) {
        match payload {
            Payload::Join => {
                if !created {
                    self.resync(from, owned);
                }
            }
            Payload::Move {
                entity_id,
                position,
            } => {
                if !self.entities.set_position(*entity_id, *position) {
                    return;
                }
                let relay = Packet::new(payload.clone());
                for peer in self.sessions.iter().filter(|s| s.endpoint != *from) {
                    self.transport.send(&relay, &peer.endpoint);
                }
            }
            Payload::Welcome { .. } | Payload::AvatarSpawn { .. } | Payload::Ack { .. } => {}
        }
    }

    /// Answers a redundant Join with the sender's own avatar as it stands now.
    /// Never a second Welcome.
    fn resync(&mut self, to: &Endpoint, entity_id: EntityId) {
        let Ok(entity) = self.entities.get(entity_id) else {
            return;
        };
        let spawn = Packet::avatar_spawn(entity.id, entity.position);
        debug!(endpoint = %to, entity = %entity_id, "Redundant join, resending own avatar");
        self.transport.send(&spawn, to);
    }

    /// Resyncs every existing peer with the full avatar list (the new one
    /// included), welcomes the joiner, then tells the joiner about every
    /// avatar that was already there.
    fn announce_join(&mut self, joiner: &Endpoint, entity_id: EntityId) {
        let position = self
            .entities
            .get(entity_id)
            .map(|e| e.position)
            .unwrap_or_default();

        let roster: Vec<Packet> = self
            .entities
            .iter()
            .map(|e| Packet::avatar_spawn(e.id, e.position))
            .collect();
        for peer in self.sessions.iter().filter(|s| s.endpoint != *joiner) {
            for spawn in &roster {
                self.transport.send(spawn, &peer.endpoint);
            }
        }

        self.transport
            .send(&Packet::welcome(entity_id, position), joiner);

        for other in self.entities.iter().filter(|e| e.id != entity_id) {
            self.transport
                .send(&Packet::avatar_spawn(other.id, other.position), joiner);
        }

        info!(
            endpoint = %joiner,
            entity = %entity_id,
            clients = self.sessions.count(),
            "Client joined"
        );
    }
}

impl GameServer<UdpTransport, TickClock> {
    /// Binds a UDP server at `cfg.server_addr`.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let transport = UdpTransport::bind(addr).await?;
        let clock = TickClock::new(cfg.tick_hz);
        Ok(Self::new(cfg, transport, clock))
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.transport.local_addr()
    }
}

/// Applies session-local bookkeeping (malus, ack window) and decides what the
/// packet may do. Never touches other sessions or the entity table.
fn judge(session: &mut ClientSession, created: bool, packet: &Packet) -> Verdict {
    if let Some(sequence) = packet.sequence {
        if session.acknowledged.contains(sequence) {
            session.malus += 1;
            return Verdict::Duplicate(sequence);
        }
    }

    if let Some(target) = packet.payload.mutation_target() {
        if !session.owns(target) {
            return Verdict::Rejected(Rejection::NotOwner {
                target,
                owned: session.entity_id,
            });
        }
    }

    match &packet.payload {
        Payload::Join => {
            if !created {
                session.malus += 1;
            }
        }
        Payload::Move { position, .. } => {
            if !position.is_finite() {
                return Verdict::Rejected(Rejection::NonFinite(*position));
            }
        }
        Payload::Welcome { .. } | Payload::AvatarSpawn { .. } | Payload::Ack { .. } => {
            return Verdict::Ignored;
        }
    }

    if let Some(sequence) = packet.sequence {
        session.acknowledged.record(sequence);
    }
    Verdict::Accepted {
        ack: packet.sequence,
    }
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral(
    tick_hz: u32,
) -> anyhow::Result<(GameServer<UdpTransport, TickClock>, ServerConfig)> {
    let cfg = ServerConfig {
        server_addr: "127.0.0.1:0".to_string(),
        tick_hz,
        ..Default::default()
    };
    let mut server = GameServer::bind(cfg).await?;
    server.cfg.server_addr = server.local_addr()?.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}
