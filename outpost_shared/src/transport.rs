//! Datagram transports.
//!
//! The server core only needs two operations: pull the next inbound datagram
//! and fire one off to an endpoint. Both are synchronous and non-blocking;
//! buffering is the transport's problem.
//!
//! Two implementations:
//! - [`FakeTransport`]: in-memory queues, for deterministic tests.
//! - [`UdpTransport`]: a tokio UDP socket polled with `try_recv_from`.

use std::{collections::VecDeque, fmt, io, net::SocketAddr};

use anyhow::Context;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::{
    endpoint::Endpoint,
    packet::{DecodeError, Packet, MAX_PACKET_LEN},
};

/// Packet transport used by the server loop.
pub trait Transport {
    /// Takes the next inbound datagram.
    fn recv(&mut self) -> Result<(Packet, Endpoint), TransportError>;

    /// Queues a packet for delivery. Fire-and-forget.
    fn send(&mut self, packet: &Packet, to: &Endpoint);
}

/// Transport errors.
#[derive(Debug)]
pub enum TransportError {
    /// Nothing to read right now.
    QueueEmpty,
    /// A datagram arrived but could not be decoded; it has been consumed.
    Malformed { from: Endpoint, reason: DecodeError },
    Io(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::QueueEmpty => write!(f, "queue empty"),
            TransportError::Malformed { from, reason } => {
                write!(f, "malformed datagram from {from}: {reason}")
            }
            TransportError::Io(e) => write!(f, "transport io: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Malformed { reason, .. } => Some(reason),
            TransportError::Io(e) => Some(e),
            TransportError::QueueEmpty => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

/// A datagram the server sent, as seen by the client side of a fake.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub data: Bytes,
    pub end_point: Endpoint,
}

impl Outbound {
    /// Decodes the raw bytes back into a packet.
    pub fn packet(&self) -> Result<Packet, DecodeError> {
        Packet::decode(&self.data)
    }
}

/// In-memory transport with one queue per direction.
///
/// Inbound packets are stored encoded and decoded on `recv`, so the codec is
/// exercised on both legs exactly as on a real socket.
#[derive(Debug, Default)]
pub struct FakeTransport {
    server_queue: VecDeque<(Bytes, Endpoint)>,
    client_queue: VecDeque<Outbound>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a client datagram arriving at the server.
    pub fn client_enqueue(&mut self, packet: &Packet, address: &str, port: u16) {
        self.client_enqueue_raw(packet.encode(), address, port);
    }

    /// Like [`client_enqueue`](Self::client_enqueue) but with arbitrary bytes.
    pub fn client_enqueue_raw(&mut self, data: impl Into<Bytes>, address: &str, port: u16) {
        self.server_queue
            .push_back((data.into(), Endpoint::new(address, port)));
    }

    /// Takes the oldest datagram the server sent.
    pub fn client_dequeue(&mut self) -> Result<Outbound, TransportError> {
        self.client_queue
            .pop_front()
            .ok_or(TransportError::QueueEmpty)
    }

    /// Number of datagrams sent by the server and not yet dequeued.
    pub fn client_queue_count(&self) -> usize {
        self.client_queue.len()
    }

    /// Number of inbound datagrams not yet consumed by the server.
    pub fn server_queue_count(&self) -> usize {
        self.server_queue.len()
    }
}

impl Transport for FakeTransport {
    fn recv(&mut self) -> Result<(Packet, Endpoint), TransportError> {
        let (data, from) = self
            .server_queue
            .pop_front()
            .ok_or(TransportError::QueueEmpty)?;
        match Packet::decode(&data) {
            Ok(packet) => Ok((packet, from)),
            Err(reason) => Err(TransportError::Malformed { from, reason }),
        }
    }

    fn send(&mut self, packet: &Packet, to: &Endpoint) {
        self.client_queue.push_back(Outbound {
            data: packet.encode(),
            end_point: to.clone(),
        });
    }
}

/// UDP transport over a non-blocking tokio socket.
///
/// Must be created inside a tokio runtime; reads only see datagrams once the
/// runtime's reactor has observed readiness, so drivers should yield between
/// polls.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await.context("udp bind")?;
        Ok(Self {
            socket,
            // One spare byte so oversized datagrams fail decoding instead of
            // being silently truncated into something valid.
            buf: vec![0u8; MAX_PACKET_LEN + 1],
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Transport for UdpTransport {
    fn recv(&mut self) -> Result<(Packet, Endpoint), TransportError> {
        let (n, from) = match self.socket.try_recv_from(&mut self.buf) {
            Ok(ok) => ok,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(TransportError::QueueEmpty)
            }
            Err(e) => return Err(TransportError::Io(e)),
        };
        let from = Endpoint::from(from);
        match Packet::decode(&self.buf[..n]) {
            Ok(packet) => Ok((packet, from)),
            Err(reason) => Err(TransportError::Malformed { from, reason }),
        }
    }

    fn send(&mut self, packet: &Packet, to: &Endpoint) {
        let Some(addr) = to.to_socket_addr() else {
            warn!(endpoint = %to, "Endpoint is not a socket address, dropping packet");
            return;
        };
        let payload = packet.encode();
        match self.socket.try_send_to(&payload, addr) {
            Ok(_) => debug!(endpoint = %to, ty = ?packet.packet_type(), "Sent packet"),
            Err(e) => warn!(endpoint = %to, error = %e, "UDP send failed, dropping packet"),
        }
    }
}
