//! Protocol packets and their byte codec.
//!
//! Layout (all multi-byte fields little-endian):
//!
//! ```text
//! byte 0      type tag
//! bytes 1..   fixed-size payload for the tag
//! [u32]       optional trailing sequence id
//! ```
//!
//! Payload sizes are fixed per tag, so a decoder can tell whether the
//! sequence trailer is present from the datagram length alone.
//!
//! | tag | payload                                              |
//! |-----|------------------------------------------------------|
//! | 0   | `Join`: empty                                        |
//! | 1   | `Welcome`: kind u32, entity id u32, x y z f32        |
//! | 2   | `AvatarSpawn`: kind u32, entity id u32, x y z f32    |
//! | 3   | `Move`: entity id u32, x y z f32                     |
//! | 4   | `Ack`: sequence u32                                  |

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Object-kind code carried by `Welcome` and `AvatarSpawn` in bytes 1..5.
pub const AVATAR_KIND: u32 = 1;

/// Byte offset of the entity id inside an encoded `Welcome`.
pub const WELCOME_ENTITY_OFFSET: usize = 5;

/// Largest encoded packet, used to size receive buffers.
pub const MAX_PACKET_LEN: usize = 1 + 20 + 4;

const SEQUENCE_LEN: usize = 4;

/// Identifier of a simulated entity, as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Wire type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Join = 0,
    Welcome = 1,
    AvatarSpawn = 2,
    Move = 3,
    Ack = 4,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(PacketType::Join),
            1 => Some(PacketType::Welcome),
            2 => Some(PacketType::AvatarSpawn),
            3 => Some(PacketType::Move),
            4 => Some(PacketType::Ack),
            _ => None,
        }
    }

    /// Size of the payload following the tag byte, excluding any sequence.
    pub const fn payload_len(self) -> usize {
        match self {
            PacketType::Join => 0,
            PacketType::Welcome | PacketType::AvatarSpawn => 20,
            PacketType::Move => 16,
            PacketType::Ack => 4,
        }
    }
}

/// Typed packet contents.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Client asks to establish a session.
    Join,
    /// Server tells a new client which entity it owns.
    Welcome {
        kind: u32,
        entity_id: EntityId,
        position: Vec3,
    },
    /// Server announces an avatar to a client.
    AvatarSpawn {
        kind: u32,
        entity_id: EntityId,
        position: Vec3,
    },
    /// Absolute position for an entity. Sent by the owning client and relayed
    /// by the server to everyone else.
    Move { entity_id: EntityId, position: Vec3 },
    /// Server confirms a sequenced packet was processed.
    Ack { sequence: u32 },
}

impl Payload {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Payload::Join => PacketType::Join,
            Payload::Welcome { .. } => PacketType::Welcome,
            Payload::AvatarSpawn { .. } => PacketType::AvatarSpawn,
            Payload::Move { .. } => PacketType::Move,
            Payload::Ack { .. } => PacketType::Ack,
        }
    }

    /// Entity this payload asks to mutate, if any.
    ///
    /// Every mutating variant must report its target here: the server's
    /// ownership check is keyed on this and nothing else.
    pub fn mutation_target(&self) -> Option<EntityId> {
        match self {
            Payload::Move { entity_id, .. } => Some(*entity_id),
            Payload::Join
            | Payload::Welcome { .. }
            | Payload::AvatarSpawn { .. }
            | Payload::Ack { .. } => None,
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub payload: Payload,
    /// Client-chosen id used for duplicate detection and acks.
    pub sequence: Option<u32>,
}

impl Packet {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            sequence: None,
        }
    }

    pub fn join() -> Self {
        Self::new(Payload::Join)
    }

    pub fn welcome(entity_id: EntityId, position: Vec3) -> Self {
        Self::new(Payload::Welcome {
            kind: AVATAR_KIND,
            entity_id,
            position,
        })
    }

    pub fn avatar_spawn(entity_id: EntityId, position: Vec3) -> Self {
        Self::new(Payload::AvatarSpawn {
            kind: AVATAR_KIND,
            entity_id,
            position,
        })
    }

    pub fn move_to(entity_id: EntityId, x: f32, y: f32, z: f32) -> Self {
        Self::new(Payload::Move {
            entity_id,
            position: Vec3::new(x, y, z),
        })
    }

    pub fn ack(sequence: u32) -> Self {
        Self::new(Payload::Ack { sequence })
    }

    /// Attaches a sequence id.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn packet_type(&self) -> PacketType {
        self.payload.packet_type()
    }

    /// Encodes the packet into a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let ty = self.packet_type();
        let seq_len = if self.sequence.is_some() { SEQUENCE_LEN } else { 0 };
        let mut buf = BytesMut::with_capacity(1 + ty.payload_len() + seq_len);
        buf.put_u8(ty as u8);
        match &self.payload {
            Payload::Join => {}
            Payload::Welcome {
                kind,
                entity_id,
                position,
            }
            | Payload::AvatarSpawn {
                kind,
                entity_id,
                position,
            } => {
                buf.put_u32_le(*kind);
                buf.put_u32_le(entity_id.0);
                put_vec3(&mut buf, *position);
            }
            Payload::Move {
                entity_id,
                position,
            } => {
                buf.put_u32_le(entity_id.0);
                put_vec3(&mut buf, *position);
            }
            Payload::Ack { sequence } => buf.put_u32_le(*sequence),
        }
        if let Some(seq) = self.sequence {
            buf.put_u32_le(seq);
        }
        buf.freeze()
    }

    /// Decodes one datagram.
    pub fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        let tag = data.get_u8();
        let ty = PacketType::from_u8(tag).ok_or(DecodeError::UnknownTag(tag))?;
        let len = data.len() + 1;
        let need = ty.payload_len();
        if data.len() < need {
            return Err(DecodeError::Truncated { tag, len });
        }

        let payload = match ty {
            PacketType::Join => Payload::Join,
            PacketType::Welcome => {
                let kind = data.get_u32_le();
                let entity_id = EntityId(data.get_u32_le());
                Payload::Welcome {
                    kind,
                    entity_id,
                    position: get_vec3(&mut data),
                }
            }
            PacketType::AvatarSpawn => {
                let kind = data.get_u32_le();
                let entity_id = EntityId(data.get_u32_le());
                Payload::AvatarSpawn {
                    kind,
                    entity_id,
                    position: get_vec3(&mut data),
                }
            }
            PacketType::Move => {
                let entity_id = EntityId(data.get_u32_le());
                Payload::Move {
                    entity_id,
                    position: get_vec3(&mut data),
                }
            }
            PacketType::Ack => Payload::Ack {
                sequence: data.get_u32_le(),
            },
        };

        let sequence = match data.len() {
            0 => None,
            SEQUENCE_LEN => Some(data.get_u32_le()),
            _ => return Err(DecodeError::TrailingBytes { tag, len }),
        };

        Ok(Self { payload, sequence })
    }
}

fn put_vec3(buf: &mut BytesMut, v: Vec3) {
    for c in v.to_array() {
        buf.put_f32_le(c);
    }
}

fn get_vec3(data: &mut &[u8]) -> Vec3 {
    let x = data.get_f32_le();
    let y = data.get_f32_le();
    let z = data.get_f32_le();
    Vec3::new(x, y, z)
}

/// Reads the entity id out of an encoded `Welcome` without a full decode.
pub fn welcome_entity_id(data: &[u8]) -> Option<EntityId> {
    if data.first() != Some(&(PacketType::Welcome as u8)) {
        return None;
    }
    let raw = data.get(WELCOME_ENTITY_OFFSET..WELCOME_ENTITY_OFFSET + 4)?;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(raw);
    Some(EntityId(u32::from_le_bytes(bytes)))
}

/// Datagram decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Empty,
    UnknownTag(u8),
    Truncated { tag: u8, len: usize },
    TrailingBytes { tag: u8, len: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "empty datagram"),
            DecodeError::UnknownTag(tag) => write!(f, "unknown packet tag {tag}"),
            DecodeError::Truncated { tag, len } => {
                write!(f, "packet tag {tag} truncated at {len} bytes")
            }
            DecodeError::TrailingBytes { tag, len } => {
                write!(f, "packet tag {tag} has trailing bytes ({len} total)")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_a_single_zero_byte() {
        assert_eq!(&Packet::join().encode()[..], &[0u8]);
    }

    #[test]
    fn welcome_layout_matches_wire_contract() {
        let bytes = Packet::welcome(EntityId(0xA1B2_C3D4), Vec3::ZERO).encode();
        assert_eq!(bytes.len(), 21);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..5], &AVATAR_KIND.to_le_bytes());
        assert_eq!(&bytes[5..9], &[0xD4, 0xC3, 0xB2, 0xA1]);
        assert_eq!(welcome_entity_id(&bytes), Some(EntityId(0xA1B2_C3D4)));
    }

    #[test]
    fn welcome_entity_id_rejects_other_tags() {
        let bytes = Packet::avatar_spawn(EntityId(7), Vec3::ZERO).encode();
        assert_eq!(welcome_entity_id(&bytes), None);
        assert_eq!(welcome_entity_id(&[1, 0, 0]), None);
    }

    #[test]
    fn move_decodes_with_and_without_sequence() {
        let plain = Packet::move_to(EntityId(3), 1.0, -2.5, 4.0);
        assert_eq!(Packet::decode(&plain.encode()).unwrap(), plain);

        let sequenced = plain.clone().with_sequence(99);
        let bytes = sequenced.encode();
        assert_eq!(bytes.len(), 1 + 16 + 4);
        assert_eq!(Packet::decode(&bytes).unwrap(), sequenced);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(Packet::decode(&[]), Err(DecodeError::Empty));
        assert_eq!(Packet::decode(&[9]), Err(DecodeError::UnknownTag(9)));
        assert_eq!(
            Packet::decode(&[3, 1, 0]),
            Err(DecodeError::Truncated { tag: 3, len: 3 })
        );
        assert_eq!(
            Packet::decode(&[0, 1, 2]),
            Err(DecodeError::TrailingBytes { tag: 0, len: 3 })
        );
    }

    #[test]
    fn only_move_names_a_mutation_target() {
        assert_eq!(
            Packet::move_to(EntityId(5), 0.0, 0.0, 0.0)
                .payload
                .mutation_target(),
            Some(EntityId(5))
        );
        assert_eq!(Payload::Join.mutation_target(), None);
        assert_eq!(Payload::Ack { sequence: 1 }.mutation_target(), None);
    }

    #[test]
    fn max_packet_len_covers_largest_variant() {
        let bytes = Packet::avatar_spawn(EntityId(1), Vec3::new(1.0, 2.0, 3.0))
            .with_sequence(1)
            .encode();
        assert_eq!(bytes.len(), MAX_PACKET_LEN);
    }
}
