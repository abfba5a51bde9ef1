//! Entity storage.
//!
//! One entity kind only: an avatar with a position. Ids are handed out
//! monotonically from 1 and never reused; the table is append-only. Once the
//! `u32` id space is used up, `create` fails instead of wrapping.

use std::{collections::BTreeMap, fmt};

use outpost_shared::{math::Vec3, packet::EntityId};

/// A simulated avatar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub position: Vec3,
}

impl Entity {
    pub fn x(&self) -> f32 {
        self.position.x
    }

    pub fn y(&self) -> f32 {
        self.position.y
    }

    pub fn z(&self) -> f32 {
        self.position.z
    }
}

/// Owns every entity. Iteration is in id order.
#[derive(Debug)]
pub struct EntityTable {
    /// `None` once `u32::MAX` has been handed out.
    next_id: Option<u32>,
    entities: BTreeMap<EntityId, Entity>,
}

impl Default for EntityTable {
    fn default() -> Self {
        Self {
            next_id: Some(1),
            entities: BTreeMap::new(),
        }
    }
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn with_next_id(next: u32) -> Self {
        Self {
            next_id: Some(next),
            ..Self::default()
        }
    }

    /// Creates an entity at the origin.
    pub fn create(&mut self) -> Result<EntityId, EntityError> {
        let raw = self.next_id.ok_or(EntityError::IdSpaceExhausted)?;
        let id = EntityId(raw);
        self.next_id = raw.checked_add(1);
        self.entities.insert(
            id,
            Entity {
                id,
                position: Vec3::ZERO,
            },
        );
        Ok(id)
    }

    /// Looks up an entity.
    pub fn get(&self, id: EntityId) -> Result<&Entity, EntityError> {
        self.entities.get(&id).ok_or(EntityError::NotFound(id))
    }

    /// Overwrites an entity's position. Returns `false` if `id` is unknown.
    pub fn set_position(&mut self, id: EntityId, position: Vec3) -> bool {
        match self.entities.get_mut(&id) {
            Some(e) => {
                e.position = position;
                true
            }
            None => false,
        }
    }

    /// Number of live entities.
    pub fn count(&self) -> usize {
        self.entities.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }
}

/// Entity table errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    NotFound(EntityId),
    /// Every `u32` id has been allocated.
    IdSpaceExhausted,
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityError::NotFound(id) => write!(f, "entity {id} not found"),
            EntityError::IdSpaceExhausted => write!(f, "entity id space exhausted"),
        }
    }
}

impl std::error::Error for EntityError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_unique_ids_at_origin() {
        let mut table = EntityTable::new();
        let a = table.create().unwrap();
        let b = table.create().unwrap();
        assert_ne!(a, b);
        assert_eq!(table.count(), 2);
        assert_eq!(table.get(a).unwrap().position, Vec3::ZERO);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let table = EntityTable::new();
        assert_eq!(
            table.get(EntityId(7)),
            Err(EntityError::NotFound(EntityId(7)))
        );
    }

    #[test]
    fn set_position_overwrites() {
        let mut table = EntityTable::new();
        let id = table.create().unwrap();
        assert!(table.set_position(id, Vec3::new(1.0, 2.0, 3.0)));
        assert!(table.set_position(id, Vec3::new(-4.0, 0.5, 9.0)));
        let e = table.get(id).unwrap();
        assert_eq!((e.x(), e.y(), e.z()), (-4.0, 0.5, 9.0));
    }

    #[test]
    fn set_position_on_unknown_id_is_a_no_op() {
        let mut table = EntityTable::new();
        let id = table.create().unwrap();
        assert!(!table.set_position(EntityId(id.0 + 100), Vec3::new(1.0, 1.0, 1.0)));
        assert_eq!(table.count(), 1);
        assert_eq!(table.get(id).unwrap().position, Vec3::ZERO);
    }

    #[test]
    fn iter_is_in_creation_order() {
        let mut table = EntityTable::new();
        let ids: Vec<_> = (0..4).map(|_| table.create().unwrap()).collect();
        let seen: Vec<_> = table.iter().map(|e| e.id).collect();
        assert_eq!(seen, ids);
    }

    #[test]
    fn create_stops_at_end_of_id_space() {
        let mut table = EntityTable::with_next_id(u32::MAX - 1);
        assert_eq!(table.create(), Ok(EntityId(u32::MAX - 1)));
        assert_eq!(table.create(), Ok(EntityId(u32::MAX)));
        assert_eq!(table.create(), Err(EntityError::IdSpaceExhausted));
        assert_eq!(table.count(), 2);
        assert!(table.get(EntityId(1)).is_err());
    }
}
