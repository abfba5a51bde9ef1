//! Per-endpoint client sessions.
//!
//! A session is created the first time an endpoint is heard from and lives
//! for the rest of the server's life. Eviction (timeouts, disconnects) is not
//! handled here; `last_seen` is kept so a separate liveness monitor can make
//! that call.

use std::collections::{hash_map::Entry, HashMap, HashSet, VecDeque};

use outpost_shared::{endpoint::Endpoint, packet::EntityId};

use crate::entity::{EntityError, EntityTable};

/// Bounded set of recently processed sequence ids.
///
/// Oldest ids are forgotten first once `capacity` is exceeded. A forgotten
/// id is treated as new, so a retransmission that arrives after falling out
/// of the window is applied again; for an absolute `Move` that can set the
/// avatar back to the older position.
#[derive(Debug, Clone)]
pub struct AckWindow {
    capacity: usize,
    order: VecDeque<u32>,
    seen: HashSet<u32>,
}

impl AckWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.seen.contains(&sequence)
    }

    /// Records `sequence`. Returns `false` if it was already present.
    pub fn record(&mut self, sequence: u32) -> bool {
        if !self.seen.insert(sequence) {
            return false;
        }
        self.order.push_back(sequence);
        if self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Server-side state for one client.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub endpoint: Endpoint,
    /// The one entity this client may mutate.
    pub entity_id: EntityId,
    /// Penalty counter for redundant or duplicate requests.
    pub malus: u32,
    pub acknowledged: AckWindow,
    /// Clock tick at session creation.
    pub joined_at: u64,
    /// Clock tick of the latest packet from this endpoint.
    pub last_seen: u64,
}

impl ClientSession {
    fn new(endpoint: Endpoint, entity_id: EntityId, ack_window: usize, now: u64) -> Self {
        Self {
            endpoint,
            entity_id,
            malus: 0,
            acknowledged: AckWindow::new(ack_window),
            joined_at: now,
            last_seen: now,
        }
    }

    /// True if this session may mutate `target`.
    pub fn owns(&self, target: EntityId) -> bool {
        self.entity_id == target
    }
}

/// Result of [`SessionTable::resolve`].
#[derive(Debug)]
pub struct Resolved<'a> {
    pub session: &'a mut ClientSession,
    /// True if the session did not exist before this call.
    pub created: bool,
}

/// Endpoint → session map. Append-only; iteration is in join order.
#[derive(Debug)]
pub struct SessionTable {
    sessions: HashMap<Endpoint, ClientSession>,
    order: Vec<Endpoint>,
    ack_window: usize,
}

impl SessionTable {
    pub fn new(ack_window: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            order: Vec::new(),
            ack_window,
        }
    }

    /// Returns the session for `endpoint`, creating it (and spawning its
    /// entity) if this endpoint has never been seen.
    ///
    /// Fails only when a new session is needed and the entity id space is
    /// exhausted; no session is created in that case.
    pub fn resolve(
        &mut self,
        endpoint: &Endpoint,
        entities: &mut EntityTable,
        now: u64,
    ) -> Result<Resolved<'_>, EntityError> {
        let resolved = match self.sessions.entry(endpoint.clone()) {
            Entry::Occupied(e) => {
                let session = e.into_mut();
                session.last_seen = now;
                Resolved {
                    session,
                    created: false,
                }
            }
            Entry::Vacant(e) => {
                let entity_id = entities.create()?;
                self.order.push(endpoint.clone());
                let session = e.insert(ClientSession::new(
                    endpoint.clone(),
                    entity_id,
                    self.ack_window,
                    now,
                ));
                Resolved {
                    session,
                    created: true,
                }
            }
        };
        Ok(resolved)
    }

    pub fn get(&self, endpoint: &Endpoint) -> Option<&ClientSession> {
        self.sessions.get(endpoint)
    }

    /// Number of distinct sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions in join order.
    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.order.iter().filter_map(|ep| self.sessions.get(ep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_creates_once_per_endpoint() {
        let mut sessions = SessionTable::new(8);
        let mut entities = EntityTable::new();
        let ep = Endpoint::new("tester", 0);

        let first = sessions.resolve(&ep, &mut entities, 0).unwrap();
        assert!(first.created);
        let owned = first.session.entity_id;

        let again = sessions.resolve(&ep, &mut entities, 3).unwrap();
        assert!(!again.created);
        assert_eq!(again.session.entity_id, owned);
        assert_eq!(again.session.last_seen, 3);
        assert_eq!(again.session.joined_at, 0);

        assert_eq!(sessions.count(), 1);
        assert_eq!(entities.count(), 1);
    }

    #[test]
    fn ports_distinguish_sessions() {
        let mut sessions = SessionTable::new(8);
        let mut entities = EntityTable::new();
        let a = sessions
            .resolve(&Endpoint::new("tester", 0), &mut entities, 0)
            .unwrap()
            .session
            .entity_id;
        let b = sessions
            .resolve(&Endpoint::new("tester", 1), &mut entities, 0)
            .unwrap()
            .session
            .entity_id;
        assert_ne!(a, b);
        assert_eq!(sessions.count(), 2);
        assert_eq!(entities.count(), 2);
    }

    #[test]
    fn iter_follows_join_order() {
        let mut sessions = SessionTable::new(8);
        let mut entities = EntityTable::new();
        for name in ["c", "a", "b"] {
            sessions
                .resolve(&Endpoint::new(name, 0), &mut entities, 0)
                .unwrap();
        }
        let names: Vec<_> = sessions.iter().map(|s| s.endpoint.address.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn resolve_without_ids_left_creates_nothing() {
        let mut sessions = SessionTable::new(8);
        let mut entities = EntityTable::with_next_id(u32::MAX);
        sessions
            .resolve(&Endpoint::new("last", 0), &mut entities, 0)
            .unwrap();

        let err = sessions
            .resolve(&Endpoint::new("late", 0), &mut entities, 0)
            .unwrap_err();
        assert_eq!(err, EntityError::IdSpaceExhausted);
        assert_eq!(sessions.count(), 1);
        assert!(sessions.get(&Endpoint::new("late", 0)).is_none());

        // Known endpoints still resolve.
        assert!(!sessions
            .resolve(&Endpoint::new("last", 0), &mut entities, 1)
            .unwrap()
            .created);
    }

    #[test]
    fn ack_window_forgets_then_accepts_old_ids_again() {
        let mut w = AckWindow::new(1);
        assert!(w.record(1));
        assert!(w.record(2));
        assert!(w.record(1));
    }

    #[test]
    fn ack_window_detects_repeats() {
        let mut w = AckWindow::new(4);
        assert!(w.record(10));
        assert!(!w.record(10));
        assert!(w.contains(10));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn ack_window_forgets_oldest_past_capacity() {
        let mut w = AckWindow::new(2);
        w.record(1);
        w.record(2);
        w.record(3);
        assert!(!w.contains(1));
        assert!(w.contains(2));
        assert!(w.contains(3));
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn ack_window_capacity_is_at_least_one() {
        let mut w = AckWindow::new(0);
        assert_eq!(w.capacity(), 1);
        w.record(5);
        assert!(w.contains(5));
        assert!(!w.is_empty());
    }
}
