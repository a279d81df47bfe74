// Rooms: the live sessions currently joined to each document.
//
// A room exists only while it has members. Every mutation and every
// broadcast runs under the same write lock, so all members of a room see
// broadcasts in one order and a leaving session never receives an event
// queued after its removal.

use std::{collections::HashMap, sync::Arc};

use coedit_common::protocol::ws::ServerEvent;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::session::{SessionHandle, SessionId};
use crate::metrics;

type Rooms = HashMap<Uuid, HashMap<SessionId, SessionHandle>>;

#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<Rooms>>,
}

impl RoomRegistry {
    /// Add a session to the room of `document_id`, creating the room if
    /// needed. Joining twice is a no-op.
    pub async fn join(&self, document_id: Uuid, handle: SessionHandle) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(document_id).or_default().entry(handle.session_id).or_insert(handle);
        publish_gauges(&rooms);
    }

    /// Remove a session from a room, dropping the room when it empties.
    /// Returns whether the session was a member.
    pub async fn leave(&self, document_id: Uuid, session_id: SessionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(&document_id) else {
            return false;
        };

        let removed = members.remove(&session_id).is_some();
        if members.is_empty() {
            rooms.remove(&document_id);
        }
        publish_gauges(&rooms);
        removed
    }

    /// Deliver `event` to every member of the room except `exclude`.
    ///
    /// Members whose connection is gone are removed. Returns the number of
    /// sessions the event was queued for.
    pub async fn broadcast(
        &self,
        document_id: Uuid,
        event: &ServerEvent,
        exclude: Option<SessionId>,
    ) -> usize {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(&document_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (session_id, handle) in members.iter() {
            if Some(*session_id) == exclude {
                continue;
            }
            if handle.deliver(event.clone()) {
                delivered += 1;
            } else {
                dead.push((*session_id, handle.user_id));
            }
        }

        if !dead.is_empty() {
            metrics::increment_delivery_failures(dead.len() as u64);
            for (session_id, user_id) in dead {
                warn!(
                    connection_id = %session_id,
                    user_id = %user_id,
                    room_id = %document_id,
                    "removing room member with a closed connection"
                );
                members.remove(&session_id);
            }
            if members.is_empty() {
                rooms.remove(&document_id);
            }
            publish_gauges(&rooms);
        }

        delivered
    }

    /// Session ids joined to the room, sorted.
    pub async fn members(&self, document_id: Uuid) -> Vec<SessionId> {
        let rooms = self.rooms.read().await;
        let mut members: Vec<_> = rooms
            .get(&document_id)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub async fn contains_room(&self, document_id: Uuid) -> bool {
        self.rooms.read().await.contains_key(&document_id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn session_count(&self) -> usize {
        self.rooms.read().await.values().map(HashMap::len).sum()
    }
}

fn publish_gauges(rooms: &Rooms) {
    metrics::set_room_gauges(rooms.len(), rooms.values().map(HashMap::len).sum());
}
