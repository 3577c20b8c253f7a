//! Room directory
//!
//! Maps room names to their members in join order. Rooms are created on
//! first reference and only removed by an explicit reap.

use std::collections::HashMap;

use super::ClientId;

/// A named group of connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub name: String,
    /// Members in join order
    pub members: Vec<ClientId>,
}

/// Result of a member leaving its room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Room that was left
    pub room: String,
    /// Members still in the room, in join order
    pub remaining: Vec<ClientId>,
}

/// Directory of rooms keyed by name
#[derive(Debug, Default)]
pub struct Directory {
    rooms: HashMap<String, Room>,
    /// Room names in creation order
    order: Vec<String>,
    /// Reverse index from member to room name
    membership: HashMap<ClientId, String>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to `room`, creating the room if needed
    ///
    /// Returns the members present before the join. A member already in
    /// another room is moved out of it silently; callers that need to notify
    /// the old room call [`Directory::leave`] first.
    pub fn join(&mut self, room: &str, id: ClientId) -> Vec<ClientId> {
        if let Some(previous) = self.membership.get(&id).cloned() {
            self.detach(&previous, &id);
        }

        if !self.rooms.contains_key(room) {
            self.order.push(room.to_string());
        }
        let entry = self.rooms.entry(room.to_string()).or_insert_with(|| Room {
            name: room.to_string(),
            members: Vec::new(),
        });

        let prior = entry.members.clone();
        entry.members.push(id.clone());
        self.membership.insert(id, room.to_string());
        prior
    }

    /// Remove `id` from whatever room it is in
    ///
    /// Returns `None` if it was in no room. The room itself stays listed.
    pub fn leave(&mut self, id: &ClientId) -> Option<Departure> {
        let room = self.membership.remove(id)?;
        let remaining = self.detach(&room, id);
        Some(Departure { room, remaining })
    }

    fn detach(&mut self, room: &str, id: &ClientId) -> Vec<ClientId> {
        match self.rooms.get_mut(room) {
            Some(entry) => {
                entry.members.retain(|member| member != id);
                entry.members.clone()
            }
            None => Vec::new(),
        }
    }

    /// Names of every known room, in creation order, including empty ones
    pub fn list(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn get(&self, room: &str) -> Option<&Room> {
        self.rooms.get(room)
    }

    /// Members of a room in join order
    pub fn members(&self, room: &str) -> Option<&[ClientId]> {
        self.rooms.get(room).map(|entry| entry.members.as_slice())
    }

    /// Room a member currently belongs to
    pub fn room_of(&self, id: &ClientId) -> Option<&str> {
        self.membership.get(id).map(String::as_str)
    }

    /// Drop rooms that have no members, returning their names
    pub fn reap_empty(&mut self) -> Vec<String> {
        let empty: Vec<String> = self
            .order
            .iter()
            .filter(|name| {
                self.rooms
                    .get(name.as_str())
                    .is_some_and(|room| room.members.is_empty())
            })
            .cloned()
            .collect();

        for name in &empty {
            self.rooms.remove(name);
        }
        self.order.retain(|name| self.rooms.contains_key(name));
        empty
    }

    /// Number of known rooms
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
