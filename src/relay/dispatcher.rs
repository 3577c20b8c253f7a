//! Message dispatcher
//!
//! Interprets decoded client events against the registry and the room
//! directory and returns the frames to write. Nothing here performs I/O;
//! the multiplexer writes the returned deliveries.

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{ClientId, Directory, Registry};
use crate::server::{ClientMessage, Outbound, RelayKind, ServerMessage};

/// One message addressed to one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ClientId,
    pub message: Outbound,
}

impl Delivery {
    /// Address a relay-originated event
    pub fn event(to: ClientId, message: ServerMessage) -> Self {
        Self {
            to,
            message: message.into(),
        }
    }
}

/// Owner of the relay state and the rules for mutating it
///
/// The registry and directory are only reachable through this type, which
/// keeps a connection's `room` field and its directory membership in step.
pub struct Dispatcher<T> {
    registry: Registry<T>,
    directory: Directory,
}

impl<T> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            directory: Directory::new(),
        }
    }

    pub fn registry(&self) -> &Registry<T> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry<T> {
        &mut self.registry
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut Directory {
        &mut self.directory
    }

    /// Handle the text payload of one frame
    ///
    /// Malformed JSON and unknown types are dropped without a reply.
    pub fn handle_text(&mut self, sender: &ClientId, text: &str) -> Vec<Delivery> {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle_message(sender, message),
            Err(e) => {
                debug!("Dropping message from {}: {}", sender, e);
                Vec::new()
            }
        }
    }

    /// Handle one parsed client message
    pub fn handle_message(&mut self, sender: &ClientId, message: ClientMessage) -> Vec<Delivery> {
        if !self.registry.contains(sender) {
            debug!("Ignoring message from unregistered client {}", sender);
            return Vec::new();
        }

        match message {
            ClientMessage::Create { room } | ClientMessage::Join { room } => {
                self.join(sender, room)
            }
            ClientMessage::Relay { kind, target, body } => {
                self.relay(sender, kind, target, body).into_iter().collect()
            }
            ClientMessage::ListRooms => vec![Delivery::event(
                sender.clone(),
                ServerMessage::room_list(self.directory.list()),
            )],
        }
    }

    fn join(&mut self, sender: &ClientId, room: String) -> Vec<Delivery> {
        let mut deliveries = self.depart(sender);

        let prior = self.directory.join(&room, sender.clone());
        if let Some(connection) = self.registry.lookup_mut(sender) {
            connection.room = Some(room.clone());
        }

        deliveries.push(Delivery::event(
            sender.clone(),
            ServerMessage::room_joined(prior.clone(), sender.clone()),
        ));
        deliveries.extend(
            prior
                .into_iter()
                .map(|peer| Delivery::event(peer, ServerMessage::peer_joined(sender.clone()))),
        );

        info!("Client {} joined room {}", sender, room);
        deliveries
    }

    fn relay(
        &mut self,
        sender: &ClientId,
        kind: RelayKind,
        target: ClientId,
        mut body: Map<String, Value>,
    ) -> Option<Delivery> {
        if !self.registry.contains(&target) {
            debug!(
                "Dropping {} from {}: unknown target {}",
                kind.as_str(),
                sender,
                target
            );
            return None;
        }

        body.insert("from".to_string(), Value::String(sender.to_string()));
        Some(Delivery {
            to: target,
            message: Outbound::Relay(body),
        })
    }

    /// Take `id` out of its room, notifying the members that remain
    ///
    /// Used for disconnects and before moving to another room.
    pub fn depart(&mut self, id: &ClientId) -> Vec<Delivery> {
        let Some(departure) = self.directory.leave(id) else {
            return Vec::new();
        };
        if let Some(connection) = self.registry.lookup_mut(id) {
            connection.room = None;
        }

        debug!("Client {} left room {}", id, departure.room);
        departure
            .remaining
            .into_iter()
            .map(|peer| Delivery::event(peer, ServerMessage::peer_left(id.clone())))
            .collect()
    }
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Connection;
    use serde_json::json;

    fn dispatcher_with(ids: &[&str]) -> Dispatcher<()> {
        let mut dispatcher = Dispatcher::new();
        for id in ids {
            let mut connection = Connection::new(ClientId::from(*id), ());
            connection.handshake_complete = true;
            dispatcher.registry_mut().register(connection);
        }
        dispatcher
    }

    fn id(value: &str) -> ClientId {
        ClientId::from(value)
    }

    fn send(dispatcher: &mut Dispatcher<()>, from: &str, value: Value) -> Vec<Delivery> {
        dispatcher.handle_text(&id(from), &value.to_string())
    }

    /// Every directory member is registered with a matching room field
    fn assert_consistent(dispatcher: &Dispatcher<()>) {
        for room in dispatcher.directory().list() {
            for member in dispatcher.directory().members(&room).unwrap() {
                let connection = dispatcher
                    .registry()
                    .lookup(member)
                    .unwrap_or_else(|| panic!("dangling member {}", member));
                assert_eq!(connection.room.as_deref(), Some(room.as_str()));
            }
        }
    }

    #[test]
    fn test_first_join_has_no_peers() {
        let mut dispatcher = dispatcher_with(&["a"]);
        let deliveries = send(&mut dispatcher, "a", json!({"type": "join", "room": "r"}));
        assert_eq!(
            deliveries,
            vec![Delivery::event(
                id("a"),
                ServerMessage::room_joined(vec![], id("a"))
            )]
        );
        assert_eq!(
            dispatcher.registry().lookup(&id("a")).unwrap().room.as_deref(),
            Some("r")
        );
        assert_consistent(&dispatcher);
    }

    #[test]
    fn test_second_join_notifies_prior_member() {
        let mut dispatcher = dispatcher_with(&["a", "b"]);
        send(&mut dispatcher, "a", json!({"type": "join", "room": "r"}));
        let deliveries = send(&mut dispatcher, "b", json!({"type": "join", "room": "r"}));
        assert_eq!(
            deliveries,
            vec![
                Delivery::event(id("b"), ServerMessage::room_joined(vec![id("a")], id("b"))),
                Delivery::event(id("a"), ServerMessage::peer_joined(id("b"))),
            ]
        );
        assert_consistent(&dispatcher);
    }

    #[test]
    fn test_create_and_join_share_a_room() {
        let mut dispatcher = dispatcher_with(&["a", "b"]);
        send(&mut dispatcher, "a", json!({"type": "create", "room": "r"}));
        send(&mut dispatcher, "b", json!({"type": "join", "room": "r"}));
        assert_eq!(dispatcher.directory().list(), vec!["r".to_string()]);
        assert_eq!(
            dispatcher.directory().members("r").unwrap(),
            &[id("a"), id("b")]
        );
    }

    #[test]
    fn test_depart_notifies_remaining_once() {
        let mut dispatcher = dispatcher_with(&["a", "b"]);
        send(&mut dispatcher, "a", json!({"type": "join", "room": "r"}));
        send(&mut dispatcher, "b", json!({"type": "join", "room": "r"}));

        let deliveries = dispatcher.depart(&id("a"));
        assert_eq!(
            deliveries,
            vec![Delivery::event(id("b"), ServerMessage::peer_left(id("a")))]
        );
        assert!(dispatcher.depart(&id("a")).is_empty());
        assert_consistent(&dispatcher);
    }

    #[test]
    fn test_sole_member_departure_keeps_room_listed() {
        let mut dispatcher = dispatcher_with(&["a"]);
        send(&mut dispatcher, "a", json!({"type": "join", "room": "r"}));
        assert!(dispatcher.depart(&id("a")).is_empty());

        let deliveries = send(&mut dispatcher, "a", json!({"type": "list-rooms"}));
        assert_eq!(
            deliveries,
            vec![Delivery::event(
                id("a"),
                ServerMessage::room_list(vec!["r".to_string()])
            )]
        );
        assert!(dispatcher.directory().members("r").unwrap().is_empty());
    }

    #[test]
    fn test_rejoin_leaves_previous_room() {
        let mut dispatcher = dispatcher_with(&["a", "b"]);
        send(&mut dispatcher, "a", json!({"type": "join", "room": "one"}));
        send(&mut dispatcher, "b", json!({"type": "join", "room": "one"}));

        let deliveries = send(&mut dispatcher, "b", json!({"type": "join", "room": "two"}));
        assert_eq!(
            deliveries,
            vec![
                Delivery::event(id("a"), ServerMessage::peer_left(id("b"))),
                Delivery::event(id("b"), ServerMessage::room_joined(vec![], id("b"))),
            ]
        );
        assert_eq!(dispatcher.directory().members("one").unwrap(), &[id("a")]);
        assert_consistent(&dispatcher);
    }

    #[test]
    fn test_relay_adds_from() {
        let mut dispatcher = dispatcher_with(&["a", "b"]);
        let deliveries = send(
            &mut dispatcher,
            "a",
            json!({"type": "offer", "target": "b", "sdp": "v=0"}),
        );
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].to, id("b"));

        let text = deliveries[0].message.to_json().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "offer", "target": "b", "sdp": "v=0", "from": "a"})
        );
    }

    #[test]
    fn test_relay_overwrites_spoofed_from() {
        let mut dispatcher = dispatcher_with(&["a", "b"]);
        let deliveries = send(
            &mut dispatcher,
            "a",
            json!({"type": "chat", "target": "b", "from": "mallory"}),
        );
        match &deliveries[0].message {
            Outbound::Relay(body) => assert_eq!(body.get("from"), Some(&json!("a"))),
            other => panic!("Expected Relay, got {:?}", other),
        }
    }

    #[test]
    fn test_relay_to_unknown_target_is_dropped() {
        let mut dispatcher = dispatcher_with(&["a"]);
        let deliveries = send(
            &mut dispatcher,
            "a",
            json!({"type": "ice", "target": "ffffffffffffffff"}),
        );
        assert!(deliveries.is_empty());
    }

    #[test]
    fn test_list_rooms_includes_every_referenced_room() {
        let mut dispatcher = dispatcher_with(&["a", "b"]);
        send(&mut dispatcher, "a", json!({"type": "create", "room": "x"}));
        send(&mut dispatcher, "b", json!({"type": "join", "room": "y"}));
        send(&mut dispatcher, "a", json!({"type": "join", "room": "z"}));
        dispatcher.depart(&id("b"));

        let deliveries = send(&mut dispatcher, "b", json!({"type": "list-rooms"}));
        assert_eq!(
            deliveries,
            vec![Delivery::event(
                id("b"),
                ServerMessage::room_list(vec!["x".to_string(), "y".to_string(), "z".to_string()])
            )]
        );
    }

    #[test]
    fn test_malformed_and_unknown_are_ignored() {
        let mut dispatcher = dispatcher_with(&["a"]);
        assert!(dispatcher.handle_text(&id("a"), "{not json").is_empty());
        assert!(send(&mut dispatcher, "a", json!({"type": "wave"})).is_empty());
        assert!(send(&mut dispatcher, "a", json!({"room": "r"})).is_empty());
        assert!(send(&mut dispatcher, "a", json!({"type": "join", "room": null})).is_empty());
        assert!(dispatcher.directory().is_empty());
    }

    #[test]
    fn test_unregistered_sender_cannot_join() {
        let mut dispatcher = dispatcher_with(&[]);
        assert!(send(&mut dispatcher, "ghost", json!({"type": "join", "room": "r"})).is_empty());
        assert!(dispatcher.directory().is_empty());
    }
}
