//! Protocol message definitions
//!
//! Defines the JSON events exchanged between peers and the relay. Every
//! frame carries exactly one JSON object discriminated by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::relay::ClientId;

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Client Messages
// ============================================================================

/// Negotiation payloads relayed verbatim to a single target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    Ice,
    Chat,
}

impl RelayKind {
    /// Match a wire `type` value
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "offer" => Some(RelayKind::Offer),
            "answer" => Some(RelayKind::Answer),
            "ice" => Some(RelayKind::Ice),
            "chat" => Some(RelayKind::Chat),
            _ => None,
        }
    }

    /// Wire `type` value
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayKind::Offer => "offer",
            RelayKind::Answer => "answer",
            RelayKind::Ice => "ice",
            RelayKind::Chat => "chat",
        }
    }
}

/// Messages sent from a peer to the relay
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Create a room (joins it; identical to `Join`)
    Create { room: String },

    /// Join a room, creating it if needed
    Join { room: String },

    /// Directed negotiation payload for another peer
    Relay {
        kind: RelayKind,
        /// Identifier of the receiving peer
        target: ClientId,
        /// The whole object as received, forwarded with `from` added
        body: Map<String, Value>,
    },

    /// Request the names of all known rooms
    ListRooms,
}

impl ClientMessage {
    /// Parse a client message from the text of one frame
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(body) = value else {
            return Err(ProtocolError::InvalidMessage(
                "expected a JSON object".to_string(),
            ));
        };

        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidMessage("missing type".to_string()))?
            .to_owned();

        match kind.as_str() {
            "create" => Ok(ClientMessage::Create {
                room: room_field(&body)?,
            }),
            "join" => Ok(ClientMessage::Join {
                room: room_field(&body)?,
            }),
            "list-rooms" => Ok(ClientMessage::ListRooms),
            other => {
                let relay = RelayKind::from_type(other)
                    .ok_or_else(|| ProtocolError::UnknownType(other.to_string()))?;
                let target = body
                    .get("target")
                    .and_then(Value::as_str)
                    .filter(|target| !target.is_empty())
                    .map(ClientId::from)
                    .ok_or_else(|| {
                        ProtocolError::InvalidMessage(format!("{} without target", other))
                    })?;
                Ok(ClientMessage::Relay {
                    kind: relay,
                    target,
                    body,
                })
            }
        }
    }
}

fn room_field(body: &Map<String, Value>) -> ProtocolResult<String> {
    body.get("room")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::InvalidMessage("room must be a string".to_string()))
}

// ============================================================================
// Server Messages
// ============================================================================

/// Events sent from the relay to a peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent once right after the handshake
    Welcome {
        /// Identifier assigned to this connection
        id: ClientId,
    },

    /// Acknowledges a create/join to the joining peer
    RoomJoined {
        /// Members present before the join, in join order
        peers: Vec<ClientId>,
        /// The joining peer
        id: ClientId,
    },

    /// A new member entered the room
    PeerJoined { id: ClientId },

    /// A member left the room or disconnected
    PeerLeft { id: ClientId },

    /// Every room the relay knows about
    RoomList { rooms: Vec<String> },
}

impl ServerMessage {
    /// Create a Welcome message
    pub fn welcome(id: ClientId) -> Self {
        ServerMessage::Welcome { id }
    }

    /// Create a RoomJoined message
    pub fn room_joined(peers: Vec<ClientId>, id: ClientId) -> Self {
        ServerMessage::RoomJoined { peers, id }
    }

    /// Create a PeerJoined message
    pub fn peer_joined(id: ClientId) -> Self {
        ServerMessage::PeerJoined { id }
    }

    /// Create a PeerLeft message
    pub fn peer_left(id: ClientId) -> Self {
        ServerMessage::PeerLeft { id }
    }

    /// Create a RoomList message
    pub fn room_list(rooms: Vec<String>) -> Self {
        ServerMessage::RoomList { rooms }
    }
}

/// Anything the relay writes to a peer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A relay-originated event
    Event(ServerMessage),
    /// A forwarded negotiation payload, already stamped with `from`
    Relay(Map<String, Value>),
}

impl Outbound {
    /// Serialize to the JSON text carried by one frame
    pub fn to_json(&self) -> ProtocolResult<String> {
        let json = match self {
            Outbound::Event(message) => serde_json::to_string(message)?,
            Outbound::Relay(body) => serde_json::to_string(body)?,
        };
        Ok(json)
    }
}

impl From<ServerMessage> for Outbound {
    fn from(message: ServerMessage) -> Self {
        Outbound::Event(message)
    }
}

// ============================================================================
// Tests
// ============================================================================
