//! Client registry
//!
//! Maps connection identifiers to connection state. The registry is owned by
//! the relay hub loop and never shared, so it carries no locking.

use std::collections::HashMap;
use std::fmt;
use std::io;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Random bytes in a client identifier (rendered as 16 hex characters)
pub const CLIENT_ID_BYTES: usize = 8;

/// Identifier assigned to a connection on accept
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh identifier from the OS random source
    pub fn generate() -> Self {
        let mut bytes = [0u8; CLIENT_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Write side of a connection as seen by the registry
pub trait Transport {
    /// Make a single best-effort attempt to write `bytes`
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Release the underlying socket
    fn close(&mut self);
}

/// State of one accepted connection
#[derive(Debug)]
pub struct Connection<T> {
    id: ClientId,
    /// Set once the HTTP upgrade has been answered
    pub handshake_complete: bool,
    /// Room this connection currently belongs to
    pub room: Option<String>,
    pub transport: T,
}

impl<T> Connection<T> {
    /// A freshly accepted connection: not handshaken, in no room
    pub fn new(id: ClientId, transport: T) -> Self {
        Self {
            id,
            handshake_complete: false,
            room: None,
            transport,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }
}

/// Registry of live connections
pub struct Registry<T> {
    connections: HashMap<ClientId, Connection<T>>,
}

impl<T> Registry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Generate an identifier not currently in use
    pub fn fresh_id(&self) -> ClientId {
        loop {
            let id = ClientId::generate();
            if !self.connections.contains_key(&id) {
                return id;
            }
        }
    }

    /// Add a connection and return its identifier
    pub fn register(&mut self, connection: Connection<T>) -> ClientId {
        let id = connection.id.clone();
        self.connections.insert(id.clone(), connection);
        debug!("Registered client {}", id);
        id
    }

    pub fn lookup(&self, id: &ClientId) -> Option<&Connection<T>> {
        self.connections.get(id)
    }

    pub fn lookup_mut(&mut self, id: &ClientId) -> Option<&mut Connection<T>> {
        self.connections.get_mut(id)
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<T: Transport> Registry<T> {
    /// Close a connection's transport and evict it
    ///
    /// Returns `false` if the identifier was not registered.
    pub fn remove(&mut self, id: &ClientId) -> bool {
        match self.connections.remove(id) {
            Some(mut connection) => {
                connection.transport.close();
                debug!("Evicted client {}", id);
                true
            }
            None => false,
        }
    }

    /// Write raw bytes to a registered connection
    pub fn send(&mut self, id: &ClientId, bytes: &[u8]) -> io::Result<()> {
        match self.connections.get_mut(id) {
            Some(connection) => connection.transport.send(bytes),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("client {} not registered", id),
            )),
        }
    }

    /// Close and evict every connection
    pub fn close_all(&mut self) {
        for (_, mut connection) in self.connections.drain() {
            connection.transport.close();
        }
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
