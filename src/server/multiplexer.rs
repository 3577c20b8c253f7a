//! Connection multiplexer
//!
//! A single hub loop owns the registry and the room directory. It accepts
//! sockets, receives read events from small per-socket reader tasks, and
//! routes each chunk to the handshake or to the dispatcher. All writes happen
//! from the hub as single non-blocking attempts.

use std::io;
use std::net::SocketAddr;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{codec, handshake, ServerMessage};
use crate::config::RelayConfig;
use crate::relay::{ClientId, Connection, Delivery, Dispatcher, Transport};

/// Read-side events forwarded to the hub
#[derive(Debug)]
pub enum ConnectionEvent {
    /// One chunk read from the socket
    Data { id: ClientId, bytes: Vec<u8> },
    /// The socket returned EOF or a read error
    Closed { id: ClientId },
}

/// Transport handle for an accepted socket
pub struct ClientHandle {
    peer_addr: SocketAddr,
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl Transport for ClientHandle {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let written = self.writer.try_write(bytes)?;
        if written < bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", written, bytes.len()),
            ));
        }
        Ok(())
    }

    fn close(&mut self) {
        // The write half is dropped together with the registry entry
        self.reader.abort();
        debug!("Closed socket to {}", self.peer_addr);
    }
}

/// Signaling relay server
pub struct RelayServer {
    config: RelayConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(config: RelayConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and run until shutdown
    ///
    /// Failing to bind is the only fatal error.
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("Signaling relay listening on ws://{}", addr);

        self.serve(listener).await
    }

    /// Run the hub loop on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut hub = Hub::new(self.config.clone(), events_tx);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut maintenance = self.config.maintenance_interval().map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => hub.accept(stream, peer_addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
                Some(event) = events_rx.recv() => hub.handle_event(event),
                _ = next_tick(&mut maintenance) => hub.maintain(),
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping relay");
                    break;
                }
            }
        }

        hub.shutdown();
        Ok(())
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Read chunks from one socket until EOF or error
async fn read_loop(
    id: ClientId,
    mut reader: OwnedReadHalf,
    chunk_size: usize,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let mut buf = vec![0u8; chunk_size];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = ConnectionEvent::Data {
                    id: id.clone(),
                    bytes: buf[..n].to_vec(),
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("Read error from {}: {}", id, e);
                break;
            }
        }
    }
    let _ = events.send(ConnectionEvent::Closed { id });
}

/// Sole owner of the relay state
struct Hub {
    config: RelayConfig,
    dispatcher: Dispatcher<ClientHandle>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Hub {
    fn new(config: RelayConfig, events_tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self {
            config,
            dispatcher: Dispatcher::new(),
            events_tx,
        }
    }

    fn accept(&mut self, stream: TcpStream, peer_addr: SocketAddr) {
        let id = self.dispatcher.registry().fresh_id();
        let (reader, writer) = stream.into_split();
        let reader = tokio::spawn(read_loop(
            id.clone(),
            reader,
            self.config.read_chunk_size,
            self.events_tx.clone(),
        ));

        let handle = ClientHandle {
            peer_addr,
            writer,
            reader,
        };
        self.dispatcher
            .registry_mut()
            .register(Connection::new(id.clone(), handle));
        info!("Client {} connected from {}", id, peer_addr);
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Data { id, bytes } => self.on_data(&id, &bytes),
            ConnectionEvent::Closed { id } => self.disconnect(&id),
        }
    }

    fn on_data(&mut self, id: &ClientId, bytes: &[u8]) {
        // Chunks still queued for an evicted connection are dropped
        let Some(connection) = self.dispatcher.registry().lookup(id) else {
            return;
        };

        if connection.handshake_complete {
            self.on_frame(id, bytes);
        } else {
            self.on_handshake(id, bytes);
        }
    }

    fn on_handshake(&mut self, id: &ClientId, request: &[u8]) {
        match handshake::respond(request) {
            Ok(response) => {
                self.write(id, response.as_bytes());
                if let Some(connection) = self.dispatcher.registry_mut().lookup_mut(id) {
                    connection.handshake_complete = true;
                }
                self.deliver(vec![Delivery::event(
                    id.clone(),
                    ServerMessage::welcome(id.clone()),
                )]);
                debug!("Handshake complete for {}", id);
            }
            Err(e) => {
                warn!("Handshake with {} failed: {}", id, e);
                self.dispatcher.registry_mut().remove(id);
            }
        }
    }

    fn on_frame(&mut self, id: &ClientId, frame: &[u8]) {
        let payload = match codec::decode(frame) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Dropping frame from {}: {}", id, e);
                return;
            }
        };
        let text = match String::from_utf8(payload) {
            Ok(text) => text,
            Err(e) => {
                debug!("Dropping non-UTF-8 frame from {}: {}", id, e);
                return;
            }
        };

        let deliveries = self.dispatcher.handle_text(id, &text);
        self.deliver(deliveries);
    }

    fn disconnect(&mut self, id: &ClientId) {
        if !self.dispatcher.registry().contains(id) {
            return;
        }

        let deliveries = self.dispatcher.depart(id);
        self.deliver(deliveries);
        self.dispatcher.registry_mut().remove(id);
        info!("Client {} disconnected", id);
    }

    fn deliver(&mut self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match delivery.message.to_json() {
                Ok(json) => self.write(&delivery.to, &codec::encode(json.as_bytes())),
                Err(e) => debug!("Failed to encode message for {}: {}", delivery.to, e),
            }
        }
    }

    fn write(&mut self, id: &ClientId, bytes: &[u8]) {
        if let Err(e) = self.dispatcher.registry_mut().send(id, bytes) {
            debug!("Write to {} failed: {}", id, e);
        }
    }

    fn maintain(&mut self) {
        if self.config.reap_empty_rooms {
            let reaped = self.dispatcher.directory_mut().reap_empty();
            if !reaped.is_empty() {
                debug!("Reaped {} empty rooms", reaped.len());
            }
        }
        debug!(
            "Relay status: {} connections, {} rooms",
            self.dispatcher.registry().len(),
            self.dispatcher.directory().len()
        );
    }

    fn shutdown(&mut self) {
        let count = self.dispatcher.registry().len();
        if count > 0 {
            info!("Closing {} active connections", count);
        }
        self.dispatcher.registry_mut().close_all();
    }
}
