//! Socket - one client's logical connection to a [`LocalNamespace`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{LocalNamespace, NamespaceSocket};
use crate::client::{Client, CloseReason, PacketOptions, WeakClient};
use crate::error::NspwireError;
use crate::packet::{Packet, PacketType};

/// Events delivered to the application for one socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// EVENT / ACK packet from the peer (binary variants included).
    Packet(Packet),
    /// The connection failed; a `Closed` event follows.
    Error(String),
    /// The socket closed. Always the last event.
    Closed(CloseReason),
}

/// A namespace socket bound to one client.
pub struct Socket {
    id: String,
    nsp: String,
    client: WeakClient,
    namespace: Weak<LocalNamespace>,
    connected: AtomicBool,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SocketEvent>>>,
}

impl Socket {
    pub(super) fn new(
        id: String,
        nsp: String,
        client: WeakClient,
        namespace: Weak<LocalNamespace>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            id,
            nsp,
            client,
            namespace,
            connected: AtomicBool::new(true),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn namespace(&self) -> &str {
        &self.nsp
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The client this socket rides on, while it exists.
    pub fn client(&self) -> Option<Client> {
        self.client.upgrade()
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SocketEvent>> {
        self.events_rx.lock().take()
    }

    /// Send an event: `[event, ...args]`.
    pub fn emit(&self, event: &str, args: Vec<Value>) {
        let packet = Packet::event(self.nsp.as_str(), event_payload(event, args));
        self.send(packet, PacketOptions::default());
    }

    /// Send an event, dropped if the transport is not writable right now.
    pub fn emit_volatile(&self, event: &str, args: Vec<Value>) {
        let packet = Packet::event(self.nsp.as_str(), event_payload(event, args));
        self.send(packet, PacketOptions::volatile());
    }

    /// Answer an event that carried an ack id.
    pub fn ack(&self, id: u64, args: Vec<Value>) {
        let packet = Packet::ack(self.nsp.as_str(), id, Value::Array(args));
        self.send(packet, PacketOptions::default());
    }

    /// Write a packet for this socket's namespace.
    pub fn send(&self, packet: Packet, options: PacketOptions) {
        if !self.is_connected() {
            tracing::debug!(socket = %self.id, "Socket disconnected, packet dropped");
            return;
        }
        if let Some(client) = self.client.upgrade() {
            client.packet(packet, options);
        }
    }

    /// Disconnect from the server side.
    ///
    /// Sends DISCONNECT to the peer, then closes with
    /// [`CloseReason::ServerNamespaceDisconnect`].
    pub fn disconnect(&self) {
        if !self.is_connected() {
            return;
        }
        self.send(Packet::disconnect(self.nsp.as_str()), PacketOptions::default());
        self.close(CloseReason::ServerNamespaceDisconnect);
    }

    /// Close once: detach from namespace and client, then notify.
    fn close(&self, reason: CloseReason) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        tracing::debug!(socket = %self.id, nsp = %self.nsp, %reason, "Socket closed");

        if let Some(namespace) = self.namespace.upgrade() {
            namespace.remove_socket(&self.id);
        }
        if let Some(client) = self.client.upgrade() {
            client.remove(self);
        }
        let _ = self.events_tx.send(SocketEvent::Closed(reason));
    }
}

fn event_payload(event: &str, args: Vec<Value>) -> Value {
    let mut data = Vec::with_capacity(args.len() + 1);
    data.push(Value::String(event.to_string()));
    data.extend(args);
    Value::Array(data)
}

impl NamespaceSocket for Socket {
    fn id(&self) -> &str {
        &self.id
    }

    fn namespace(&self) -> &str {
        &self.nsp
    }

    fn on_packet(&self, packet: Packet) {
        if !self.is_connected() {
            return;
        }
        match packet.packet_type {
            PacketType::Disconnect => self.close(CloseReason::ClientNamespaceDisconnect),
            PacketType::Connect => {
                tracing::debug!(socket = %self.id, "Ignoring CONNECT on attached socket");
            }
            _ => {
                let _ = self.events_tx.send(SocketEvent::Packet(packet));
            }
        }
    }

    fn on_error(&self, err: &NspwireError) {
        if self.is_connected() {
            let _ = self.events_tx.send(SocketEvent::Error(err.to_string()));
        }
    }

    fn on_close(&self, reason: CloseReason) {
        self.close(reason);
    }

    fn disconnect(&self) {
        Socket::disconnect(self);
    }

    fn is_connected(&self) -> bool {
        Socket::is_connected(self)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("nsp", &self.nsp)
            .field("connected", &self.is_connected())
            .finish()
    }
}
