//! Client - the per-connection namespace multiplexer.
//!
//! One [`Client`] sits on top of each transport connection and:
//! 1. Feeds transport data into its decoder and routes decoded packets to
//!    the namespace socket they are tagged with
//! 2. Attaches namespaces on CONNECT, holding back non-root namespaces until
//!    the root namespace `/` has attached
//! 3. Serializes outgoing packets through a per-connection write queue, so
//!    writes hit the transport in call order even though encoding is async
//! 4. Tears down exactly once on transport close, transport error, decode
//!    error or forced close, cascading to every attached socket
//!
//! # Lifecycle
//!
//! ```text
//! Active ──(close / error / forced)──► Closing ──(cascade done)──► Closed
//! ```
//!
//! Writes only reach the transport while the client is `Active` and the
//! transport is open. Duplicate close/error events after the first are
//! ignored.
//!
//! # Locking
//!
//! The connection state lock is never held while calling into a socket, a
//! namespace, the codec or the transport: sockets call back into
//! [`Client::remove`] and [`Client::packet`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{PacketCodec, PacketDecoder};
use crate::error::{NspwireError, Result};
use crate::namespace::{NamespaceRegistry, NamespaceSocket};
use crate::packet::{Fragment, Packet, PacketType, ROOT_NAMESPACE};
use crate::transport::{ReadyState, Subscription, Transport, TransportEvent};

/// Diagnostic sent to the peer when it connects to an unknown namespace.
pub const INVALID_NAMESPACE: &str = "Invalid namespace";

/// Why a client or socket closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The transport closed on its own.
    TransportClose,
    /// The transport or decoder failed.
    ClientError,
    /// The server closed the connection.
    ForcedServerClose,
    /// The server disconnected a single namespace socket.
    ServerNamespaceDisconnect,
    /// The peer disconnected a single namespace socket.
    ClientNamespaceDisconnect,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TransportClose => "transport close",
            CloseReason::ClientError => "client error",
            CloseReason::ForcedServerClose => "forced server close",
            CloseReason::ServerNamespaceDisconnect => "server namespace disconnect",
            CloseReason::ClientNamespaceDisconnect => "client namespace disconnect",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Closing,
    Closed,
}

/// A packet to write: either still to be encoded, or already encoded by a
/// broadcast fan-out.
#[derive(Debug, Clone)]
pub enum OutgoingPacket {
    Plain(Packet),
    PreEncoded(Vec<Fragment>),
}

impl From<Packet> for OutgoingPacket {
    fn from(packet: Packet) -> Self {
        OutgoingPacket::Plain(packet)
    }
}

impl From<Vec<Fragment>> for OutgoingPacket {
    fn from(fragments: Vec<Fragment>) -> Self {
        OutgoingPacket::PreEncoded(fragments)
    }
}

/// Per-write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketOptions {
    /// Best-effort delivery: dropped if the transport is not writable.
    pub volatile: bool,
}

impl PacketOptions {
    /// Options for a best-effort write.
    pub fn volatile() -> Self {
        Self { volatile: true }
    }
}

enum Outbound {
    Write {
        packet: OutgoingPacket,
        volatile: bool,
    },
    Flush(oneshot::Sender<()>),
}

struct AttachedSocket {
    id: String,
    socket: Weak<dyn NamespaceSocket>,
}

impl AttachedSocket {
    fn is_live(&self) -> bool {
        self.socket.strong_count() > 0
    }
}

struct ConnState {
    lifecycle: Lifecycle,
    sockets: HashMap<String, AttachedSocket>,
    connect_buffer: Vec<String>,
    root_attached: bool,
    close_reason: Option<CloseReason>,
}

impl ConnState {
    fn live_sockets(&self) -> Vec<Arc<dyn NamespaceSocket>> {
        self.sockets
            .values()
            .filter_map(|entry| entry.socket.upgrade())
            .collect()
    }
}

struct ClientInner {
    id: String,
    transport: Arc<dyn Transport>,
    registry: Arc<NamespaceRegistry>,
    codec: Arc<dyn PacketCodec>,
    decoder: Mutex<Option<Box<dyn PacketDecoder>>>,
    state: Mutex<ConnState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

/// The namespace multiplexer for one transport connection.
///
/// Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// Non-owning handle to a [`Client`], held by namespace sockets.
#[derive(Clone)]
pub struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    /// Upgrade to a client handle if the client still exists.
    pub fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }
}

impl fmt::Debug for WeakClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakClient")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Client {
    /// Create a client over `transport` and subscribe to its events.
    ///
    /// Must be called from within a tokio runtime: the event pump and the
    /// write queue run as tasks. No packet is sent and no namespace is
    /// attached until the peer connects.
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<NamespaceRegistry>,
        codec: Arc<dyn PacketCodec>,
    ) -> Result<Self> {
        let subscription = transport.subscribe()?;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            id: transport.id().to_string(),
            decoder: Mutex::new(Some(codec.decoder())),
            transport,
            registry,
            codec: codec.clone(),
            state: Mutex::new(ConnState {
                lifecycle: Lifecycle::Active,
                sockets: HashMap::new(),
                connect_buffer: Vec::new(),
                root_attached: false,
                close_reason: None,
            }),
            outbound: Mutex::new(Some(queue_tx)),
            event_pump: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(write_loop(weak.clone(), codec, queue_rx));
        let pump = tokio::spawn(event_loop(weak, subscription));
        *inner.event_pump.lock() = Some(pump);

        tracing::debug!(client = %inner.id, "Client created");
        Ok(Self { inner })
    }

    /// Connection id (the transport's id).
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The shared transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// The codec used for this connection's outgoing packets.
    pub fn codec(&self) -> &Arc<dyn PacketCodec> {
        &self.inner.codec
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state.lock().lifecycle
    }

    /// Check whether teardown has completed.
    pub fn is_closed(&self) -> bool {
        self.lifecycle() == Lifecycle::Closed
    }

    /// Names of the attached namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.state.lock().sockets.keys().cloned().collect();
        names.sort();
        names
    }

    /// The socket attached for `nsp`, if any.
    pub fn socket(&self, nsp: &str) -> Option<Arc<dyn NamespaceSocket>> {
        self.inner
            .state
            .lock()
            .sockets
            .get(nsp)
            .and_then(|entry| entry.socket.upgrade())
    }

    /// Namespaces waiting for the root namespace, in request order.
    pub fn buffered_connects(&self) -> Vec<String> {
        self.inner.state.lock().connect_buffer.clone()
    }

    /// Non-owning handle for back-references.
    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Connect this client to a namespace.
    ///
    /// Unknown namespaces are answered with an ERROR packet. Non-root
    /// namespaces requested before the root attached are buffered and
    /// replayed, in request order, right after the root attaches.
    pub fn connect(&self, name: &str) {
        let Some(namespace) = self.inner.registry.resolve(name) else {
            tracing::debug!(client = %self.inner.id, nsp = name, "Connect to unknown namespace");
            self.packet(Packet::error(name, INVALID_NAMESPACE), PacketOptions::default());
            return;
        };

        {
            let mut state = self.inner.state.lock();
            if state.lifecycle != Lifecycle::Active {
                tracing::debug!(client = %self.inner.id, nsp = name, "Ignoring connect on closing client");
                return;
            }
            if name != ROOT_NAMESPACE && !state.root_attached {
                if !state.connect_buffer.iter().any(|n| n == name) {
                    state.connect_buffer.push(name.to_string());
                }
                tracing::debug!(client = %self.inner.id, nsp = name, "Buffering connect until root namespace attaches");
                return;
            }
            if state.sockets.get(name).is_some_and(AttachedSocket::is_live) {
                tracing::debug!(client = %self.inner.id, nsp = name, "Namespace already attached");
                return;
            }
        }

        let socket = match namespace.add(self) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!(client = %self.inner.id, nsp = name, "Namespace refused connection: {}", e);
                let message = match e {
                    NspwireError::NamespaceRejected { reason, .. } => reason,
                    other => other.to_string(),
                };
                self.packet(Packet::error(name, message), PacketOptions::default());
                return;
            }
        };

        // a connection handler may already have disconnected it
        let connected = socket.is_connected();

        let buffered = {
            let mut state = self.inner.state.lock();

            if state.lifecycle != Lifecycle::Active {
                let reason = state.close_reason.unwrap_or(CloseReason::ForcedServerClose);
                drop(state);
                socket.on_close(reason);
                return;
            }

            if state.sockets.get(name).is_some_and(AttachedSocket::is_live) {
                drop(state);
                tracing::warn!(client = %self.inner.id, nsp = name, "Concurrent attach, dropping duplicate socket");
                socket.disconnect();
                return;
            }

            if connected {
                state.sockets.insert(
                    name.to_string(),
                    AttachedSocket {
                        id: socket.id().to_string(),
                        socket: Arc::downgrade(&socket),
                    },
                );
            } else {
                state.sockets.remove(name);
            }

            if name == ROOT_NAMESPACE && !state.root_attached {
                state.root_attached = true;
                std::mem::take(&mut state.connect_buffer)
            } else {
                Vec::new()
            }
        };

        if connected {
            tracing::debug!(client = %self.inner.id, nsp = name, socket = socket.id(), "Namespace attached");
        } else {
            tracing::debug!(client = %self.inner.id, nsp = name, socket = socket.id(), "Socket closed during attach, not recorded");
        }

        for nsp in buffered {
            self.connect(&nsp);
        }
    }

    /// Remove a socket. Called by each socket when it closes.
    ///
    /// Removing a socket that is not attached (already removed, or replaced)
    /// is a no-op.
    pub fn remove(&self, socket: &dyn NamespaceSocket) {
        let mut state = self.inner.state.lock();
        let nsp = socket.namespace();

        match state.sockets.get(nsp) {
            Some(entry) if entry.id == socket.id() => {
                state.sockets.remove(nsp);
                tracing::debug!(client = %self.inner.id, nsp, socket = socket.id(), "Socket removed");
            }
            _ => {
                tracing::debug!(client = %self.inner.id, socket = socket.id(), "Ignoring remove for unattached socket");
            }
        }
    }

    /// Write a packet to the transport.
    ///
    /// Silently dropped when the client is not active or the transport is
    /// not open. Otherwise queued; the queue encodes and writes in call
    /// order.
    pub fn packet(&self, packet: impl Into<OutgoingPacket>, options: PacketOptions) {
        let packet = packet.into();

        if !self.is_write_open() {
            tracing::debug!(client = %self.inner.id, "Ignoring packet write on closed connection");
            return;
        }

        let queue = self.inner.outbound.lock();
        let queued = queue.as_ref().is_some_and(|q| {
            q.send(Outbound::Write {
                packet,
                volatile: options.volatile,
            })
            .is_ok()
        });
        if !queued {
            tracing::debug!(client = %self.inner.id, "Write queue closed, packet dropped");
        }
    }

    /// Wait until every packet queued before this call was written or
    /// dropped.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let queued = self
            .inner
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|q| q.send(Outbound::Flush(done_tx)).is_ok());
        if queued {
            let _ = done_rx.await;
        }
    }

    /// Write already-encoded fragments to the transport, in order.
    ///
    /// Volatile writes are dropped whole if the transport is not writable.
    /// A failed write is fatal to the connection.
    pub fn write_to_engine(&self, fragments: Vec<Fragment>, volatile: bool) {
        if !self.is_write_open() {
            tracing::debug!(client = %self.inner.id, fragments = fragments.len(), "Dropping write after close");
            return;
        }

        if volatile && !self.inner.transport.is_writable() {
            tracing::debug!(client = %self.inner.id, "Transport not writable, volatile packet dropped");
            return;
        }

        for fragment in fragments {
            if let Err(e) = self.inner.transport.write(fragment) {
                self.on_error(e);
                return;
            }
        }
    }

    /// Called with incoming transport data.
    pub fn on_data(&self, data: Fragment) {
        let data = match data {
            Fragment::Text(text) => {
                let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
                if trimmed.len() == text.len() {
                    Fragment::Text(text)
                } else {
                    Fragment::Text(trimmed.to_string())
                }
            }
            binary => binary,
        };

        let decoded = {
            let mut decoder = self.inner.decoder.lock();
            match decoder.as_mut() {
                Some(decoder) => decoder.add(data),
                None => {
                    tracing::debug!(client = %self.inner.id, "Data after decoder destroyed, dropped");
                    return;
                }
            }
        };

        match decoded {
            Ok(packets) => {
                for packet in packets {
                    self.on_decoded(packet);
                }
            }
            Err(e) => self.on_error(e),
        }
    }

    /// Called when the decoder completes a packet.
    pub fn on_decoded(&self, packet: Packet) {
        if packet.packet_type == PacketType::Connect {
            self.connect(&packet.nsp);
            return;
        }

        let socket = {
            let state = self.inner.state.lock();
            if state.lifecycle != Lifecycle::Active {
                None
            } else {
                state
                    .sockets
                    .get(&packet.nsp)
                    .and_then(|entry| entry.socket.upgrade())
            }
        };

        match socket {
            Some(socket) => socket.on_packet(packet),
            None => {
                tracing::debug!(client = %self.inner.id, nsp = %packet.nsp, "No socket for namespace, packet dropped");
            }
        }
    }

    /// Handle a fatal connection error: notify every socket, tear down and
    /// close the transport.
    pub fn on_error(&self, err: NspwireError) {
        let sockets = {
            let state = self.inner.state.lock();
            if state.lifecycle != Lifecycle::Active {
                tracing::debug!(client = %self.inner.id, "Ignoring error on closing client: {}", err);
                return;
            }
            state.live_sockets()
        };

        tracing::error!(client = %self.inner.id, "Connection error: {}", err);

        for socket in &sockets {
            socket.on_error(&err);
        }
        self.on_close(CloseReason::ClientError);
        self.inner.transport.close();
    }

    /// Tear the connection down. Idempotent.
    pub fn on_close(&self, reason: CloseReason) {
        let sockets = {
            let mut state = self.inner.state.lock();
            if state.lifecycle != Lifecycle::Active {
                tracing::debug!(client = %self.inner.id, %reason, "Ignoring close, already {:?}", state.lifecycle);
                return;
            }
            state.lifecycle = Lifecycle::Closing;
            state.close_reason = Some(reason);
            state.live_sockets()
        };

        tracing::debug!(client = %self.inner.id, %reason, sockets = sockets.len(), "Closing client");

        for socket in &sockets {
            socket.on_close(reason);
        }

        {
            let mut state = self.inner.state.lock();
            state.sockets.clear();
            state.connect_buffer.clear();
        }

        if let Some(mut decoder) = self.inner.decoder.lock().take() {
            decoder.destroy();
        }

        self.unsubscribe();

        self.inner.state.lock().lifecycle = Lifecycle::Closed;
    }

    /// Close the underlying transport, if still open.
    pub fn close(&self) {
        if self.inner.transport.ready_state() == ReadyState::Open {
            tracing::debug!(client = %self.inner.id, "Forcing transport close");
            self.inner.transport.close();
            self.on_close(CloseReason::ForcedServerClose);
        }
    }

    /// Disconnect every attached socket, then close the transport.
    ///
    /// Waits for the sockets' DISCONNECT packets to be written first.
    pub async fn disconnect(&self) {
        let sockets = self.inner.state.lock().live_sockets();
        for socket in &sockets {
            socket.disconnect();
        }
        self.inner.state.lock().sockets.clear();

        self.flush().await;
        self.close();
    }

    fn is_write_open(&self) -> bool {
        self.inner.state.lock().lifecycle == Lifecycle::Active
            && self.inner.transport.ready_state() == ReadyState::Open
    }

    /// Stop receiving transport events and close the write queue.
    fn unsubscribe(&self) {
        if let Some(pump) = self.inner.event_pump.lock().take() {
            pump.abort();
        }
        self.inner.outbound.lock().take();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.inner.id)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

/// Drain transport events into the client's handlers.
async fn event_loop(weak: Weak<ClientInner>, mut events: Subscription) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let client = Client { inner };

        match event {
            TransportEvent::Data(data) => client.on_data(data),
            TransportEvent::Error(e) => client.on_error(e),
            TransportEvent::Close => client.on_close(CloseReason::TransportClose),
        }

        if client.lifecycle() != Lifecycle::Active {
            break;
        }
    }
}

/// Encode and write queued packets strictly in queue order.
async fn write_loop(
    client: Weak<ClientInner>,
    codec: Arc<dyn PacketCodec>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = queue.recv().await {
        match item {
            Outbound::Flush(done) => {
                let _ = done.send(());
            }
            Outbound::Write { packet, volatile } => {
                let fragments = match packet {
                    OutgoingPacket::Plain(packet) => match codec.encode(packet).await {
                        Ok(fragments) => fragments,
                        Err(e) => {
                            tracing::warn!("Failed to encode packet: {}", e);
                            continue;
                        }
                    },
                    OutgoingPacket::PreEncoded(fragments) => fragments,
                };

                let Some(inner) = client.upgrade() else {
                    break;
                };
                Client { inner }.write_to_engine(fragments, volatile);
            }
        }
    }
}
