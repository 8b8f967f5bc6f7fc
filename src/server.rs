//! Server builder and connection bookkeeping.
//!
//! The [`ServerBuilder`] provides a fluent API for declaring namespaces and
//! picking the codec. The [`Server`] owns:
//! 1. The namespace registry shared by every client
//! 2. The codec shared by every client
//! 3. The transport limits used for accepted streams
//! 4. The set of live clients, pruned as they close
//!
//! # Example
//!
//! ```ignore
//! use nspwire::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder().namespace("/chat").build();
//!     server.of("/chat").on_connection(|socket| {
//!         socket.emit("welcome", vec![]);
//!     });
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:4000").await?;
//!     server.serve(listener).await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::client::Client;
use crate::codec::{MsgPackCodec, PacketCodec, TextCodec, DEFAULT_MAX_ATTACHMENTS};
use crate::error::{NspwireError, Result};
use crate::namespace::{LocalNamespace, NamespaceRegistry};
use crate::packet::ROOT_NAMESPACE;
use crate::transport::{
    generate_connection_id, StreamTransport, Transport, WriterConfig, DEFAULT_MAX_PAYLOAD_SIZE,
};

/// Builder for configuring and creating a [`Server`].
pub struct ServerBuilder {
    namespaces: Vec<String>,
    codec: Option<Arc<dyn PacketCodec>>,
    writer_config: WriterConfig,
    max_payload_size: u32,
    max_attachments: usize,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            namespaces: Vec::new(),
            codec: None,
            writer_config: WriterConfig::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_attachments: DEFAULT_MAX_ATTACHMENTS,
        }
    }

    /// Declare a namespace. The root namespace `/` always exists.
    pub fn namespace(mut self, name: &str) -> Self {
        if !self.namespaces.iter().any(|n| n == name) {
            self.namespaces.push(name.to_string());
        }
        self
    }

    /// Use a custom codec for every connection.
    pub fn codec<C: PacketCodec>(mut self, codec: C) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Use the MessagePack codec instead of the text codec.
    pub fn msgpack(self) -> Self {
        self.codec(MsgPackCodec::new())
    }

    /// Set the maximum pending frames before a stream transport reports
    /// itself unwritable.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_frames = limit;
        self
    }

    /// Set the hard cap on frames queued for a stream transport.
    ///
    /// Default: 65536
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Set the largest accepted incoming frame payload.
    ///
    /// Default: 100 MB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Set the attachment limit of the text codec. Ignored with a custom
    /// codec.
    ///
    /// Default: 10
    pub fn max_attachments(mut self, limit: usize) -> Self {
        self.max_attachments = limit;
        self
    }

    /// Build the server.
    pub fn build(self) -> Server {
        let codec: Arc<dyn PacketCodec> = match self.codec {
            Some(codec) => codec,
            None => Arc::new(TextCodec::with_max_attachments(self.max_attachments)),
        };

        let server = Server {
            registry: Arc::new(NamespaceRegistry::new()),
            namespaces: RwLock::new(HashMap::new()),
            codec,
            writer_config: self.writer_config,
            max_payload_size: self.max_payload_size,
            clients: Mutex::new(HashMap::new()),
        };

        server.of(ROOT_NAMESPACE);
        for name in &self.namespaces {
            server.of(name);
        }
        server
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A namespace server accepting connections.
pub struct Server {
    registry: Arc<NamespaceRegistry>,
    namespaces: RwLock<HashMap<String, Arc<LocalNamespace>>>,
    codec: Arc<dyn PacketCodec>,
    writer_config: WriterConfig,
    max_payload_size: u32,
    clients: Mutex<HashMap<String, Client>>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Get a namespace, creating and registering it if needed.
    pub fn of(&self, name: &str) -> Arc<LocalNamespace> {
        if let Some(ns) = self.namespaces.read().get(name) {
            return ns.clone();
        }

        let mut namespaces = self.namespaces.write();
        namespaces
            .entry(name.to_string())
            .or_insert_with(|| {
                let ns = LocalNamespace::new(name);
                self.registry.register(ns.clone());
                tracing::debug!(nsp = name, "Namespace created");
                ns
            })
            .clone()
    }

    /// Get an existing namespace.
    pub fn namespace(&self, name: &str) -> Result<Arc<LocalNamespace>> {
        self.namespaces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| NspwireError::UnknownNamespace(name.to_string()))
    }

    /// The registry clients resolve namespaces through.
    pub fn registry(&self) -> &Arc<NamespaceRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &Arc<dyn PacketCodec> {
        &self.codec
    }

    /// Attach a client to a transport.
    pub fn accept(&self, transport: Arc<dyn Transport>) -> Result<Client> {
        let client = Client::new(transport, self.registry.clone(), self.codec.clone())?;

        let mut clients = self.clients.lock();
        clients.retain(|_, c| !c.is_closed());
        clients.insert(client.id().to_string(), client.clone());

        tracing::debug!(client = client.id(), clients = clients.len(), "Client accepted");
        Ok(client)
    }

    /// Attach a client to a byte stream, framed by a [`StreamTransport`].
    pub fn accept_stream<S>(&self, stream: S) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let transport = StreamTransport::new(
            generate_connection_id(),
            stream,
            self.writer_config.clone(),
            self.max_payload_size,
        );
        self.accept(transport)
    }

    /// Accept TCP connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!(%addr, "Failed to set TCP_NODELAY: {}", e);
            }
            let client = self.accept_stream(stream)?;
            tracing::info!(client = client.id(), %addr, "Connection accepted");
        }
    }

    /// Live clients.
    pub fn clients(&self) -> Vec<Client> {
        let mut clients = self.clients.lock();
        clients.retain(|_, c| !c.is_closed());
        clients.values().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients().len()
    }

    /// Disconnect every client and close its transport.
    pub async fn close(&self) {
        let clients: Vec<Client> = self.clients.lock().drain().map(|(_, c)| c).collect();
        tracing::debug!(clients = clients.len(), "Closing server");
        for client in clients {
            client.disconnect().await;
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("namespaces", &self.registry.names())
            .field("clients", &self.clients.lock().len())
            .finish()
    }
}
