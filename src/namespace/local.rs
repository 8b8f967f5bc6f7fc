//! In-process namespace owning one [`Socket`] per attached client.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::{json, Value};

use super::{Namespace, NamespaceSocket, Socket};
use crate::client::{Client, PacketOptions};
use crate::error::Result;
use crate::packet::{Packet, ROOT_NAMESPACE};

type ConnectionHandler = Arc<dyn Fn(Arc<Socket>) + Send + Sync>;

/// A namespace whose sockets live in this process.
pub struct LocalNamespace {
    name: String,
    this: Weak<LocalNamespace>,
    sockets: RwLock<HashMap<String, Arc<Socket>>>,
    on_connection: RwLock<Option<ConnectionHandler>>,
}

impl LocalNamespace {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            name,
            this: this.clone(),
            sockets: RwLock::new(HashMap::new()),
            on_connection: RwLock::new(None),
        })
    }

    /// Set the callback run for every newly attached socket.
    pub fn on_connection<F>(&self, handler: F)
    where
        F: Fn(Arc<Socket>) + Send + Sync + 'static,
    {
        *self.on_connection.write() = Some(Arc::new(handler));
    }

    /// Look up a connected socket by id.
    pub fn socket(&self, id: &str) -> Option<Arc<Socket>> {
        self.sockets.read().get(id).cloned()
    }

    /// Connected sockets, in no particular order.
    pub fn sockets(&self) -> Vec<Arc<Socket>> {
        self.sockets.read().values().cloned().collect()
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.read().len()
    }

    pub(super) fn remove_socket(&self, id: &str) {
        self.sockets.write().remove(id);
    }

    /// Disconnect every socket of this namespace.
    pub fn disconnect_all(&self) {
        for socket in self.sockets() {
            socket.disconnect();
        }
    }

    /// Send an event to every socket, encoding it only once.
    ///
    /// Uses the codec of the first socket's client; every client of a server
    /// shares one. Returns the number of sockets written to.
    pub async fn broadcast(&self, event: &str, args: Vec<Value>) -> Result<usize> {
        let clients: Vec<Client> = self
            .sockets()
            .iter()
            .filter(|s| s.is_connected())
            .filter_map(|s| s.client())
            .collect();

        let Some(first) = clients.first() else {
            return Ok(0);
        };

        let mut data = vec![Value::String(event.to_string())];
        data.extend(args);
        let packet = Packet::event(self.name.as_str(), Value::Array(data));
        let fragments = first.codec().encode(packet).await?;

        for client in &clients {
            client.packet(fragments.clone(), PacketOptions::default());
        }

        tracing::debug!(nsp = %self.name, sockets = clients.len(), "Broadcast sent");
        Ok(clients.len())
    }
}

impl Namespace for LocalNamespace {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, client: &Client) -> Result<Arc<dyn NamespaceSocket>> {
        let id = if self.name == ROOT_NAMESPACE {
            client.id().to_string()
        } else {
            format!("{}#{}", self.name, client.id())
        };

        let socket = Arc::new(Socket::new(
            id.clone(),
            self.name.clone(),
            client.downgrade(),
            self.this.clone(),
        ));
        self.sockets.write().insert(id.clone(), socket.clone());

        client.packet(
            Packet::connect(self.name.as_str()).with_data(json!({ "sid": id })),
            PacketOptions::default(),
        );

        let handler = self.on_connection.read().clone();
        if let Some(handler) = handler {
            handler(socket.clone());
        }

        Ok(socket)
    }
}

impl std::fmt::Debug for LocalNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNamespace")
            .field("name", &self.name)
            .field("sockets", &self.socket_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CloseReason;
    use crate::codec::TextCodec;
    use crate::namespace::{NamespaceRegistry, SocketEvent};
    use crate::packet::Fragment;
    use crate::transport::{FrameHeader, StreamTransport, FRAME_HEADER_SIZE};
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    async fn read_fragment(peer: &mut DuplexStream) -> Fragment {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        peer.read_exact(&mut header).await.unwrap();
        let header = FrameHeader::decode(&header).unwrap().unwrap();
        let mut payload = vec![0u8; header.payload_length as usize];
        peer.read_exact(&mut payload).await.unwrap();
        header.into_fragment(Bytes::from(payload)).unwrap()
    }

    fn setup(names: &[&str]) -> (Client, Vec<Arc<LocalNamespace>>, DuplexStream) {
        let registry = Arc::new(NamespaceRegistry::new());
        let namespaces: Vec<_> = names.iter().map(|n| LocalNamespace::new(*n)).collect();
        for ns in &namespaces {
            registry.register(ns.clone());
        }
        let (local, peer) = duplex(64 * 1024);
        let transport = StreamTransport::new("c1", local, Default::default(), 1024 * 1024);
        let client = Client::new(transport, registry, Arc::new(TextCodec::new())).unwrap();
        (client, namespaces, peer)
    }

    #[tokio::test]
    async fn test_socket_ids() {
        let (client, namespaces, _peer) = setup(&["/", "/chat"]);

        client.connect("/");
        client.connect("/chat");

        assert!(namespaces[0].socket("c1").is_some());
        assert!(namespaces[1].socket("/chat#c1").is_some());
    }

    #[tokio::test]
    async fn test_connect_ack_sent() {
        let (client, _namespaces, mut peer) = setup(&["/", "/chat"]);

        client.connect("/");
        client.connect("/chat");

        assert_eq!(read_fragment(&mut peer).await, Fragment::from(r#"0{"sid":"c1"}"#));
        assert_eq!(
            read_fragment(&mut peer).await,
            Fragment::from(r#"0/chat,{"sid":"/chat#c1"}"#)
        );
    }

    #[tokio::test]
    async fn test_on_connection_handler() {
        let (client, namespaces, mut peer) = setup(&["/"]);
        namespaces[0].on_connection(|socket| {
            socket.emit("welcome", vec![json!(1)]);
        });

        client.connect("/");

        read_fragment(&mut peer).await;
        assert_eq!(read_fragment(&mut peer).await, Fragment::from(r#"2["welcome",1]"#));
    }

    #[tokio::test]
    async fn test_incoming_event_delivered() {
        let (client, namespaces, _peer) = setup(&["/"]);
        client.connect("/");
        let socket = namespaces[0].socket("c1").unwrap();
        let mut events = socket.take_events().unwrap();

        client.on_data(Fragment::from(r#"2["hello","world"]"#));

        match events.recv().await {
            Some(SocketEvent::Packet(packet)) => assert_eq!(packet.event_name(), Some("hello")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(socket.take_events().is_none());
    }

    #[tokio::test]
    async fn test_peer_disconnect_closes_socket() {
        let (client, namespaces, _peer) = setup(&["/", "/chat"]);
        client.connect("/");
        client.connect("/chat");
        let chat = namespaces[1].socket("/chat#c1").unwrap();
        let mut events = chat.take_events().unwrap();

        client.on_data(Fragment::from("1/chat,"));

        assert_eq!(
            events.recv().await,
            Some(SocketEvent::Closed(CloseReason::ClientNamespaceDisconnect))
        );
        assert!(!chat.is_connected());
        assert_eq!(namespaces[1].socket_count(), 0);
        assert_eq!(client.namespaces(), vec!["/"]);
    }

    #[tokio::test]
    async fn test_server_disconnect_sends_packet() {
        let (client, namespaces, mut peer) = setup(&["/", "/chat"]);
        client.connect("/");
        client.connect("/chat");
        read_fragment(&mut peer).await;
        read_fragment(&mut peer).await;

        let chat = namespaces[1].socket("/chat#c1").unwrap();
        let mut events = chat.take_events().unwrap();
        chat.disconnect();
        chat.disconnect();

        assert_eq!(read_fragment(&mut peer).await, Fragment::from("1/chat,"));
        assert_eq!(
            events.recv().await,
            Some(SocketEvent::Closed(CloseReason::ServerNamespaceDisconnect))
        );
        assert!(events.try_recv().is_err());
        assert_eq!(client.namespaces(), vec!["/"]);
    }

    #[tokio::test]
    async fn test_handler_rejection_leaves_namespace_reconnectable() {
        let (client, namespaces, mut peer) = setup(&["/", "/chat"]);
        namespaces[1].on_connection(|socket| socket.disconnect());

        client.connect("/");
        client.connect("/chat");

        assert_eq!(client.namespaces(), vec!["/"]);
        assert!(client.socket("/chat").is_none());
        assert_eq!(namespaces[1].socket_count(), 0);
        read_fragment(&mut peer).await;
        assert_eq!(
            read_fragment(&mut peer).await,
            Fragment::from(r#"0/chat,{"sid":"/chat#c1"}"#)
        );
        assert_eq!(read_fragment(&mut peer).await, Fragment::from("1/chat,"));

        namespaces[1].on_connection(|_| {});
        client.on_data(Fragment::from("0/chat,"));

        assert_eq!(client.namespaces(), vec!["/", "/chat"]);
        assert!(namespaces[1].socket("/chat#c1").unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_client_close_reaches_every_socket() {
        let (client, namespaces, _peer) = setup(&["/", "/chat"]);
        client.connect("/");
        client.connect("/chat");
        let mut root_events = namespaces[0].socket("c1").unwrap().take_events().unwrap();

        client.on_close(CloseReason::TransportClose);

        assert_eq!(
            root_events.recv().await,
            Some(SocketEvent::Closed(CloseReason::TransportClose))
        );
        assert_eq!(namespaces[0].socket_count(), 0);
        assert_eq!(namespaces[1].socket_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_clients() {
        let registry = Arc::new(NamespaceRegistry::new());
        let root = LocalNamespace::new("/");
        registry.register(root.clone());

        let mut peers = Vec::new();
        let mut clients = Vec::new();
        for i in 0..3 {
            let (local, peer) = duplex(64 * 1024);
            let transport =
                StreamTransport::new(format!("c{}", i), local, Default::default(), 1024 * 1024);
            let client =
                Client::new(transport, registry.clone(), Arc::new(TextCodec::new())).unwrap();
            client.connect("/");
            peers.push(peer);
            clients.push(client);
        }

        let sent = root.broadcast("news", vec![json!("extra")]).await.unwrap();
        assert_eq!(sent, 3);

        for peer in &mut peers {
            read_fragment(peer).await;
            assert_eq!(read_fragment(peer).await, Fragment::from(r#"2["news","extra"]"#));
        }
    }

    #[tokio::test]
    async fn test_broadcast_empty_namespace() {
        let ns = LocalNamespace::new("/empty");
        assert_eq!(ns.broadcast("x", vec![]).await.unwrap(), 0);
    }
}
