//! Namespace module - logical channels multiplexed over one connection.
//!
//! Provides:
//! - [`Namespace`] / [`NamespaceSocket`] - the seams the client talks to
//! - [`NamespaceRegistry`] - resolves namespace names
//! - [`LocalNamespace`] / [`Socket`] - in-process implementations
//!
//! Sockets are owned by their namespace. The client only keeps weak handles
//! to them, and a socket only keeps a [`WeakClient`](crate::WeakClient)
//! back-reference, so neither side keeps the other alive.
//!
//! # Example
//!
//! ```ignore
//! use nspwire::namespace::{LocalNamespace, NamespaceRegistry};
//!
//! let registry = NamespaceRegistry::new();
//! let chat = LocalNamespace::new("/chat");
//! chat.on_connection(|socket| {
//!     tracing::info!("{} joined", socket.id());
//! });
//! registry.register(chat);
//! ```

mod local;
mod registry;
mod socket;

use std::sync::Arc;

use crate::client::{Client, CloseReason};
use crate::error::{NspwireError, Result};
use crate::packet::Packet;

pub use local::LocalNamespace;
pub use registry::NamespaceRegistry;
pub use socket::{Socket, SocketEvent};

/// A namespace able to attach clients.
pub trait Namespace: Send + Sync + 'static {
    /// Namespace name, e.g. `"/"` or `"/chat"`.
    fn name(&self) -> &str;

    /// Attach a client, producing the socket bound to it.
    ///
    /// The namespace must keep the returned socket alive for as long as it is
    /// connected; the client only holds a weak handle.
    fn add(&self, client: &Client) -> Result<Arc<dyn NamespaceSocket>>;
}

/// The per-namespace logical connection.
pub trait NamespaceSocket: Send + Sync + 'static {
    /// Socket identifier, unique within its namespace.
    fn id(&self) -> &str;

    /// Name of the namespace this socket belongs to.
    fn namespace(&self) -> &str;

    /// A decoded packet addressed to this socket's namespace.
    fn on_packet(&self, packet: Packet);

    /// The underlying connection failed.
    fn on_error(&self, err: &NspwireError);

    /// The socket is closed; it must not use the client afterwards.
    fn on_close(&self, reason: CloseReason);

    /// Server-initiated disconnect of this socket.
    fn disconnect(&self);

    /// Whether the socket is still open. A socket closed while the
    /// namespace was still attaching it is not recorded by the client.
    fn is_connected(&self) -> bool {
        true
    }
}
