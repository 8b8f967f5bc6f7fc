//! # nspwire
//!
//! Namespace multiplexing over a single bidirectional connection.
//!
//! One physical connection (a [`transport::Transport`]) carries any number of
//! logical channels, called namespaces. Each connection gets a [`Client`]
//! that decodes incoming packets, routes them to the namespace socket they
//! are tagged with, and serializes outgoing packets back onto the transport
//! in call order.
//!
//! ## Architecture
//!
//! - **Transport**: framed fragments over any tokio byte stream
//! - **Codec**: packets to wire fragments (text or MessagePack)
//! - **Client**: per-connection multiplexer and lifecycle
//! - **Namespace**: registry, namespaces and their sockets
//!
//! ## Example
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

pub mod codec;
pub mod error;
pub mod namespace;
pub mod packet;
pub mod transport;

mod client;
mod server;

pub use client::{
    Client, CloseReason, Lifecycle, OutgoingPacket, PacketOptions, WeakClient, INVALID_NAMESPACE,
};
pub use error::{NspwireError, Result};
pub use server::{Server, ServerBuilder};
