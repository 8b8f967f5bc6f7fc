//! Codec module - packet encoding and streaming decoding.
//!
//! A codec turns a [`Packet`] into an ordered sequence of wire [`Fragment`]s
//! and provides a streaming [`PacketDecoder`] for the reverse direction:
//!
//! - [`TextCodec`] - text header plus one binary fragment per attachment
//! - [`MsgPackCodec`] - one MessagePack binary fragment per packet
//!
//! # Design
//!
//! Encoding is asynchronous (`encode` returns a boxed future) so codecs may
//! offload work. The client serializes completions in call order, so a codec
//! never has to care about ordering between packets.
//!
//! Decoding is incremental: one chunk may complete zero, one or many packets,
//! and one packet may span several chunks.
//!
//! # Example
//!
//! ```
//! use nspwire::codec::{PacketCodec, TextCodec};
//! use nspwire::packet::{Fragment, Packet};
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let codec = TextCodec::new();
//! let fragments = codec.encode(Packet::event("/", json!(["hi"]))).await.unwrap();
//! assert_eq!(fragments, vec![Fragment::from(r#"2["hi"]"#)]);
//!
//! let mut decoder = codec.decoder();
//! let packets = decoder.add(fragments[0].clone()).unwrap();
//! assert_eq!(packets.len(), 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

mod msgpack;
mod text;

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::packet::{Fragment, Packet};

pub use msgpack::MsgPackCodec;
pub use text::{TextCodec, DEFAULT_MAX_ATTACHMENTS};

/// Boxed future for encode results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Packet encoder and decoder factory shared by every connection of a server.
pub trait PacketCodec: Send + Sync + 'static {
    /// Encode a packet into ordered wire fragments.
    fn encode(&self, packet: Packet) -> BoxFuture<'static, Result<Vec<Fragment>>>;

    /// Create a fresh streaming decoder for one connection.
    fn decoder(&self) -> Box<dyn PacketDecoder>;
}

/// Streaming packet decoder owned by a single connection.
pub trait PacketDecoder: Send + 'static {
    /// Feed one raw chunk and collect every packet it completes.
    fn add(&mut self, chunk: Fragment) -> Result<Vec<Packet>>;

    /// Release any partially reconstructed state.
    fn destroy(&mut self);
}
