//! Transport module - the physical connection shared by every namespace.
//!
//! Provides:
//! - [`Transport`] - the contract the client multiplexes over
//! - [`StreamTransport`] - a transport over any tokio byte stream
//! - [`FrameBuffer`] - reassembly of length-prefixed fragments
//!
//! A transport publishes its events once, through [`Transport::subscribe`].
//! Dropping the returned [`Subscription`] unsubscribes.

mod frame;
mod frame_buffer;
mod stream;
mod writer;

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::error::{NspwireError, Result};
use crate::packet::Fragment;

pub use frame::{
    build_frame, FrameHeader, FrameKind, DEFAULT_MAX_PAYLOAD_SIZE, FRAME_HEADER_SIZE,
};
pub use frame_buffer::FrameBuffer;
pub use stream::StreamTransport;
pub use writer::{
    spawn_writer_task, spawn_writer_task_default, OutboundFrame, WriterConfig, WriterHandle,
    DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_PENDING_FRAMES,
};

/// Readiness of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Opening,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub(crate) fn to_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ReadyState::Opening,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Event published by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A raw chunk arrived.
    Data(Fragment),
    /// The transport failed.
    Error(NspwireError),
    /// The transport closed.
    Close,
}

/// Receiving side of a transport's event stream.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Subscription {
    /// Wrap an event receiver.
    pub fn new(rx: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self { rx }
    }

    /// Create a connected sender/subscription pair.
    pub fn channel() -> (mpsc::UnboundedSender<TransportEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Wait for the next event. `None` once the transport dropped its sender.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// The physical connection contract.
pub trait Transport: Send + Sync + 'static {
    /// Connection identifier.
    fn id(&self) -> &str;

    /// Current readiness.
    fn ready_state(&self) -> ReadyState;

    /// Enqueue one fragment for sending.
    fn write(&self, fragment: Fragment) -> Result<()>;

    /// Initiate shutdown. Idempotent.
    fn close(&self);

    /// Whether the transport can take more writes right now.
    ///
    /// Only best-effort (volatile) sends consult this flag.
    fn is_writable(&self) -> bool;

    /// Take the event stream. Fails with [`NspwireError::AlreadySubscribed`]
    /// on the second call.
    fn subscribe(&self) -> Result<Subscription>;
}

/// Generate a unique connection id for this process.
///
/// Format: `{pid:x}-{random:x}-{counter}`.
pub fn generate_connection_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}-{}", std::process::id(), rand_u64(), n)
}

/// Simple random u64 using system time and process ID.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_unique() {
        let a = generate_connection_id();
        let b = generate_connection_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ready_state_round_trip() {
        for state in [
            ReadyState::Opening,
            ReadyState::Open,
            ReadyState::Closing,
            ReadyState::Closed,
        ] {
            assert_eq!(ReadyState::from_u8(state.to_u8()), state);
        }
    }

    #[tokio::test]
    async fn test_subscription_ends_when_sender_dropped() {
        let (tx, mut sub) = Subscription::channel();
        tx.send(TransportEvent::Close).unwrap();
        drop(tx);
        assert!(matches!(sub.recv().await, Some(TransportEvent::Close)));
        assert!(sub.recv().await.is_none());
    }
}
