//! Transport over any tokio byte stream (TCP, Unix socket, duplex pipe).
//!
//! The stream is split into a read half, driven by a read loop that
//! reassembles fragments and publishes [`TransportEvent`]s, and a write half
//! owned by the writer task.
//!
//! # Example
//!
//! ```ignore
//! use nspwire::transport::{StreamTransport, Transport};
//!
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:4000").await?;
//! let transport = StreamTransport::open(stream);
//! let mut events = transport.subscribe()?;
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::frame::DEFAULT_MAX_PAYLOAD_SIZE;
use super::frame_buffer::FrameBuffer;
use super::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};
use super::{generate_connection_id, ReadyState, Subscription, Transport, TransportEvent};
use crate::error::{NspwireError, Result};
use crate::packet::Fragment;

/// Read buffer size per read call.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A [`Transport`] framing fragments over a byte stream.
pub struct StreamTransport {
    id: String,
    state: AtomicU8,
    writer: Mutex<Option<WriterHandle>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<Subscription>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StreamTransport {
    /// Wrap a stream with a generated id and default limits.
    pub fn open<S>(stream: S) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::new(
            generate_connection_id(),
            stream,
            WriterConfig::default(),
            DEFAULT_MAX_PAYLOAD_SIZE,
        )
    }

    /// Wrap a stream.
    ///
    /// Must be called from within a tokio runtime: the read loop and the
    /// writer task are spawned immediately.
    pub fn new<S>(
        id: impl Into<String>,
        stream: S,
        config: WriterConfig,
        max_payload_size: u32,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, config);
        let (events_tx, subscription) = Subscription::channel();

        let transport = Arc::new(Self {
            id: id.into(),
            state: AtomicU8::new(ReadyState::Open.to_u8()),
            writer: Mutex::new(Some(writer)),
            events_tx,
            events_rx: Mutex::new(Some(subscription)),
            reader: Mutex::new(None),
        });

        let weak = Arc::downgrade(&transport);
        let events = transport.events_tx.clone();
        let reader = tokio::spawn(async move {
            let result = read_loop(read_half, max_payload_size, events).await;
            if let Some(transport) = weak.upgrade() {
                transport.finish(result.err());
            }
        });
        *transport.reader.lock() = Some(reader);

        let weak = Arc::downgrade(&transport);
        tokio::spawn(async move {
            let result = match writer_task.await {
                Ok(result) => result,
                Err(e) => Err(NspwireError::Io(std::io::Error::other(e))),
            };
            if let (Err(e), Some(transport)) = (result, weak.upgrade()) {
                transport.finish(Some(e));
            }
        });

        transport
    }

    /// Pending frames queued in the writer task.
    pub fn pending_frames(&self) -> usize {
        self.writer
            .lock()
            .as_ref()
            .map_or(0, |w| w.pending_count())
    }

    /// Mark closed. Returns `false` if it already was.
    fn mark_closed(&self) -> bool {
        let prev = self
            .state
            .swap(ReadyState::Closed.to_u8(), Ordering::AcqRel);
        ReadyState::from_u8(prev) != ReadyState::Closed
    }

    /// Called when the stream ends or either half fails.
    fn finish(&self, error: Option<NspwireError>) {
        if !self.mark_closed() {
            return;
        }
        if let Some(e) = error {
            tracing::warn!(transport = %self.id, "Transport read failed: {}", e);
            let _ = self.events_tx.send(TransportEvent::Error(e));
        }
        self.writer.lock().take();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        let _ = self.events_tx.send(TransportEvent::Close);
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    max_payload_size: u32,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Result<()> {
    let mut frames = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => return Err(NspwireError::Io(e)),
        };

        for fragment in frames.push(&buf[..n])? {
            if events.send(TransportEvent::Data(fragment)).is_err() {
                return Ok(());
            }
        }
    }
}

impl Transport for StreamTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn write(&self, fragment: Fragment) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(NspwireError::ConnectionClosed);
        }
        let writer = self.writer.lock();
        let writer = writer.as_ref().ok_or(NspwireError::ConnectionClosed)?;
        writer.try_send(OutboundFrame::from_fragment(fragment))
    }

    fn close(&self) {
        if !self.mark_closed() {
            return;
        }
        tracing::debug!(transport = %self.id, "Closing transport");
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        // dropping the handle lets the writer flush what is queued, then shut down
        self.writer.lock().take();
        let _ = self.events_tx.send(TransportEvent::Close);
    }

    fn is_writable(&self) -> bool {
        self.ready_state() == ReadyState::Open
            && self
                .writer
                .lock()
                .as_ref()
                .is_some_and(|w| !w.is_backpressure_active())
    }

    fn subscribe(&self) -> Result<Subscription> {
        self.events_rx
            .lock()
            .take()
            .ok_or(NspwireError::AlreadySubscribed)
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}
