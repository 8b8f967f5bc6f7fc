//! Dedicated writer task for a stream transport.
//!
//! Frames go to the writer task over a bounded channel instead of through a
//! lock on the write half. The task drains whatever is queued and sends it
//! with one vectored write.
//!
//! ```text
//! namespace A ─┐
//! namespace B ─┼─► Client write queue ─► WriterHandle ─► Writer Task ─► stream
//! namespace N ─┘
//! ```
//!
//! Two limits apply:
//! - above `max_pending_frames` queued frames the transport reports itself
//!   unwritable, so volatile packets get dropped
//! - at `channel_capacity` queued frames writes fail outright
//!
//! A single batch write stalling longer than `backpressure_timeout` fails the
//! task with [`NspwireError::BackpressureTimeout`].

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::frame::{FrameHeader, FRAME_HEADER_SIZE};
use crate::error::{NspwireError, Result};
use crate::packet::Fragment;

/// Default queued-frame count above which the transport is not writable.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default hard cap on queued frames.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64 * 1024;

/// Default limit for one stalled batch write.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames drained into a single vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// A framed fragment ready for the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    pub header: [u8; FRAME_HEADER_SIZE],
    pub payload: Bytes,
}

impl OutboundFrame {
    pub fn from_fragment(fragment: Fragment) -> Self {
        let header = FrameHeader::for_fragment(&fragment).encode();
        let payload = match fragment {
            Fragment::Text(s) => Bytes::from(s),
            Fragment::Binary(b) => b,
        };
        Self { header, payload }
    }

    /// Bytes on the wire, header included.
    #[inline]
    pub fn size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Queued frames above which the transport reports not writable.
    pub max_pending_frames: usize,
    /// Hard cap on queued frames.
    pub channel_capacity: usize,
    /// Limit for one batch write to make progress.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Sending side of the writer task.
///
/// Dropping every handle lets the task write out what is queued, shut the
/// stream down and exit.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    high_water: usize,
}

impl WriterHandle {
    /// Queue a frame without waiting.
    ///
    /// Fails with [`NspwireError::WriteBufferFull`] at the hard cap and with
    /// [`NspwireError::ConnectionClosed`] once the task is gone.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            match e {
                mpsc::error::TrySendError::Full(_) => NspwireError::WriteBufferFull,
                mpsc::error::TrySendError::Closed(_) => NspwireError::ConnectionClosed,
            }
        })
    }

    /// Queued frames not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the queue is above the writability high-water mark.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending_count() >= self.high_water
    }
}

/// Spawn the writer task over `writer`.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));
    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        high_water: config.max_pending_frames,
    };
    let task = tokio::spawn(writer_loop(rx, writer, pending, config.backpressure_timeout));
    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    stall_timeout: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while rx.recv_many(&mut batch, MAX_BATCH_SIZE).await > 0 {
        tokio::time::timeout(stall_timeout, write_batch(&mut writer, &batch))
            .await
            .map_err(|_| NspwireError::BackpressureTimeout)??;

        pending.fetch_sub(batch.len(), Ordering::AcqRel);
        batch.clear();
    }

    writer.shutdown().await?;
    Ok(())
}

/// Write a batch with scatter/gather I/O, resuming after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut written = 0;

    while written < total {
        let slices = remaining_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices of `batch` left to write after `skip` bytes went out.
fn remaining_slices(batch: &[OutboundFrame], mut skip: usize) -> Vec<IoSlice<'_>> {
    batch
        .iter()
        .flat_map(|frame| [&frame.header[..], &frame.payload[..]])
        .filter_map(|part| {
            if skip >= part.len() {
                skip -= part.len();
                None
            } else {
                let rest = &part[skip..];
                skip = 0;
                Some(IoSlice::new(rest))
            }
        })
        .collect()
}
