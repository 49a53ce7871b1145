// SPDX-License-Identifier: AGPL-3.0-or-later
// Backpressure/timeout wrapping grounded on `io_with_timeout`
// (examples/Masorubka1-iscsi-client-rs/src/client/common.rs); queue
// mechanics reuse crate::chunk::ChunkQueue.

//! The response write path: an inline fast path for small responses, and a
//! background [`AsyncWriterQueue`] for large ones that would otherwise block
//! the connection's task on a slow client.

use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use bitflags::bitflags;
use bytes::Bytes;
use tokio::{sync::Mutex, time::timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    chunk::{Chunk, ChunkQueue},
    driver::{Driver, Sock},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WriteFlags: u8 {
        const CHUNKED       = 0b0001;
        const SENT_LAST_CHUNK = 0b0010;
    }
}

async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where F: Future<Output = Result<T>> {
    tokio::select! {
        () = cancel.cancelled() => Err(anyhow!("{label} cancelled")),
        res = timeout(io_timeout, fut) => {
            match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(anyhow!("{label} timed out")),
            }
        }
    }
}

/// Wraps a chunk of body data in its `<len>\r\n...\r\n` chunked-transfer
/// framing. The terminal zero-length chunk is the caller's job via
/// [`chunked_trailer`], so `flags` can observe [`WriteFlags::SENT_LAST_CHUNK`]
/// only after that trailer has actually gone out.
fn chunk_frame(data: &Bytes) -> Bytes {
    let mut framed = format!("{:x}\r\n", data.len()).into_bytes();
    framed.extend_from_slice(data);
    framed.extend_from_slice(b"\r\n");
    Bytes::from(framed)
}

fn chunked_trailer() -> Bytes {
    Bytes::from_static(b"0\r\n\r\n")
}

/// A per-connection writer: an inline path for immediate sends plus a
/// pending [`ChunkQueue`] drained by a background task when the caller asks
/// for queued delivery instead of blocking.
pub struct Writer {
    driver: Arc<dyn Driver>,
    sock: Arc<Sock>,
    pending: Mutex<ChunkQueue>,
    max_bytes: usize,
    chunked: bool,
    flags: Mutex<WriteFlags>,
    io_timeout: Duration,
}

impl Writer {
    pub fn new(driver: Arc<dyn Driver>, sock: Arc<Sock>, max_bytes: usize, chunked: bool) -> Self {
        Self {
            driver,
            sock,
            pending: Mutex::new(ChunkQueue::new()),
            max_bytes,
            chunked,
            flags: Mutex::new(if chunked { WriteFlags::CHUNKED } else { WriteFlags::empty() }),
            io_timeout: Duration::from_secs(30),
        }
    }

    /// Writes `data` immediately if the pending queue is empty and under
    /// budget; otherwise it is enqueued for the background drainer to
    /// deliver in order, applying backpressure once `max_bytes` is exceeded.
    pub async fn write(&self, data: Bytes, cancel: &CancellationToken) -> Result<()> {
        let framed = if self.chunked { chunk_frame(&data) } else { data };

        let mut pending = self.pending.lock().await;
        if pending.node_count() == 0 {
            drop(pending);
            io_with_timeout(
                "writer send",
                self.driver.send(&self.sock, &framed),
                self.io_timeout,
                cancel,
            )
            .await?;
            return Ok(());
        }
        pending.enqueue(Chunk::init(framed));
        Ok(())
    }

    /// True once the queued bytes exceed `max_bytes`; callers should stop
    /// accepting more response data until [`Writer::drain`] brings it back
    /// under budget.
    pub async fn backpressured(&self) -> bool {
        self.pending.lock().await.unread() > self.max_bytes
    }

    /// Flushes everything queued, sending each chunk through the driver.
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<usize> {
        let mut sent = 0;
        loop {
            let head = {
                let mut pending = self.pending.lock().await;
                let Some(head) = pending.peek_head().cloned() else {
                    break;
                };
                pending.trim(head.len(), true);
                head
            };
            sent += io_with_timeout(
                "writer drain",
                self.driver.send(&self.sock, &head),
                self.io_timeout,
                cancel,
            )
            .await?;
        }
        Ok(sent)
    }

    /// Emits the terminal chunked-encoding trailer and marks
    /// [`WriteFlags::SENT_LAST_CHUNK`] only after that write has succeeded,
    /// never before, so a send failure does not leave the flag set on a
    /// response that was never actually closed out.
    pub async fn finish(&self, cancel: &CancellationToken) -> Result<()> {
        self.drain(cancel).await?;
        if self.chunked {
            io_with_timeout(
                "writer trailer",
                self.driver.send(&self.sock, &chunked_trailer()),
                self.io_timeout,
                cancel,
            )
            .await?;
            *self.flags.lock().await |= WriteFlags::SENT_LAST_CHUNK;
        }
        self.driver.close(&self.sock).await
    }

    pub async fn flags(&self) -> WriteFlags {
        *self.flags.lock().await
    }
}
