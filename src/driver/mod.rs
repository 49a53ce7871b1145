// SPDX-License-Identifier: AGPL-3.0-or-later
// Socket plumbing grounded on the client connection's split-stream ownership
// and cancellation model (examples/Masorubka1-iscsi-client-rs/src/client/client.rs).

//! The listener/socket abstraction a connection dispatcher accepts work
//! from. [`Driver`] is the vtable every protocol front-end (HTTP, a raw TCP
//! protocol, ...) implements; [`TcpDriver`] is the one concrete driver this
//! crate ships.

use std::{fmt, net::SocketAddr, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

/// A single accepted connection's I/O halves, split so reads and writes can
/// proceed concurrently under their own locks.
pub struct Sock {
    pub peer: SocketAddr,
    reader: Mutex<tokio::net::tcp::OwnedReadHalf>,
    writer: Mutex<tokio::net::tcp::OwnedWriteHalf>,
    pub cancel: CancellationToken,
}

impl fmt::Debug for Sock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sock").field("peer", &self.peer).finish()
    }
}

impl Sock {
    fn new(stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) -> Self {
        let (r, w) = stream.into_split();
        Self {
            peer,
            reader: Mutex::new(r),
            writer: Mutex::new(w),
            cancel,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(stream: TcpStream, peer: SocketAddr) -> Self {
        Self::new(stream, peer, CancellationToken::new())
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut reader = self.reader.lock().await;
        tokio::select! {
            () = self.cancel.cancelled() => Ok(0),
            n = reader.read(buf) => Ok(n?),
        }
    }

    pub async fn send(&self, data: &Bytes) -> Result<usize> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        Ok(data.len())
    }

    /// Half-closes the write side; the read side keeps draining in-flight
    /// data until the peer closes or `cancel` fires.
    pub async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

/// The vtable a protocol driver provides to the connection dispatcher. Only
/// `listen`/`accept`/`recv`/`send`/`close` are required; the rest have
/// sensible defaults for drivers that don't need them.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn listen(&self, addr: SocketAddr) -> Result<()>;
    async fn accept(&self) -> Result<Arc<Sock>>;
    async fn recv(&self, sock: &Sock, buf: &mut [u8]) -> Result<usize> {
        sock.recv(buf).await
    }
    async fn send(&self, sock: &Sock, data: &Bytes) -> Result<usize> {
        sock.send(data).await
    }
    /// Drivers that support `sendfile`-style zero-copy transmission of an
    /// already-open file override this; the default chunks through `send`.
    async fn sendfile(&self, sock: &Sock, data: &Bytes) -> Result<usize> {
        self.send(sock, data).await
    }
    async fn keep(&self, _sock: &Sock) -> bool {
        true
    }
    async fn close(&self, sock: &Sock) -> Result<()> {
        sock.close().await
    }
    /// Per-driver prefix injected before the wire headers (e.g. a protocol
    /// banner). Default is none.
    fn headers_encode(&self) -> Option<Bytes> {
        None
    }
}

/// Plain TCP driver. TLS is intentionally not implemented here; a real
/// deployment plugs a [`TlsProvider`] in ahead of this driver's `accept`.
pub struct TcpDriver {
    listener: Mutex<Option<TcpListener>>,
    cancel: CancellationToken,
}

impl TcpDriver {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            listener: Mutex::new(None),
            cancel,
        }
    }
}

#[async_trait]
impl Driver for TcpDriver {
    async fn listen(&self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        *self.listener.lock().await = Some(listener);
        Ok(())
    }

    async fn accept(&self) -> Result<Arc<Sock>> {
        let guard = self.listener.lock().await;
        let listener = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("driver not listening"))?;
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Arc::new(Sock::new(stream, peer, self.cancel.child_token())))
    }
}

/// Seam for pluggable TLS termination ahead of a [`Driver`]. Not implemented
/// by this crate; deployments that need TLS provide their own.
#[async_trait]
pub trait TlsProvider: Send + Sync {
    async fn wrap_accept(&self, sock: Arc<Sock>) -> Result<Arc<Sock>>;
}
