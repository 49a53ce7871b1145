// SPDX-License-Identifier: AGPL-3.0-or-later

//! Single-allocation payload nodes and a FIFO for streaming I/O.
//!
//! Not thread-safe: the owning stream (the writer's per-socket queue) holds
//! its own lock around a `ChunkQueue`. All operations here are `O(1)` except
//! [`ChunkQueue::trim`], which is `O(nodes consumed)`.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// A single-allocation payload node. `Bytes` already gives the "payload
/// immediately after header, one allocation" property the node wants, plus
/// cheap zero-copy slicing for partial trims.
#[derive(Debug, Clone)]
pub struct Chunk {
    data: Bytes,
}

impl Chunk {
    /// Allocates `n` zeroed bytes for the caller to fill in place.
    pub fn alloc(n: usize) -> Self {
        Self {
            data: BytesMut::zeroed(n).freeze(),
        }
    }

    /// Adopts an existing buffer without copying.
    pub fn init(buf: Bytes) -> Self {
        Self { data: buf }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }
}

/// A FIFO of [`Chunk`]s tracking unread and drained byte counts.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    nodes: VecDeque<Chunk>,
    unread: usize,
    drained: usize,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    pub fn drained(&self) -> usize {
        self.drained
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Appends `chunk`; `unread += chunk.len()`.
    pub fn enqueue(&mut self, chunk: Chunk) {
        self.unread += chunk.len();
        self.nodes.push_back(chunk);
    }

    /// Peek at the head chunk's remaining bytes, if any.
    pub fn peek_head(&self) -> Option<&Bytes> {
        self.nodes.front().map(Chunk::as_bytes)
    }

    /// Advances the head or frees head nodes until `n` bytes are consumed
    /// (or the queue is empty). If `drain` is set, the consumed bytes count
    /// toward [`ChunkQueue::drained`]. Returns the number of bytes actually
    /// removed.
    pub fn trim(&mut self, n: usize, drain: bool) -> usize {
        let mut remaining = n;
        let mut removed = 0;
        while remaining > 0 {
            let Some(front) = self.nodes.front_mut() else {
                break;
            };
            let take = remaining.min(front.len());
            if take == front.len() {
                self.nodes.pop_front();
            } else {
                front.data = front.data.slice(take..);
            }
            remaining -= take;
            removed += take;
        }
        self.unread -= removed;
        if drain {
            self.drained += removed;
        }
        removed
    }

    /// Relinks whole nodes from `self` onto the back of `dst` until at least
    /// `max` bytes have moved. Nodes are never split, so the actual amount
    /// moved may exceed `max` -- callers that need exact-byte moves must
    /// pre-trim `self` first. This is an intentional property, not a bug.
    pub fn move_to(&mut self, dst: &mut ChunkQueue, max: usize) -> usize {
        let mut moved = 0;
        while moved < max {
            let Some(node) = self.nodes.pop_front() else {
                break;
            };
            moved += node.len();
            self.unread -= node.len();
            dst.unread += node.len();
            dst.nodes.push_back(node);
        }
        moved
    }

    /// Discards every byte currently queued.
    pub fn clear(&mut self) {
        self.trim(usize::MAX, true);
    }
}
