//! A growable in-memory stream backed by recycled buffers.

use crate::{Error, Manager};
use bytes::BytesMut;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

/// An in-memory byte stream whose storage is borrowed from a [Manager].
///
/// The stream starts out as a chain of blocks and grows one block at a time. When a single
/// contiguous view is requested ([Self::get_buffer]), the chain is copied into one large buffer
/// and the blocks are returned to the pool. Streams created with
/// [Manager::get_stream_contiguous] start out on a large buffer instead.
///
/// Every buffer the stream holds is returned to the manager when the stream is dropped.
///
/// # Storage Layout
///
/// ```text
/// [0.............position.............length.............capacity]
///                 ^                    ^                  ^
///                 next read/write      end of contents    end of held buffers
/// ```
///
/// Bytes between `length` and `capacity` may hold stale data from a previous owner of the
/// buffer. They are zeroed before they become part of the contents.
pub struct RecyclableStream {
    manager: Manager,
    /// Diagnostic id, unique per manager.
    id: u64,
    /// Diagnostic tag.
    tag: String,
    /// Chain of blocks, used while `large` is `None`.
    blocks: Vec<BytesMut>,
    /// Single contiguous buffer. Once set, `blocks` is empty.
    large: Option<BytesMut>,
    /// Large buffers this stream outgrew, returned on drop.
    dirty: Vec<BytesMut>,
    /// Number of bytes of contents.
    length: usize,
    /// Next read/write offset. May exceed `length`.
    position: usize,
    /// Capacity to reserve on first growth.
    reserved: usize,
}

impl std::fmt::Debug for RecyclableStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecyclableStream")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("length", &self.length)
            .field("position", &self.position)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl RecyclableStream {
    /// Creates an empty stream that reserves `reserved` bytes when it first grows.
    pub(crate) fn new(manager: Manager, tag: &str, reserved: usize) -> Self {
        Self::build(manager, tag, None, reserved)
    }

    /// Creates an empty stream on top of a single large buffer.
    pub(crate) fn with_buffer(manager: Manager, tag: &str, buffer: BytesMut) -> Self {
        Self::build(manager, tag, Some(buffer), 0)
    }

    fn build(manager: Manager, tag: &str, large: Option<BytesMut>, reserved: usize) -> Self {
        let id = manager.next_stream_id();
        manager.metrics().streams_created.inc();
        debug!(stream = id, tag, reserved, "created stream");
        Self {
            manager,
            id,
            tag: tag.to_string(),
            blocks: Vec::new(),
            large,
            dirty: Vec::new(),
            length: 0,
            position: 0,
            reserved,
        }
    }

    /// Diagnostic id, unique among streams of the same manager.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Diagnostic tag given at creation.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Number of bytes in the stream.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if the stream holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current read/write position.
    pub fn position(&self) -> u64 {
        self.position as u64
    }

    /// Moves the read/write position. Positions past the end are allowed; a later write fills
    /// the gap with zeroes.
    ///
    /// The gap is backed by real buffers: writing one byte at `position` grows the stream to
    /// `position + 1` bytes of pooled storage. Only [crate::Manager::maximum_stream_capacity]
    /// bounds this, and it is unlimited by default.
    pub fn set_position(&mut self, position: u64) {
        self.position = usize::try_from(position).unwrap_or(usize::MAX);
    }

    /// Number of bytes the stream can hold without acquiring more buffers.
    pub fn capacity(&self) -> usize {
        match &self.large {
            Some(large) => large.len(),
            None => self.blocks.len() * self.manager.block_size(),
        }
    }

    /// Grows the stream's storage to hold at least `capacity` bytes. Never shrinks.
    ///
    /// # Errors
    ///
    /// Returns [Error::CapacityExceeded] if `capacity` exceeds the manager's maximum stream
    /// capacity.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), Error> {
        self.ensure_capacity(capacity)
    }

    /// Sets the length of the stream, zero-filling any new bytes. The position is clamped to the
    /// new length.
    ///
    /// # Errors
    ///
    /// Returns [Error::CapacityExceeded] if `length` exceeds the manager's maximum stream
    /// capacity.
    pub fn set_len(&mut self, length: usize) -> Result<(), Error> {
        self.ensure_capacity(length)?;
        if length > self.length {
            self.visit_mut(self.length, length, |chunk| chunk.fill(0));
        }
        self.length = length;
        self.position = self.position.min(length);
        Ok(())
    }

    /// Returns the contents of the stream as one contiguous slice.
    ///
    /// If the stream spans more than one block, the blocks are copied into a single large buffer
    /// and returned to the pool. Further growth keeps using large buffers.
    ///
    /// # Errors
    ///
    /// Propagates errors from acquiring the large buffer or returning the blocks.
    pub fn get_buffer(&mut self) -> Result<&[u8], Error> {
        if self.large.is_none() && self.blocks.len() > 1 {
            let block_size = self.manager.block_size();
            let mut large = self
                .manager
                .acquire_large_buffer(self.capacity(), &self.tag)?;
            for (i, block) in self.blocks.iter().enumerate() {
                large[i * block_size..(i + 1) * block_size].copy_from_slice(block);
            }
            self.large = Some(large);
            let blocks = std::mem::take(&mut self.blocks);
            self.manager.return_blocks(blocks, &self.tag)?;
        }

        Ok(match (&self.large, self.blocks.first()) {
            (Some(large), _) => &large[..self.length],
            (None, Some(block)) => &block[..self.length],
            (None, None) => &[][..],
        })
    }

    /// Copies the contents of the stream into a new vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.manager.metrics().streams_converted.inc();
        let mut out = Vec::with_capacity(self.length);
        self.visit(0, self.length, |chunk| out.extend_from_slice(chunk));
        out
    }

    /// Writes `data` at the current position, growing the stream as needed.
    pub(crate) fn write_slice(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        let end = self
            .position
            .checked_add(data.len())
            .ok_or(Error::InvalidArgument("write past the addressable range"))?;
        self.ensure_capacity(end)?;

        // Bytes past the current length may be stale.
        if self.position > self.length {
            self.visit_mut(self.length, self.position, |chunk| chunk.fill(0));
        }

        let mut remaining = data;
        self.visit_mut(self.position, end, |chunk| {
            let (head, rest) = remaining.split_at(chunk.len());
            chunk.copy_from_slice(head);
            remaining = rest;
        });
        self.position = end;
        self.length = self.length.max(end);
        Ok(())
    }

    fn ensure_capacity(&mut self, needed: usize) -> Result<(), Error> {
        if needed <= self.capacity() {
            return Ok(());
        }
        let target = needed.max(self.reserved);
        self.manager.check_stream_capacity(target)?;

        if let Some(old) = self.large.take() {
            let mut next = match self.manager.acquire_large_buffer(target, &self.tag) {
                Ok(next) => next,
                Err(err) => {
                    self.large = Some(old);
                    return Err(err);
                }
            };
            next[..self.length].copy_from_slice(&old[..self.length]);
            self.large = Some(next);
            self.release_large(old);
            return Ok(());
        }

        let block_size = self.manager.block_size();
        while self.blocks.len() * block_size < target {
            self.blocks.push(self.manager.acquire_block());
        }
        Ok(())
    }

    /// Hands back an outgrown large buffer, or parks it until drop so earlier views stay
    /// exclusive to this stream.
    fn release_large(&mut self, buffer: BytesMut) {
        if self.manager.aggressive_buffer_return() {
            self.return_large(buffer);
        } else {
            self.dirty.push(buffer);
        }
    }

    /// Calls `f` on each contiguous piece of storage covering `start..end`, in order.
    fn visit(&self, start: usize, end: usize, mut f: impl FnMut(&[u8])) {
        if start >= end {
            return;
        }
        if let Some(large) = &self.large {
            f(&large[start..end]);
            return;
        }
        let block_size = self.manager.block_size();
        let mut offset = start;
        while offset < end {
            let block = &self.blocks[offset / block_size];
            let from = offset % block_size;
            let to = block_size.min(from + (end - offset));
            f(&block[from..to]);
            offset += to - from;
        }
    }

    /// Mutable counterpart of [Self::visit].
    fn visit_mut(&mut self, start: usize, end: usize, mut f: impl FnMut(&mut [u8])) {
        if start >= end {
            return;
        }
        if let Some(large) = &mut self.large {
            f(&mut large[start..end]);
            return;
        }
        let block_size = self.manager.block_size();
        let mut offset = start;
        while offset < end {
            let block = &mut self.blocks[offset / block_size];
            let from = offset % block_size;
            let to = block_size.min(from + (end - offset));
            f(&mut block[from..to]);
            offset += to - from;
        }
    }

    fn return_large(&self, buffer: BytesMut) {
        if let Err(err) = self.manager.return_large_buffer(buffer, &self.tag) {
            warn!(stream = self.id, tag = %self.tag, ?err, "failed to return large buffer");
        }
    }
}

impl Read for RecyclableStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.length {
            return Ok(0);
        }
        let count = buf.len().min(self.length - self.position);
        let mut out = &mut buf[..count];
        self.visit(self.position, self.position + count, |chunk| {
            let (head, rest) = std::mem::take(&mut out).split_at_mut(chunk.len());
            head.copy_from_slice(chunk);
            out = rest;
        });
        self.position += count;
        Ok(count)
    }
}

impl Write for RecyclableStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_slice(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Seeking past the end is allowed. As with [RecyclableStream::set_position], a later write
/// acquires buffers for the whole gap.
impl Seek for RecyclableStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => (self.length as u64).checked_add_signed(delta),
            SeekFrom::Current(delta) => (self.position as u64).checked_add_signed(delta),
        };
        let target = target
            .and_then(|target| usize::try_from(target).ok())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "invalid seek to a negative or overflowing position",
                )
            })?;
        self.position = target;
        Ok(target as u64)
    }
}

impl Drop for RecyclableStream {
    fn drop(&mut self) {
        if let Some(large) = self.large.take() {
            self.return_large(large);
        }
        for buffer in std::mem::take(&mut self.dirty) {
            self.return_large(buffer);
        }
        let blocks = std::mem::take(&mut self.blocks);
        if !blocks.is_empty() {
            if let Err(err) = self.manager.return_blocks(blocks, &self.tag) {
                warn!(stream = self.id, tag = %self.tag, ?err, "failed to return blocks");
            }
        }
        self.manager.metrics().streams_disposed.inc();
        debug!(stream = self.id, tag = %self.tag, length = self.length, "disposed stream");
    }
}
