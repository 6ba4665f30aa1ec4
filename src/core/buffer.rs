//! # Byte Buffer
//!
//! Growable byte region with independent pack (write) and unpack (read)
//! cursors. Cursors are plain indices into the owned storage, so they stay
//! valid across reallocation.
//!
//! ## Invariant
//! ```text
//! 0 <= unpack_cursor <= pack_cursor <= used <= allocated
//! ```
//!
//! ## Growth Policy
//! Below the threshold the capacity doubles (starting from the initial size);
//! at or above it, the required size is rounded up to the next multiple of the
//! threshold. See [`grown_capacity`].

use crate::config::BufferConfig;
use crate::error::{constants, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Default capacity of the first allocation
pub const DEFAULT_INITIAL_SIZE: usize = 128;

/// Default size above which growth rounds up instead of doubling
pub const DEFAULT_THRESHOLD_SIZE: usize = 1024;

/// Whether every value on the wire is preceded by its type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BufferMode {
    /// The reader knows the types; only values are written
    Condensed,
    /// Each value carries its own 2-byte tag
    #[default]
    SelfDescribing,
}

impl BufferMode {
    /// Wire code used in the identity message
    pub fn code(self) -> u8 {
        match self {
            BufferMode::Condensed => 1,
            BufferMode::SelfDescribing => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(BufferMode::Condensed),
            2 => Some(BufferMode::SelfDescribing),
            _ => None,
        }
    }
}

/// Cursor snapshot used to roll back a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    used: usize,
    pack_cursor: usize,
    unpack_cursor: usize,
}

/// Compute the capacity needed to append `requested` bytes.
///
/// Pure function of the current state. Returns `None` when the computation
/// overflows `usize`.
pub fn grown_capacity(
    capacity: usize,
    used: usize,
    requested: usize,
    initial: usize,
    threshold: usize,
) -> Option<usize> {
    let required = used.checked_add(requested)?;
    if threshold > 0 && required >= threshold {
        let blocks = required.checked_add(threshold - 1)? / threshold;
        return blocks.checked_mul(threshold).map(|c| c.max(capacity));
    }

    let mut to_alloc = if capacity == 0 { initial.max(1) } else { capacity };
    while to_alloc < required {
        to_alloc = to_alloc.checked_mul(2)?;
    }
    Some(to_alloc)
}

/// Typed byte buffer
#[derive(Debug, Clone)]
pub struct Buffer {
    mode: BufferMode,
    // base.len() is the allocated capacity
    base: Vec<u8>,
    used: usize,
    pack_cursor: usize,
    unpack_cursor: usize,
    initial_size: usize,
    threshold_size: usize,
    pub(crate) depth: usize,
}

impl Buffer {
    /// Create an empty buffer with the default growth policy
    pub fn new(mode: BufferMode) -> Self {
        Self::with_policy(mode, DEFAULT_INITIAL_SIZE, DEFAULT_THRESHOLD_SIZE)
    }

    /// Create an empty buffer using the configured growth policy and mode
    pub fn from_config(config: &BufferConfig) -> Self {
        Self::with_policy(
            config.default_mode,
            config.initial_size,
            config.threshold_size,
        )
    }

    /// Create an empty buffer with an explicit growth policy
    pub fn with_policy(mode: BufferMode, initial_size: usize, threshold_size: usize) -> Self {
        Self {
            mode,
            base: Vec::new(),
            used: 0,
            pack_cursor: 0,
            unpack_cursor: 0,
            initial_size,
            threshold_size,
            depth: 0,
        }
    }

    /// Wrap received bytes for unpacking
    pub fn from_bytes(mode: BufferMode, bytes: Vec<u8>) -> Self {
        let mut buffer = Self::new(mode);
        buffer.load(bytes);
        buffer
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    pub fn is_self_describing(&self) -> bool {
        self.mode == BufferMode::SelfDescribing
    }

    /// Change the mode of an empty buffer
    pub fn set_mode(&mut self, mode: BufferMode) -> Result<()> {
        if self.used != 0 {
            return Err(ProtocolError::BadParam(
                "cannot change mode of a non-empty buffer".into(),
            ));
        }
        self.mode = mode;
        Ok(())
    }

    pub fn allocated(&self) -> usize {
        self.base.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn pack_cursor(&self) -> usize {
        self.pack_cursor
    }

    pub fn unpack_cursor(&self) -> usize {
        self.unpack_cursor
    }

    /// Bytes written but not yet read
    pub fn remaining(&self) -> usize {
        self.pack_cursor.saturating_sub(self.unpack_cursor)
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Every byte written so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.base[..self.used]
    }

    /// Bytes between the unpack and pack cursors
    pub fn unread(&self) -> &[u8] {
        &self.base[self.unpack_cursor.min(self.pack_cursor)..self.pack_cursor]
    }

    /// Ensure at least `n` free bytes after `used`.
    ///
    /// On allocation failure the buffer keeps its previous storage.
    pub fn extend(&mut self, n: usize) -> Result<()> {
        if self.allocated() - self.used >= n {
            return Ok(());
        }

        let to_alloc = grown_capacity(
            self.allocated(),
            self.used,
            n,
            self.initial_size,
            self.threshold_size,
        )
        .ok_or(ProtocolError::OutOfResource)?;

        self.base
            .try_reserve_exact(to_alloc - self.base.len())
            .map_err(|_| ProtocolError::OutOfResource)?;
        self.base.resize(to_alloc, 0);
        trace!(allocated = to_alloc, used = self.used, "Buffer extended");
        Ok(())
    }

    /// True if the buffer is corrupted or fewer than `n` unread bytes remain
    pub fn too_small(&self, n: usize) -> bool {
        if self.pack_cursor < self.unpack_cursor {
            return true;
        }
        self.pack_cursor - self.unpack_cursor < n
    }

    /// Append raw bytes at the pack cursor
    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend(bytes.len())?;
        let end = self.pack_cursor + bytes.len();
        self.base[self.pack_cursor..end].copy_from_slice(bytes);
        self.pack_cursor = end;
        self.used = end;
        Ok(())
    }

    /// Consume `n` bytes at the unpack cursor
    pub(crate) fn read_bytes(&mut self, n: usize) -> Result<&[u8]> {
        if self.too_small(n) {
            return Err(ProtocolError::ReadPastEnd);
        }
        let start = self.unpack_cursor;
        self.unpack_cursor += n;
        Ok(&self.base[start..start + n])
    }

    /// Consume a fixed-width field
    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Write a type tag as a 2-byte network-order field
    pub fn store_data_type(&mut self, code: u16) -> Result<()> {
        self.write_bytes(&code.to_be_bytes())
    }

    /// Read a raw 2-byte type tag
    pub fn get_data_type(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array::<2>()?))
    }

    /// Read the next type tag without consuming it
    pub fn peek_data_type(&self) -> Result<u16> {
        if !self.is_self_describing() {
            return Err(ProtocolError::NotSupported(
                constants::ERR_NOT_SELF_DESCRIBING.into(),
            ));
        }
        if self.too_small(2) {
            return Err(ProtocolError::ReadPastEnd);
        }
        let at = self.unpack_cursor;
        Ok(u16::from_be_bytes([self.base[at], self.base[at + 1]]))
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            used: self.used,
            pack_cursor: self.pack_cursor,
            unpack_cursor: self.unpack_cursor,
        }
    }

    /// Roll the cursors back. Storage already grown is kept.
    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        self.used = checkpoint.used;
        self.pack_cursor = checkpoint.pack_cursor;
        self.unpack_cursor = checkpoint.unpack_cursor;
        self.depth = 0;
    }

    /// Replace the contents with received bytes, ready for unpacking
    pub fn load(&mut self, bytes: Vec<u8>) {
        let len = bytes.len();
        self.base = bytes;
        self.used = len;
        self.pack_cursor = len;
        self.unpack_cursor = 0;
        self.depth = 0;
    }

    /// Take the unread bytes out, leaving the buffer empty
    pub fn unload(&mut self) -> Vec<u8> {
        let mut base = std::mem::take(&mut self.base);
        base.truncate(self.pack_cursor);
        if self.unpack_cursor > 0 {
            base.drain(..self.unpack_cursor.min(base.len()));
        }
        self.reset();
        base
    }

    /// Append the unread bytes of `src`, which must share this buffer's mode
    pub fn copy_payload(&mut self, src: &Buffer) -> Result<()> {
        if src.mode != self.mode {
            return Err(ProtocolError::BadParam(
                "cannot copy payload between buffers of different modes".into(),
            ));
        }
        self.write_bytes(src.unread())
    }

    /// Drop all contents and storage
    pub fn reset(&mut self) {
        self.base = Vec::new();
        self.used = 0;
        self.pack_cursor = 0;
        self.unpack_cursor = 0;
        self.depth = 0;
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(BufferMode::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn growth_doubles_below_threshold() {
        assert_eq!(grown_capacity(0, 0, 10, 128, 1024), Some(128));
        assert_eq!(grown_capacity(128, 120, 10, 128, 1024), Some(256));
        assert_eq!(grown_capacity(256, 250, 500, 128, 1024), Some(1024));
    }

    #[test]
    fn growth_rounds_at_threshold() {
        assert_eq!(grown_capacity(512, 500, 524, 128, 1024), Some(1024));
        assert_eq!(grown_capacity(1024, 1024, 1, 128, 1024), Some(2048));
        assert_eq!(grown_capacity(2048, 2000, 5000, 128, 1024), Some(7168));
    }

    #[test]
    fn growth_overflow_is_reported() {
        assert_eq!(grown_capacity(0, usize::MAX, 1, 128, 1024), None);
    }

    #[test]
    fn extend_is_noop_with_room() {
        let mut buf = Buffer::new(BufferMode::Condensed);
        buf.extend(10).unwrap();
        assert_eq!(buf.allocated(), 128);
        buf.extend(100).unwrap();
        assert_eq!(buf.allocated(), 128);
    }

    #[test]
    fn writes_survive_reallocation() {
        let mut buf = Buffer::new(BufferMode::Condensed);
        let chunk: Vec<u8> = (0..=255).collect();
        for _ in 0..10 {
            buf.write_bytes(&chunk).unwrap();
        }
        assert_eq!(buf.used(), 2560);
        assert_eq!(buf.allocated(), 3072);
        assert_eq!(&buf.as_bytes()[256..512], chunk.as_slice());
    }

    #[test]
    fn too_small_and_read_past_end() {
        let mut buf = Buffer::new(BufferMode::Condensed);
        buf.write_bytes(&[1, 2, 3]).unwrap();
        assert!(!buf.too_small(3));
        assert!(buf.too_small(4));
        assert!(matches!(buf.read_bytes(4), Err(ProtocolError::ReadPastEnd)));
        assert_eq!(buf.read_bytes(3).unwrap(), &[1, 2, 3]);
        assert!(buf.too_small(1));
    }

    #[test]
    fn peek_requires_self_describing() {
        let mut buf = Buffer::new(BufferMode::Condensed);
        buf.store_data_type(9).unwrap();
        assert!(matches!(
            buf.peek_data_type(),
            Err(ProtocolError::NotSupported(_))
        ));

        let mut buf = Buffer::new(BufferMode::SelfDescribing);
        buf.store_data_type(9).unwrap();
        assert_eq!(buf.peek_data_type().unwrap(), 9);
        assert_eq!(buf.unpack_cursor(), 0);
        assert_eq!(buf.get_data_type().unwrap(), 9);
    }

    #[test]
    fn unload_returns_unread_bytes() {
        let mut buf = Buffer::new(BufferMode::Condensed);
        buf.write_bytes(&[1, 2, 3, 4]).unwrap();
        buf.read_bytes(1).unwrap();
        assert_eq!(buf.unload(), vec![2, 3, 4]);
        assert!(buf.is_empty());
        assert_eq!(buf.allocated(), 0);
    }

    #[test]
    fn copy_payload_requires_matching_mode() {
        let mut src = Buffer::new(BufferMode::Condensed);
        src.write_bytes(&[7, 8]).unwrap();
        let mut dst = Buffer::new(BufferMode::SelfDescribing);
        assert!(dst.copy_payload(&src).is_err());
        let mut dst = Buffer::new(BufferMode::Condensed);
        dst.copy_payload(&src).unwrap();
        assert_eq!(dst.as_bytes(), &[7, 8]);
    }
}
