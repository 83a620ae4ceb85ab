use bytes::{Buf, Bytes, BytesMut};

/// A growable byte buffer shared by the packer (append side) and the
/// unpacker (read side).
///
/// Backed by `bytes::BytesMut` so that extracting a contiguous run of bytes
/// (a string/binary/ext payload, or a flushed chunk) is zero-copy:
/// `BytesMut::split_to` hands the caller a reference-counted slice of the
/// same underlying allocation instead of copying.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    buf: BytesMut,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes to the write side (packer output, or freshly received
    /// unpacker input).
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes available in the current chunk without crossing a boundary.
    /// A single growable `BytesMut` has exactly one chunk.
    pub fn top_readable_size(&self) -> usize {
        self.buf.len()
    }

    /// Pops a single byte off the front, or `None` on empty.
    pub fn read_1(&mut self) -> Option<u8> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split_to(1)[0])
        }
    }

    /// Extracts exactly `n` contiguous bytes, consuming them, or returns
    /// `None` without consuming anything if fewer than `n` bytes are
    /// available.
    pub fn read_exact_block(&mut self, n: usize) -> Option<Bytes> {
        if self.buf.len() < n {
            return None;
        }
        Some(self.buf.split_to(n).freeze())
    }

    /// Extracts `n` contiguous bytes from the top chunk as an owned,
    /// zero-copy byte-string. The caller must already know `n` bytes are
    /// available (checked by [`Self::top_readable_size`]).
    pub fn read_top_as_bytes(&mut self, n: usize) -> Bytes {
        debug_assert!(self.buf.len() >= n);
        self.buf.split_to(n).freeze()
    }

    /// Copies up to `n` bytes into `dst`, advancing past them, and returns
    /// the number of bytes copied.
    pub fn read_to_vec(&mut self, dst: &mut Vec<u8>, n: usize) -> usize {
        let take = n.min(self.buf.len());
        dst.extend_from_slice(&self.buf[..take]);
        self.buf.advance(take);
        take
    }

    /// Pushes the complete buffered content to `sink` and clears the
    /// buffer.
    pub fn flush_to(&mut self, sink: &mut impl std::io::Write) -> std::io::Result<()> {
        sink.write_all(&self.buf)?;
        self.buf.clear();
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}
