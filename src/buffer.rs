//! Owned byte buffers with explicit cursors
//!
//! - [`InputBuffer`]: bytes read from the input but not yet acknowledged
//! - [`OutputFrame`]: header + body of the request currently on the wire
//! - [`ResponseFrame`]: the reply being read for the current request
//!
//! None of these grow past their configured capacity.

use std::io::{self, Read};

/// Bounded input buffer with a consumed offset
///
/// ```text
/// 0          start            end           capacity
/// |  freed   |   readable      |  writable   |
/// ```
///
/// Invariant: `start <= end <= capacity`. Bytes before `start` were
/// acknowledged and are never resent; they are reclaimed by compaction.
pub struct InputBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl InputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unacknowledged bytes
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// No room for more input, even after compaction
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Unacknowledged bytes
    pub fn readable(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Free space at the tail, compacting first if the tail is exhausted
    pub fn writable(&mut self) -> &mut [u8] {
        if self.end == self.data.len() && self.start > 0 {
            self.compact();
        }
        &mut self.data[self.end..]
    }

    /// Mark `n` bytes of [`writable`](Self::writable) as filled
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.data.len());
        self.end = (self.end + n).min(self.data.len());
    }

    /// Acknowledge `n` readable bytes
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.start = (self.start + n).min(self.end);
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Move readable bytes to the front
    pub fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.data.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    /// Single read from `reader` into the free space
    ///
    /// Returns `Ok(0)` on EOF; a full buffer is reported as an error since
    /// callers must stop polling the input instead.
    pub fn fill_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let spare = self.writable();
        if spare.is_empty() {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, "input buffer full"));
        }
        let n = reader.read(spare)?;
        self.advance(n);
        Ok(n)
    }
}

/// Where the body of an [`OutputFrame`] lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    /// Leading bytes of the input buffer's readable region
    Input,
    /// Independently owned compressed copy
    Compressed(Vec<u8>),
}

/// Request bytes for one transaction
///
/// Tracks header and body cursors separately. `source_len` backs up the
/// number of uncompressed input bytes the frame covers, which is what gets
/// consumed from the [`InputBuffer`] once the server acknowledges it.
#[derive(Debug, Clone)]
pub struct OutputFrame {
    header: Vec<u8>,
    header_sent: usize,
    body: FrameBody,
    content_length: usize,
    body_sent: usize,
    source_len: usize,
}

impl OutputFrame {
    /// Frame whose body is the first `len` readable input bytes
    pub fn from_input(header: Vec<u8>, len: usize) -> Self {
        Self {
            header,
            header_sent: 0,
            body: FrameBody::Input,
            content_length: len,
            body_sent: 0,
            source_len: len,
        }
    }

    /// Frame with a compressed body covering `source_len` input bytes
    pub fn compressed(header: Vec<u8>, body: Vec<u8>, source_len: usize) -> Self {
        Self {
            header,
            header_sent: 0,
            content_length: body.len(),
            body: FrameBody::Compressed(body),
            body_sent: 0,
            source_len,
        }
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.body, FrameBody::Compressed(_))
    }

    /// Declared body length
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Uncompressed input bytes covered by this frame
    pub fn source_len(&self) -> usize {
        self.source_len
    }

    /// Body bytes; `input` supplies the bytes of an uncompressed frame
    pub fn body<'a>(&'a self, input: &'a InputBuffer) -> &'a [u8] {
        match &self.body {
            FrameBody::Input => &input.readable()[..self.content_length],
            FrameBody::Compressed(bytes) => bytes,
        }
    }

    /// Header bytes not yet written
    pub fn pending_header(&self) -> &[u8] {
        &self.header[self.header_sent..]
    }

    /// Body bytes not yet written
    pub fn pending_body<'a>(&'a self, input: &'a InputBuffer) -> &'a [u8] {
        &self.body(input)[self.body_sent..]
    }

    pub fn header_done(&self) -> bool {
        self.header_sent == self.header.len()
    }

    /// Unsent bytes (header + body)
    pub fn remaining(&self) -> usize {
        (self.header.len() - self.header_sent) + (self.content_length - self.body_sent)
    }

    pub fn remaining_body(&self) -> usize {
        self.content_length - self.body_sent
    }

    pub fn is_sent(&self) -> bool {
        self.remaining() == 0
    }

    /// Account for `n` written bytes, header first
    pub fn advance(&mut self, n: usize) {
        let into_header = n.min(self.header.len() - self.header_sent);
        self.header_sent += into_header;
        let into_body = (n - into_header).min(self.content_length - self.body_sent);
        self.body_sent += into_body;
    }

    /// Rollback: the next attempt resends header and body verbatim
    pub fn rewind(&mut self) {
        self.header_sent = 0;
        self.body_sent = 0;
    }
}

/// Reply bytes for one transaction
///
/// The head is kept (bounded by `head_limit`) for status and field parsing;
/// body bytes are only counted.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    head: Vec<u8>,
    head_limit: usize,
    content_length: usize,
    body_read: usize,
}

impl ResponseFrame {
    pub fn new(head_limit: usize) -> Self {
        Self {
            head: Vec::with_capacity(head_limit),
            head_limit,
            content_length: 0,
            body_read: 0,
        }
    }

    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Append head bytes; false if the head would exceed its bound
    pub fn push_head(&mut self, bytes: &[u8]) -> bool {
        if self.head.len() + bytes.len() > self.head_limit {
            return false;
        }
        self.head.extend_from_slice(bytes);
        true
    }

    /// Head bytes that still fit
    pub fn head_room(&self) -> usize {
        self.head_limit - self.head.len()
    }

    /// Drop head bytes past `len` (they belonged to the body)
    pub fn truncate_head(&mut self, len: usize) {
        self.head.truncate(len);
    }

    pub fn set_content_length(&mut self, n: usize) {
        self.content_length = n;
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Body bytes still expected
    pub fn remaining_body(&self) -> usize {
        self.content_length - self.body_read
    }

    /// Count `n` body bytes, never past the declared length
    pub fn consume_body(&mut self, n: usize) {
        self.body_read = (self.body_read + n).min(self.content_length);
    }

    pub fn clear(&mut self) {
        self.head.clear();
        self.content_length = 0;
        self.body_read = 0;
    }
}
