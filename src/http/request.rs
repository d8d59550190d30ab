//! Outbound request state machine

use crate::buffer::{InputBuffer, OutputFrame};
use crate::compress::zlib_compress;
use crate::error::Result;
use crate::header::{HeaderStrategy, FIELD_ZIP};
use log::{debug, warn};
use std::io::{self, IoSlice, Write};

/// Request direction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Header bytes still pending (body bytes may ride along)
    Head,
    /// Only body bytes pending
    Body,
}

/// Result of one write pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendProgress {
    /// Total bytes written (header + body)
    pub written: usize,
    /// Body bytes among `written`
    pub body: usize,
    /// The whole frame has been written
    pub complete: bool,
}

/// Frames and writes one POST per transaction
///
/// A frame stays here from preparation until the response acknowledges it,
/// so a failed attempt can be rewound and resent verbatim.
pub struct RequestPipeline {
    state: RequestState,
    frame: Option<OutputFrame>,
}

impl RequestPipeline {
    pub fn new() -> Self {
        Self {
            state: RequestState::Head,
            frame: None,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn frame(&self) -> Option<&OutputFrame> {
        self.frame.as_ref()
    }

    /// A frame is prepared and not yet acknowledged
    pub fn in_flight(&self) -> bool {
        self.frame.is_some()
    }

    /// The prepared frame has been written completely
    pub fn is_sent(&self) -> bool {
        self.frame.as_ref().is_some_and(|f| f.is_sent())
    }

    /// Build the frame for the first `len` readable input bytes
    ///
    /// The body's final size (after optional compression) is resolved
    /// before the header is generated. A compression failure falls back to
    /// the raw body without the compression flag.
    pub fn prepare(
        &mut self,
        header: &mut dyn HeaderStrategy,
        input: &InputBuffer,
        len: usize,
        zip_level: u32,
    ) -> Result<&OutputFrame> {
        let len = len.min(input.len());
        let data = &input.readable()[..len];

        let compressed = if zip_level > 0 {
            match zlib_compress(data, zip_level) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("Sending uncompressed body: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let frame = match compressed {
            Some(body) => {
                header.set_field(FIELD_ZIP, Some("1"))?;
                let head = header.generate(body.len())?.bytes.to_vec();
                debug!("Request body {} bytes (zlib {} bytes)", len, body.len());
                OutputFrame::compressed(head, body, len)
            }
            None => {
                header.set_field(FIELD_ZIP, None)?;
                let head = header.generate(len)?.bytes.to_vec();
                debug!("Request body {} bytes", len);
                OutputFrame::from_input(head, len)
            }
        };

        self.state = RequestState::Head;
        Ok(self.frame.insert(frame))
    }

    /// Write pending bytes, at most `body_limit` of them body bytes
    ///
    /// While in `Head`, header and body go out in one vectored write.
    /// Would-block is reported as zero progress.
    pub fn send<W: Write + ?Sized>(
        &mut self,
        writer: &mut W,
        input: &InputBuffer,
        body_limit: usize,
    ) -> io::Result<SendProgress> {
        let Some(frame) = self.frame.as_mut() else {
            return Ok(SendProgress::default());
        };
        if frame.is_sent() {
            return Ok(SendProgress {
                complete: true,
                ..Default::default()
            });
        }

        let header_pending = frame.pending_header().len();
        let body = frame.pending_body(input);
        let body = &body[..body.len().min(body_limit)];

        let result = match self.state {
            RequestState::Head => {
                let slices = [IoSlice::new(frame.pending_header()), IoSlice::new(body)];
                writer.write_vectored(&slices)
            }
            RequestState::Body if body.is_empty() => Ok(0),
            RequestState::Body => writer.write(body),
        };

        let written = match result {
            Ok(0) if header_pending + body.len() > 0 => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "socket accepted no bytes"));
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
            Err(e) => return Err(e),
        };

        let into_body = match self.state {
            RequestState::Head => written.saturating_sub(header_pending),
            RequestState::Body => written,
        };
        frame.advance(written);
        if frame.header_done() {
            self.state = RequestState::Body;
        }

        let complete = frame.is_sent();
        if complete {
            self.state = RequestState::Head;
        }

        Ok(SendProgress {
            written,
            body: into_body,
            complete,
        })
    }

    /// Acknowledged by the server: drop the frame, return it for bookkeeping
    pub fn finish(&mut self) -> Option<OutputFrame> {
        self.state = RequestState::Head;
        self.frame.take()
    }

    /// Rollback: keep the frame, resend it from the start next time
    pub fn rewind(&mut self) {
        if let Some(frame) = self.frame.as_mut() {
            frame.rewind();
        }
        self.state = RequestState::Head;
    }
}

impl Default for RequestPipeline {
    fn default() -> Self {
        Self::new()
    }
}
