//! Inbound response state machine
//!
//! Parses an HTTP/1.1 response head and discards a `Content-Length`
//! delimited body. Anything that would require resynchronizing the stream
//! (chunked encoding, an oversized head, surplus bytes) is a protocol error;
//! the caller drops the connection and retries the request.

use super::MAX_RESPONSE_HEAD;
use crate::buffer::ResponseFrame;
use crate::error::{Error, Result};
use log::warn;
use std::io::{self, Read};

const HEAD_END: &[u8] = b"\r\n\r\n";

/// Response direction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Head,
    Body,
}

/// Parsed facts about a completed response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSummary {
    pub status: u16,
    pub content_length: usize,
    /// Server announced `Connection: close`
    pub close: bool,
}

/// Outcome of a read pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProgress {
    /// More bytes are needed; wait for readiness
    Pending,
    /// Head and body fully consumed
    Complete(ResponseSummary),
}

/// Reads one response per transaction
pub struct ResponsePipeline {
    state: ResponseState,
    frame: ResponseFrame,
    scratch: Vec<u8>,
    summary: Option<ResponseSummary>,
}

impl ResponsePipeline {
    pub fn new() -> Self {
        Self {
            state: ResponseState::Head,
            frame: ResponseFrame::new(MAX_RESPONSE_HEAD),
            scratch: vec![0u8; 4096],
            summary: None,
        }
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    /// Forget a partially read response
    pub fn reset(&mut self) {
        self.state = ResponseState::Head;
        self.frame.clear();
        self.summary = None;
    }

    /// Read as much of the response as is available
    pub fn receive<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<ReadProgress> {
        loop {
            let n = match reader.read(&mut self.scratch) {
                Ok(0) => {
                    return Err(Error::Protocol(
                        "connection closed before response completed".into(),
                    ))
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadProgress::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            let body_bytes = match self.state {
                ResponseState::Head => self.accept_head(n)?,
                ResponseState::Body => n,
            };

            if self.state == ResponseState::Body {
                if body_bytes > self.frame.remaining_body() {
                    return Err(Error::Protocol(format!(
                        "{} bytes past declared Content-Length {}",
                        body_bytes - self.frame.remaining_body(),
                        self.frame.content_length()
                    )));
                }
                self.frame.consume_body(body_bytes);

                if self.frame.remaining_body() == 0 {
                    let summary = self.summary.take().ok_or_else(|| {
                        Error::Protocol("response body without a parsed head".into())
                    })?;
                    self.reset();
                    return Ok(ReadProgress::Complete(summary));
                }
            }
        }
    }

    /// Append `n` scratch bytes to the head; returns how many of them
    /// already belong to the body
    fn accept_head(&mut self, n: usize) -> Result<usize> {
        let take = n.min(self.frame.head_room());
        let search_from = self.frame.head().len().saturating_sub(HEAD_END.len() - 1);
        self.frame.push_head(&self.scratch[..take]);

        let found = self.frame.head()[search_from..]
            .windows(HEAD_END.len())
            .position(|w| w == HEAD_END);

        match found {
            Some(pos) => {
                let end = search_from + pos + HEAD_END.len();
                let spilled = self.frame.head().len() - end;
                self.frame.truncate_head(end);
                let summary = parse_head(self.frame.head())?;
                if !(200..300).contains(&summary.status) {
                    warn!(
                        "HTTP response exception: {}",
                        String::from_utf8_lossy(self.frame.head()).trim_end()
                    );
                }
                self.frame.set_content_length(summary.content_length);
                self.summary = Some(summary);
                self.state = ResponseState::Body;
                Ok(spilled + (n - take))
            }
            None if self.frame.head_room() == 0 => Err(Error::Protocol(format!(
                "response head exceeds {} bytes",
                MAX_RESPONSE_HEAD
            ))),
            None => Ok(0),
        }
    }
}

impl Default for ResponsePipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse status line and the fields the uplink cares about
fn parse_head(head: &[u8]) -> Result<ResponseSummary> {
    let text = std::str::from_utf8(head)
        .map_err(|_| Error::Protocol("response head is not valid UTF-8".into()))?;
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(Error::Protocol(format!(
            "malformed status line {:?}",
            status_line
        )));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("malformed status line {:?}", status_line)))?;

    let mut content_length = 0;
    let mut close = false;
    for line in lines.filter(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::Protocol(format!("malformed header line {:?}", line)));
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("Content-Length") {
            content_length = value
                .parse()
                .map_err(|_| Error::Protocol(format!("bad Content-Length {:?}", value)))?;
        } else if name.eq_ignore_ascii_case("Transfer-Encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            return Err(Error::Protocol("chunked responses are not supported".into()));
        } else if name.eq_ignore_ascii_case("Connection") && value.eq_ignore_ascii_case("close") {
            close = true;
        }
    }

    Ok(ResponseSummary {
        status,
        content_length,
        close,
    })
}
