//! Request header generation
//!
//! The engine never formats header bytes itself. It drives a
//! [`HeaderStrategy`], which accumulates the request line and header fields
//! once and then produces the serialized header for each body size.
//!
//! [`PostHeader`] memoizes everything up to and including `Content-Length: `
//! and only rewrites the trailing length digits on each call:
//!
//! ```text
//! POST /path HTTP/1.1\r\n
//! Host: collector:8080\r\n
//! User-Agent: netpipe/0.1.0\r\n
//! Accept: */*\r\n
//! LETV-TV-MAC: 00aabbccddee\r\n
//! LETV-ZIP: 1\r\n                 (only when compressed)
//! Connection: close\r\n           (only when not persistent)
//! Content-Length: <n>\r\n\r\n     <- rewritten per call
//! ```

use crate::error::{Error, Result};
use std::io::Write;

/// Upper bound on a serialized request header
pub const MAX_HEADER_SIZE: usize = 2048;

/// Field carrying the client identifier
pub const FIELD_CLIENT_ID: &str = "LETV-TV-MAC";

/// Field flagging a zlib-compressed body
pub const FIELD_ZIP: &str = "LETV-ZIP";

/// Header produced by [`HeaderStrategy::generate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedHeader<'a> {
    /// Complete header, terminated by the blank line
    pub bytes: &'a [u8],
    /// Length of the static prefix (everything before the length digits)
    pub prefix_len: usize,
}

impl GeneratedHeader<'_> {
    /// Total header length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Request header capability injected into the engine
pub trait HeaderStrategy: Send {
    /// Set the request line. Only one request line per instance.
    fn set_request(&mut self, method: &str, uri: &str, version: &str) -> Result<()>;

    /// Set or clear (`None`) a header field
    fn set_field(&mut self, field: &str, value: Option<&str>) -> Result<()>;

    /// Serialize the header for a body of `body_size` bytes
    fn generate(&mut self, body_size: usize) -> Result<GeneratedHeader<'_>>;
}

/// `POST` header with a client identifier and optional compression flag
pub struct PostHeader {
    method: Option<String>,
    path: Option<String>,
    version: String,
    host: String,
    client_id: String,
    user_agent: String,
    compressed: bool,
    persistent: bool,
    buffer: Vec<u8>,
    prefix_len: Option<usize>,
}

impl PostHeader {
    /// Create a header with the crate's `User-Agent`
    pub fn new() -> Self {
        Self::with_user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
    }

    /// Create a header with a custom `User-Agent` value
    pub fn with_user_agent(user_agent: &str) -> Self {
        Self {
            method: None,
            path: None,
            version: "HTTP/1.1".to_string(),
            host: String::new(),
            client_id: String::new(),
            user_agent: user_agent.to_string(),
            compressed: false,
            persistent: true,
            buffer: Vec::with_capacity(MAX_HEADER_SIZE),
            prefix_len: None,
        }
    }

    fn invalidate(&mut self) {
        self.prefix_len = None;
    }

    fn build_prefix(&mut self) -> Result<usize> {
        self.buffer.clear();
        let path = self.path.as_deref().unwrap_or("/");
        let method = self.method.as_deref().unwrap_or("POST");
        write!(
            self.buffer,
            "{} {} {}\r\n\
             Host: {}\r\n\
             User-Agent: {}\r\n\
             Accept: */*\r\n\
             {}: {}\r\n",
            method, path, self.version, self.host, self.user_agent, FIELD_CLIENT_ID, self.client_id
        )?;
        if self.compressed {
            write!(self.buffer, "{}: 1\r\n", FIELD_ZIP)?;
        }
        if !self.persistent {
            self.buffer.extend_from_slice(b"Connection: close\r\n");
        }
        self.buffer.extend_from_slice(b"Content-Length: ");
        Ok(self.buffer.len())
    }
}

impl Default for PostHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderStrategy for PostHeader {
    fn set_request(&mut self, method: &str, uri: &str, version: &str) -> Result<()> {
        if self.path.is_some() {
            return Err(Error::Contract("request line already set"));
        }
        self.method = Some(method.to_string());
        self.path = Some(uri.to_string());
        self.version = version.to_string();
        self.invalidate();
        Ok(())
    }

    fn set_field(&mut self, field: &str, value: Option<&str>) -> Result<()> {
        if field.eq_ignore_ascii_case("Host") {
            let host = value.unwrap_or_default();
            if self.host != host {
                self.host = host.to_string();
                self.invalidate();
            }
        } else if field.eq_ignore_ascii_case(FIELD_CLIENT_ID) {
            let id = value.unwrap_or_default();
            if self.client_id != id {
                self.client_id = id.to_string();
                self.invalidate();
            }
        } else if field.eq_ignore_ascii_case(FIELD_ZIP) {
            let compressed = value.is_some();
            if self.compressed != compressed {
                self.compressed = compressed;
                self.invalidate();
            }
        } else if field.eq_ignore_ascii_case("Connection") {
            // anything but "close" keeps the connection alive
            let persistent = !value.is_some_and(|v| v.eq_ignore_ascii_case("close"));
            if self.persistent != persistent {
                self.persistent = persistent;
                self.invalidate();
            }
        } else {
            return Err(Error::Contract("unsupported header field"));
        }
        Ok(())
    }

    fn generate(&mut self, body_size: usize) -> Result<GeneratedHeader<'_>> {
        let prefix_len = match self.prefix_len {
            Some(n) => n,
            None => {
                let n = self.build_prefix()?;
                self.prefix_len = Some(n);
                n
            }
        };

        self.buffer.truncate(prefix_len);
        write!(self.buffer, "{}\r\n\r\n", body_size)?;

        if self.buffer.len() > MAX_HEADER_SIZE {
            return Err(Error::HeaderTooLarge {
                size: self.buffer.len(),
                limit: MAX_HEADER_SIZE,
            });
        }

        Ok(GeneratedHeader {
            bytes: &self.buffer,
            prefix_len,
        })
    }
}
