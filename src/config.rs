//! Configuration for netpipe
//!
//! A single [`PipeConfig`] value is owned by the streaming engine. It can be
//! loaded from a TOML file and then overridden from the command line.
//!
//! # Example
//!
//! ```toml
//! destination = "http://collector.example.com:8080/upload"
//! buffer_size = 1048576
//! transfer_rate = 12500
//! connect_retry = 3
//! interval_secs = 300
//! idle_limit = 1
//! busy_limit = 3
//! zip_level = 6
//! persistent = true
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::{Host, Url};

/// Engine and front-end configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Destination URL (`http://host[:port]/path`, scheme optional)
    pub destination: String,

    /// Input buffer capacity in bytes
    pub buffer_size: usize,

    /// Upload ceiling in bytes per second (0 = unlimited)
    pub transfer_rate: u64,

    /// Failed connect attempts per reconnect cycle
    pub connect_retry: u32,

    /// Transfer window length in seconds
    pub interval_secs: u64,

    /// Transfers allowed per window while starved for input
    pub idle_limit: u32,

    /// Transfers allowed per window while input is flowing
    pub busy_limit: u32,

    /// zlib compression level (0 disables, 1-9)
    pub zip_level: u32,

    /// Keep the connection open across transactions
    pub persistent: bool,

    /// Verbose logging
    pub verbose: bool,

    /// Client identifier sent with every request; discovered when absent
    pub client_id: Option<String>,

    /// Delay before re-dialing after a failed connect, in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            destination: String::new(),
            buffer_size: 1024 * 1024,
            transfer_rate: 12_500, // 100 Kbps
            connect_retry: 3,
            interval_secs: 300,
            idle_limit: 1,
            busy_limit: 3,
            zip_level: 0,
            persistent: true,
            verbose: false,
            client_id: None,
            reconnect_delay_ms: 1000,
        }
    }
}

impl PipeConfig {
    /// Load configuration from a TOML file
    ///
    /// Missing keys take their default values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: PipeConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Window length as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Reconnect delay as a duration
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Check values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::Config("buffer_size must be greater than 0".into()));
        }
        if self.interval_secs == 0 {
            return Err(Error::Config("interval must be at least 1 second".into()));
        }
        if self.zip_level > 9 {
            return Err(Error::Config(format!(
                "zip_level {} out of range (0-9)",
                self.zip_level
            )));
        }
        Ok(())
    }
}

/// Parsed destination: where to connect and what to request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Host to resolve (IPv6 literals without brackets)
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Request target, including any query string
    pub path: String,
    authority: String,
}

impl Destination {
    /// Parse `scheme://host[:port]/path`
    ///
    /// The scheme may be omitted; only `http` is accepted. The port defaults
    /// to 80 and the path to `/`.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty destination"));
        }
        let full = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };

        let parsed = Url::parse(&full).map_err(|e| invalid(&e.to_string()))?;
        if parsed.scheme() != "http" {
            return Err(invalid(&format!("unsupported scheme {:?}", parsed.scheme())));
        }

        let host = match parsed.host() {
            Some(Host::Domain(d)) => d.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(invalid("missing host")),
        };
        let port = parsed.port_or_known_default().unwrap_or(80);

        let mut path = parsed.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        let host_field = parsed.host_str().unwrap_or(&host).to_string();
        let authority = if port == 80 {
            host_field
        } else {
            format!("{}:{}", host_field, port)
        };

        Ok(Self {
            host,
            port,
            path,
            authority,
        })
    }

    /// Value for the `Host` request field
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

fn split_suffix(s: &str) -> Result<(u64, Option<char>)> {
    let s = s.trim();
    let digits_end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, rest) = s.split_at(digits_end);
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::Config(format!("Invalid argument: {}", s)))?;

    let mut chars = rest.chars();
    let suffix = chars.next();
    if chars.next().is_some() {
        return Err(Error::Config(format!("Invalid argument: {}", s)));
    }
    Ok((value, suffix))
}

/// Parse a byte size: `[0-9]+[kKmM]`, binary multiples
pub fn parse_size(s: &str) -> Result<usize> {
    let (value, suffix) = split_suffix(s)?;
    let multiplier = match suffix {
        None => 1,
        Some('k' | 'K') => 1024,
        Some('m' | 'M') => 1024 * 1024,
        Some(_) => {
            return Err(Error::Config(format!(
                "Invalid argument: {}, [0-9]+[kKmM] expect.",
                s
            )))
        }
    };
    value
        .checked_mul(multiplier)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| out_of_range(s))
}

/// Parse a line rate in bits per second (`[0-9]+[kKmM]`, decimal
/// multiples) into bytes per second
pub fn parse_rate(s: &str) -> Result<u64> {
    let (value, suffix) = split_suffix(s)?;
    let multiplier = match suffix {
        None => 1,
        Some('k' | 'K') => 1000,
        Some('m' | 'M') => 1_000_000,
        Some(_) => {
            return Err(Error::Config(format!(
                "Invalid argument: {}, [0-9]+[kKmM] expect.",
                s
            )))
        }
    };
    let bits = value
        .checked_mul(multiplier)
        .ok_or_else(|| out_of_range(s))?;
    Ok(bits / 8)
}

/// Parse an interval in seconds: `[0-9]+[sSmMhH]`
pub fn parse_interval(s: &str) -> Result<u64> {
    let (value, suffix) = split_suffix(s)?;
    let multiplier = match suffix {
        None | Some('s' | 'S') => 1,
        Some('m' | 'M') => 60,
        Some('h' | 'H') => 3600,
        Some(_) => {
            return Err(Error::Config(format!(
                "Invalid argument: {}, [0-9]+[sSmMhH] expect.",
                s
            )))
        }
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| out_of_range(s))
}

fn out_of_range(s: &str) -> Error {
    Error::Config(format!("Invalid argument: {}, value out of range", s))
}
