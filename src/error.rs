//! Error types for netpipe

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// netpipe error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Destination URL could not be parsed or uses an unsupported scheme
    #[error("Invalid destination URL {url:?}: {reason}")]
    InvalidUrl {
        /// URL as given
        url: String,
        /// What was wrong with it
        reason: String,
    },

    /// Serialized request header exceeds the header buffer
    #[error("Request header too large: {size} bytes (limit {limit})")]
    HeaderTooLarge {
        /// Size the header would have
        size: usize,
        /// Header buffer bound
        limit: usize,
    },

    /// API used out of order (e.g. request line set twice)
    #[error("Contract violation: {0}")]
    Contract(&'static str),

    /// Resolving or connecting to the destination failed
    #[error("Connect error: {0}")]
    Connect(String),

    /// Malformed or unsupported HTTP response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Body compression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Config file parse error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Config file serialization error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// Whether the engine recovers from this error by tearing down the
    /// connection and retrying (transient I/O and protocol errors).
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Protocol(_) | Error::Connect(_))
    }
}
