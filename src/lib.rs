//! netpipe - stream local input to an HTTP endpoint
//!
//! Data read from an input descriptor is uploaded as a sequence of `POST`
//! transactions over a single keep-alive connection. Uploads are paced to a
//! byte rate, the number of transfers per time window is bounded, failed
//! connects are retried, and bytes are consumed only after the server
//! acknowledged them.
//!
//! ```no_run
//! use netpipe::{PipeConfig, PostHeader, StopToken, StreamingEngine};
//!
//! let config = PipeConfig::default();
//! let interval = config.interval();
//! let mut engine = StreamingEngine::new(config, Box::new(PostHeader::new()));
//! engine.init(Box::new(std::io::stdin()), "http://collector:8080/upload")?;
//! let report = engine.serve(interval, &StopToken::new())?;
//! println!("{} transactions", report.transactions);
//! # Ok::<(), netpipe::Error>(())
//! ```

pub mod buffer;
pub mod compress;
pub mod config;
pub mod engine;
pub mod error;
pub mod header;
pub mod http;
pub mod identity;
pub mod pacing;
pub mod stop;
pub mod transport;

// Re-export commonly used types
pub use config::{Destination, PipeConfig};
pub use engine::{InputSource, ServeReport, StreamingEngine};
pub use error::{Error, Result};
pub use header::{HeaderStrategy, PostHeader};
pub use stop::StopToken;
pub use transport::{Dialed, Dialer, TcpDialer};
