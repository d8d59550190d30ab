//! HTTP/1.1 framing for the uplink
//!
//! The request and response directions are two independent state machines
//! that share one socket half-duplex: a request is written completely
//! before its response is read, and the next request starts only after the
//! response body has been consumed.
//!
//! ```text
//!   Flow::Request                       Flow::Response
//!  ┌──────┐ header done ┌──────┐ sent  ┌──────┐ head parsed ┌──────┐
//!  │ Head │────────────▶│ Body │──────▶│ Head │────────────▶│ Body │──┐
//!  └──────┘             └──────┘       └──────┘             └──────┘  │
//!      ▲                                                              │
//!      └──────────── body consumed (persistent) / close ──────────────┘
//! ```

pub mod request;
pub mod response;

pub use request::{RequestPipeline, RequestState, SendProgress};
pub use response::{ReadProgress, ResponsePipeline, ResponseState, ResponseSummary};

/// Which direction currently owns the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Request,
    Response,
}

/// Upper bound on a response head
pub const MAX_RESPONSE_HEAD: usize = 2048;
