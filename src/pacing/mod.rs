//! Upload pacing: byte-rate ceiling and per-window transfer limits

pub mod rate;
pub mod window;

pub use rate::RateGovernor;
pub use window::{TickKind, TransferWindowGuard, WindowCounters};
