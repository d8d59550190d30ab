//! End-to-end tests: the engine streaming a local socket pair into a
//! loopback HTTP sink
//!
//! ```bash
//! cargo test --test integration -- --nocapture
//! ```

mod cli;
mod harness;
mod scenarios;
