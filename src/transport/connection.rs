//! Socket lifecycle for the single uplink connection
//!
//! Resolves and dials the destination through a [`Dialer`], tracks pending
//! non-blocking connects, and counts failures per reconnect cycle. When the
//! failure count reaches the configured limit the cycle is reported as
//! exhausted and the counter starts over, so the caller decides when the
//! next cycle begins.

use super::Dialer;
use crate::config::Destination;
use crate::error::Error;
use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

/// Where the connection stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Result of a connect step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Socket is usable
    Connected,
    /// Connect in progress; wait for writability
    Pending,
    /// Attempt failed; more attempts remain in this cycle
    Failed,
    /// Attempt failed and the retry limit was reached (counter reset)
    Exhausted,
}

/// Owns the socket and the retry counter
pub struct ConnectionManager {
    destination: Destination,
    dialer: Box<dyn Dialer>,
    retry_limit: u32,
    retries: u32,
    attempts: u64,
    stream: Option<TcpStream>,
    status: ConnectionStatus,
    last_error: Option<Error>,
}

impl ConnectionManager {
    pub fn new(destination: Destination, dialer: Box<dyn Dialer>, retry_limit: u32) -> Self {
        Self {
            destination,
            dialer,
            retry_limit,
            retries: 0,
            attempts: 0,
            stream: None,
            status: ConnectionStatus::Disconnected,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.status == ConnectionStatus::Connecting
    }

    /// Failures counted in the current cycle
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Cause of the most recent failed attempt in this cycle
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Dial attempts since creation
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Swap the dialer, returning the previous one
    pub fn set_dialer(&mut self, dialer: Box<dyn Dialer>) -> Box<dyn Dialer> {
        std::mem::replace(&mut self.dialer, dialer)
    }

    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    /// Start a connection if none exists
    pub fn connect(&mut self) -> ConnectOutcome {
        match self.status {
            ConnectionStatus::Connected => return ConnectOutcome::Connected,
            ConnectionStatus::Connecting => return ConnectOutcome::Pending,
            ConnectionStatus::Disconnected | ConnectionStatus::Failed => {}
        }

        self.attempts += 1;
        let (host, port) = (self.destination.host.clone(), self.destination.port);
        debug!("Connecting to {}:{} (attempt {})", host, port, self.attempts);

        match self.dialer.dial(&host, port) {
            Ok(dialed) => {
                self.stream = Some(dialed.stream);
                if dialed.in_progress {
                    self.status = ConnectionStatus::Connecting;
                    ConnectOutcome::Pending
                } else {
                    self.status = ConnectionStatus::Connected;
                    info!("Connected to {}:{}", host, port);
                    ConnectOutcome::Connected
                }
            }
            Err(e) => {
                warn!("Connect to {}:{} failed: {}", host, port, e);
                self.fail(&e)
            }
        }
    }

    /// Complete a pending connect once the socket polled writable or errored
    pub fn finish_connect(&mut self) -> ConnectOutcome {
        if self.status != ConnectionStatus::Connecting {
            return self.connect();
        }
        let result = match self.stream.as_ref() {
            Some(stream) => stream.take_error().and_then(|err| match err {
                Some(e) => Err(e),
                // writable without SO_ERROR can still be a refused connect
                None => stream.peer_addr().map(|_| ()),
            }),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };

        match result {
            Ok(()) => {
                self.status = ConnectionStatus::Connected;
                info!(
                    "Connected to {}:{}",
                    self.destination.host, self.destination.port
                );
                ConnectOutcome::Connected
            }
            Err(e) => {
                warn!(
                    "Connect to {}:{} failed: {}",
                    self.destination.host, self.destination.port, e
                );
                self.teardown();
                self.fail(&e)
            }
        }
    }

    /// Connection-level error on an established socket: close and count it
    pub fn record_error(&mut self, cause: &Error) -> ConnectOutcome {
        self.teardown();
        self.fail(cause)
    }

    /// A transaction was acknowledged; start a fresh retry cycle
    pub fn mark_success(&mut self) {
        self.retries = 0;
        self.last_error = None;
    }

    /// Close the socket without counting a failure
    pub fn teardown(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.status = ConnectionStatus::Disconnected;
    }

    fn fail(&mut self, cause: &dyn fmt::Display) -> ConnectOutcome {
        self.last_error = Some(Error::Connect(format!(
            "{}: {}",
            self.destination.authority(),
            cause
        )));
        self.stream = None;
        self.status = ConnectionStatus::Failed;
        self.retries += 1;
        if self.retries >= self.retry_limit {
            warn!(
                "Giving up on {}:{} after {} failed attempts",
                self.destination.host, self.destination.port, self.retries
            );
            self.retries = 0;
            ConnectOutcome::Exhausted
        } else {
            ConnectOutcome::Failed
        }
    }
}
