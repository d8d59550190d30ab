//! Streaming engine
//!
//! One thread, one `poll(2)` per iteration over the input descriptor and
//! the uplink socket. Each iteration:
//!
//! 1. reads whatever input is available (once; a full buffer is not polled)
//! 2. completes a pending connect, or reads the server's reply
//! 3. starts a transfer if none is in flight, one is due and the window
//!    guard allows it
//! 4. connects if a transfer is waiting for a socket
//! 5. writes request bytes, paced by the rate governor
//!
//! Buffered input is due for a busy transfer at a window boundary, when the
//! buffer is full, or at EOF; input arriving in between coalesces into one
//! body. A transfer covers everything buffered when it starts. Its input
//! bytes are consumed only after the response body has been read
//! completely; any failure before that rewinds the frame and resends it
//! verbatim on the next connection.

use crate::buffer::InputBuffer;
use crate::config::{Destination, PipeConfig};
use crate::error::{Error, Result};
use crate::header::{HeaderStrategy, FIELD_ZIP};
use crate::http::{Flow, ReadProgress, RequestPipeline, ResponsePipeline};
use crate::pacing::{RateGovernor, TickKind, TransferWindowGuard};
use crate::stop::StopToken;
use crate::transport::{
    poll_slots, ConnectOutcome, ConnectionManager, Dialer, Interest, Readiness, TcpDialer,
};
use log::{debug, error, info, warn};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

/// Byte count the governor waits for before waking the loop
const PACE_CHUNK: usize = 1460;

/// A readable descriptor the engine can poll
pub trait InputSource: io::Read + AsRawFd + Send {}

impl<T: io::Read + AsRawFd + Send> InputSource for T {}

/// Totals for one `serve` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeReport {
    /// Acknowledged transactions
    pub transactions: u64,
    /// Bytes written to the socket, retries included
    pub bytes_sent: u64,
    /// Connection attempts
    pub connect_attempts: u64,
}

/// Why `serve` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped,
    Drained,
}

/// Runtime state created by [`StreamingEngine::init`]
struct Session {
    input: Box<dyn InputSource>,
    buffer: InputBuffer,
    connection: ConnectionManager,
    request: RequestPipeline,
    response: ResponsePipeline,
    flow: Flow,
    governor: RateGovernor,
    eof: bool,
    /// Retry cycle exhausted; wait for the next window
    exhausted: bool,
    /// A window boundary passed with input buffered
    flush_due: bool,
    retry_at: Option<Instant>,
    /// Kind of the transfer in flight, for logging
    transfer: Option<TickKind>,
    report: ServeReport,
}

/// Streams an input source to an HTTP endpoint as POST transactions
pub struct StreamingEngine {
    config: PipeConfig,
    header: Box<dyn HeaderStrategy>,
    dialer: Option<Box<dyn Dialer>>,
    destination: Option<Destination>,
    session: Option<Session>,
}

impl StreamingEngine {
    pub fn new(config: PipeConfig, header: Box<dyn HeaderStrategy>) -> Self {
        Self {
            config,
            header,
            dialer: None,
            destination: None,
            session: None,
        }
    }

    /// Replace the header strategy, returning the previous one
    ///
    /// After `init` the new strategy is wired with the request line and
    /// fields first; on error the previous strategy stays in place.
    pub fn set_header(
        &mut self,
        mut header: Box<dyn HeaderStrategy>,
    ) -> Result<Box<dyn HeaderStrategy>> {
        if let Some(dest) = &self.destination {
            wire_header(header.as_mut(), dest, &self.config)?;
        }
        Ok(std::mem::replace(&mut self.header, header))
    }

    /// Replace how connections are opened (defaults to [`TcpDialer`])
    pub fn set_dialer(&mut self, dialer: Box<dyn Dialer>) {
        match self.session.as_mut() {
            Some(session) => {
                session.connection.set_dialer(dialer);
            }
            None => self.dialer = Some(dialer),
        }
    }

    /// Bind the input source and the destination URL
    pub fn init(&mut self, input: Box<dyn InputSource>, url: &str) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::Contract("engine already initialized"));
        }
        self.config.validate()?;
        let dest = Destination::parse(url)?;
        wire_header(self.header.as_mut(), &dest, &self.config)?;

        let dialer = self.dialer.take().unwrap_or_else(|| Box::new(TcpDialer));
        info!(
            "Uplink http://{}{} (buffer {} bytes, rate {} B/s, window {}s, idle {}, busy {})",
            dest.authority(),
            dest.path,
            self.config.buffer_size,
            self.config.transfer_rate,
            self.config.interval_secs,
            self.config.idle_limit,
            self.config.busy_limit
        );

        self.session = Some(Session {
            input,
            buffer: InputBuffer::new(self.config.buffer_size),
            connection: ConnectionManager::new(dest.clone(), dialer, self.config.connect_retry),
            request: RequestPipeline::new(),
            response: ResponsePipeline::new(),
            flow: Flow::Request,
            governor: RateGovernor::new(self.config.transfer_rate),
            eof: false,
            exhausted: false,
            flush_due: false,
            retry_at: None,
            transfer: None,
            report: ServeReport::default(),
        });
        self.destination = Some(dest);
        Ok(())
    }

    /// Run until the stop token fires or the input is drained
    ///
    /// Returns once input reached EOF and every buffered byte was
    /// acknowledged. Input read errors and poll failures are fatal;
    /// connection and protocol errors are retried.
    pub fn serve(&mut self, interval: Duration, stop: &StopToken) -> Result<ServeReport> {
        if interval.is_zero() {
            return Err(Error::Config("interval must be non-zero".into()));
        }
        let Self {
            config,
            header,
            session,
            ..
        } = self;
        let session = session
            .as_mut()
            .ok_or(Error::Contract("serve called before init"))?;

        let fd = session.input.as_raw_fd();
        let restore = set_nonblocking(fd)?;
        let result = session.run(config, header.as_mut(), interval, stop);
        if let Some(flags) = restore {
            restore_flags(fd, flags);
        }

        let exit = result?;
        session.report.connect_attempts = session.connection.attempts();
        let report = session.report;
        match exit {
            Exit::Stopped => info!("Stopped after {} transactions", report.transactions),
            Exit::Drained => info!("Input drained after {} transactions", report.transactions),
        }
        Ok(report)
    }
}

/// Request line and connection-scoped fields, then a size check
fn wire_header(
    header: &mut dyn HeaderStrategy,
    dest: &Destination,
    config: &PipeConfig,
) -> Result<()> {
    header.set_request("POST", &dest.path, "HTTP/1.1")?;
    header.set_field("Host", Some(dest.authority()))?;
    header.set_field(
        "Connection",
        if config.persistent { None } else { Some("close") },
    )?;

    // largest header this configuration can produce
    if config.zip_level > 0 {
        header.set_field(FIELD_ZIP, Some("1"))?;
    }
    let worst = header.generate(usize::MAX).map(|h| h.len());
    header.set_field(FIELD_ZIP, None)?;
    debug!("Request header up to {} bytes", worst?);
    Ok(())
}

impl Session {
    fn run(
        &mut self,
        config: &PipeConfig,
        header: &mut dyn HeaderStrategy,
        interval: Duration,
        stop: &StopToken,
    ) -> Result<Exit> {
        let mut guard = TransferWindowGuard::new(
            config.idle_limit,
            config.busy_limit,
            interval,
            Instant::now(),
        );
        let input_fd = self.input.as_raw_fd();

        loop {
            if stop.is_stopped() {
                self.flush_on_stop();
                return Ok(Exit::Stopped);
            }
            if self.eof && self.buffer.is_empty() && !self.request.in_flight() {
                self.connection.teardown();
                return Ok(Exit::Drained);
            }

            let now = Instant::now();
            let input_slot =
                (!self.eof && !self.buffer.is_full()).then_some((input_fd, Interest::READ));
            let socket_slot = self.socket_interest(now);
            let timeout = self.poll_timeout(&guard, now);

            let outcome = poll_slots([input_slot, socket_slot], timeout)?;
            if outcome.interrupted {
                continue;
            }
            let now = Instant::now();
            if guard.roll(now) {
                debug!("Transfer window reset");
                if self.exhausted {
                    info!("Retrying connection in new window");
                    self.exhausted = false;
                }
                self.flush_due = !self.buffer.is_empty();
            }
            let idle_at_start = self.buffer.is_empty();

            let mut read = 0;
            if input_slot.is_some() && outcome.slots[0].any() {
                read = self.read_input()?;
            }

            if socket_slot.is_some() {
                self.socket_events(outcome.slots[1], config, now)?;
            }

            if !self.request.in_flight() {
                let kind = if !self.buffer.is_empty() {
                    (self.flush_due || self.eof || self.buffer.is_full())
                        .then_some(TickKind::Busy)
                } else if idle_at_start && read == 0 && outcome.timed_out() && !self.eof {
                    Some(TickKind::Idle)
                } else {
                    None
                };
                if let Some(kind) = kind {
                    self.start_transfer(kind, header, config, &mut guard, now)?;
                }
            }

            self.ensure_connected(config, now);
            self.pump_request(config, now)?;
        }
    }

    /// Single read into the buffer
    fn read_input(&mut self) -> Result<usize> {
        match self.buffer.fill_from(&mut *self.input) {
            Ok(0) => {
                info!("Input closed, draining {} buffered bytes", self.buffer.len());
                self.eof = true;
                Ok(0)
            }
            Ok(n) => {
                debug!("Read {} input bytes ({} buffered)", n, self.buffer.len());
                Ok(n)
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(0)
            }
            Err(e) => {
                error!("Input read failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Start a transfer of everything buffered, or an empty heartbeat
    fn start_transfer(
        &mut self,
        kind: TickKind,
        header: &mut dyn HeaderStrategy,
        config: &PipeConfig,
        guard: &mut TransferWindowGuard,
        now: Instant,
    ) -> Result<()> {
        // the final drain after EOF is not subject to the window
        if !self.eof && !guard.try_acquire(kind, now) {
            return Ok(());
        }

        let len = self.buffer.len();
        let zip_level = if len == 0 { 0 } else { config.zip_level };
        let frame = self.request.prepare(header, &self.buffer, len, zip_level)?;
        match kind {
            TickKind::Busy => debug!(
                "Transfer of {} bytes ({} on the wire)",
                len,
                frame.content_length()
            ),
            TickKind::Idle => debug!("Idle heartbeat"),
        }
        if kind == TickKind::Busy {
            self.flush_due = false;
        }
        self.transfer = Some(kind);
        self.flow = Flow::Request;
        Ok(())
    }

    fn ensure_connected(&mut self, config: &PipeConfig, now: Instant) {
        if !self.request.in_flight() || self.exhausted {
            return;
        }
        if self.connection.is_connected() || self.connection.is_connecting() {
            return;
        }
        if self.retry_at.is_some_and(|at| at > now) {
            return;
        }
        self.retry_at = None;
        let outcome = self.connection.connect();
        self.on_connect(outcome, config, now);
    }

    fn on_connect(&mut self, outcome: ConnectOutcome, config: &PipeConfig, now: Instant) {
        match outcome {
            ConnectOutcome::Connected => {
                self.flow = Flow::Request;
                self.response.reset();
            }
            ConnectOutcome::Pending => {}
            ConnectOutcome::Failed => {
                debug!(
                    "Reconnecting in {:?} ({} of {} attempts failed)",
                    config.reconnect_delay(),
                    self.connection.retries(),
                    config.connect_retry
                );
                self.retry_at = Some(now + config.reconnect_delay());
            }
            ConnectOutcome::Exhausted => {
                match self.connection.last_error() {
                    Some(err) => error!(
                        "{} ({} attempts), waiting for next window",
                        err, config.connect_retry
                    ),
                    None => error!("Connect retries exhausted, waiting for next window"),
                }
                self.exhausted = true;
            }
        }
    }

    /// Handle readiness reported for the socket
    fn socket_events(
        &mut self,
        ready: Readiness,
        config: &PipeConfig,
        now: Instant,
    ) -> Result<()> {
        if self.connection.is_connecting() {
            if ready.any() {
                let outcome = self.connection.finish_connect();
                self.on_connect(outcome, config, now);
            }
            return Ok(());
        }
        if !self.connection.is_connected() {
            return Ok(());
        }

        if !self.request.in_flight() {
            // nothing outstanding: any event means the server closed or misbehaved
            if ready.readable || ready.hangup || ready.error {
                debug!("Server closed idle connection");
                self.connection.teardown();
            }
            return Ok(());
        }

        match self.flow {
            Flow::Response if ready.readable || ready.hangup || ready.error => {
                self.read_response(config, now)
            }
            Flow::Request if ready.error || ready.hangup => {
                let err = Error::Protocol("connection reset while sending".into());
                self.transaction_error(err, config, now)
            }
            _ => Ok(()),
        }
    }

    fn read_response(&mut self, config: &PipeConfig, now: Instant) -> Result<()> {
        let Some(stream) = self.connection.stream_mut() else {
            return Ok(());
        };
        match self.response.receive(stream) {
            Ok(ReadProgress::Pending) => Ok(()),
            Ok(ReadProgress::Complete(summary)) => {
                let Some(frame) = self.request.finish() else {
                    return Ok(());
                };
                self.buffer.consume(frame.source_len());
                if self.buffer.is_empty() {
                    self.flush_due = false;
                }
                self.report.transactions += 1;
                self.connection.mark_success();
                self.flow = Flow::Request;
                match self.transfer.take() {
                    Some(TickKind::Idle) => debug!("Heartbeat acknowledged ({})", summary.status),
                    _ => info!(
                        "Sent {} bytes ({} on the wire), status {}",
                        frame.source_len(),
                        frame.content_length(),
                        summary.status
                    ),
                }
                if !config.persistent || summary.close {
                    debug!("Closing connection after transaction");
                    self.connection.teardown();
                }
                Ok(())
            }
            Err(e) => self.transaction_error(e, config, now),
        }
    }

    /// Write request bytes the governor allows
    fn pump_request(&mut self, config: &PipeConfig, now: Instant) -> Result<()> {
        if self.flow != Flow::Request || !self.connection.is_connected() {
            return Ok(());
        }
        let Some(frame) = self.request.frame() else {
            return Ok(());
        };
        if frame.is_sent() {
            self.flow = Flow::Response;
            return Ok(());
        }
        let limit = self
            .governor
            .allowance(now, frame.remaining_body(), self.buffer.capacity());
        if frame.header_done() && limit < self.pace_quantum(frame.remaining_body()) {
            return Ok(());
        }

        let Some(stream) = self.connection.stream_mut() else {
            return Ok(());
        };
        match self.request.send(stream, &self.buffer, limit) {
            Ok(progress) => {
                self.governor.commit(progress.body, now);
                self.report.bytes_sent += progress.written as u64;
                if progress.complete {
                    self.flow = Flow::Response;
                }
                Ok(())
            }
            Err(e) => self.transaction_error(e.into(), config, now),
        }
    }

    /// Connection-level errors roll the transaction back; others end `serve`
    fn transaction_error(&mut self, err: Error, config: &PipeConfig, now: Instant) -> Result<()> {
        if !err.is_connection_level() {
            error!("Transaction aborted: {}", err);
            return Err(err);
        }
        self.fail_transaction(err, config, now);
        Ok(())
    }

    /// Rollback: close the socket, keep the frame for a verbatim resend
    fn fail_transaction(&mut self, err: Error, config: &PipeConfig, now: Instant) {
        warn!("Transaction failed: {}", err);
        self.request.rewind();
        self.response.reset();
        self.flow = Flow::Request;
        let outcome = self.connection.record_error(&err);
        self.on_connect(outcome, config, now);
    }

    /// Best-effort single write of the in-flight frame before exiting
    fn flush_on_stop(&mut self) {
        if self.flow != Flow::Request || !self.connection.is_connected() {
            return;
        }
        if !self.request.frame().is_some_and(|f| !f.is_sent()) {
            return;
        }
        if let Some(stream) = self.connection.stream_mut() {
            match self.request.send(stream, &self.buffer, usize::MAX) {
                Ok(progress) => {
                    self.report.bytes_sent += progress.written as u64;
                    debug!("Flushed {} bytes on stop", progress.written);
                }
                Err(e) => debug!("Flush on stop failed: {}", e),
            }
        }
    }

    /// Smallest body write worth waking up for
    fn pace_quantum(&self, remaining: usize) -> usize {
        if self.governor.is_unlimited() {
            return remaining.min(1);
        }
        let per_second = usize::try_from(self.governor.rate()).unwrap_or(usize::MAX);
        remaining
            .min(PACE_CHUNK)
            .min(per_second)
            .min(self.buffer.capacity())
            .max(1)
    }

    fn socket_interest(&self, now: Instant) -> Option<(RawFd, Interest)> {
        let fd = self.connection.raw_fd()?;
        if self.connection.is_connecting() {
            return Some((fd, Interest::WRITE));
        }
        let Some(frame) = self.request.frame() else {
            return Some((fd, Interest::READ));
        };
        let interest = match self.flow {
            Flow::Response => Interest::READ,
            Flow::Request if !frame.header_done() => Interest::WRITE,
            Flow::Request
                if self.governor.allowance(now, frame.remaining_body(), self.buffer.capacity())
                    >= self.pace_quantum(frame.remaining_body()) =>
            {
                Interest::WRITE
            }
            // paced out: only errors and hangups are reported
            Flow::Request => Interest::default(),
        };
        Some((fd, interest))
    }

    fn poll_timeout(&self, guard: &TransferWindowGuard, now: Instant) -> Duration {
        let mut timeout = guard.until_boundary(now);

        if let Some(frame) = self.request.frame() {
            if self.flow == Flow::Request && self.connection.is_connected() && frame.header_done()
            {
                let wanted = self.pace_quantum(frame.remaining_body());
                timeout = timeout.min(self.governor.delay_for(wanted, now));
            }
            if let Some(at) = self.retry_at {
                if !self.exhausted {
                    timeout = timeout.min(at.saturating_duration_since(now));
                }
            }
        }
        timeout
    }
}

/// Put `fd` in non-blocking mode; returns the flags to restore, if changed
fn set_nonblocking(fd: RawFd) -> Result<Option<libc::c_int>> {
    // SAFETY: fcntl with F_GETFL/F_SETFL only reads and writes the
    // descriptor's status flags; an invalid fd is reported via -1.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error().into());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(None);
    }
    // SAFETY: see above
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(Some(flags))
}

fn restore_flags(fd: RawFd, flags: libc::c_int) {
    // SAFETY: fcntl F_SETFL on a descriptor we still own
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        debug!("Could not restore input flags: {}", io::Error::last_os_error());
    }
}
