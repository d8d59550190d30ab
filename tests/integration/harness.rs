//! Loopback HTTP sink and engine helpers
//!
//! The sink accepts one connection at a time, parses `Content-Length`
//! framed requests and answers each with a small 200 response. It can be
//! told to drop the first few requests without answering, which makes the
//! engine roll back and resend.

use netpipe::header::FIELD_CLIENT_ID;
use netpipe::{
    Dialed, Dialer, HeaderStrategy, PipeConfig, PostHeader, ServeReport, StopToken,
    StreamingEngine,
};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Window long enough that no test crosses a boundary
pub const LONG_WINDOW: Duration = Duration::from_secs(600);

/// One request as seen by the sink
#[derive(Debug, Clone)]
pub struct Recorded {
    pub head: String,
    pub body: Vec<u8>,
}

impl Recorded {
    /// Value of a header field (case-insensitive name)
    pub fn field(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.trim().eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }
}

/// Sink behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkOptions {
    /// Close the connection instead of answering the first N requests
    pub drop_requests: usize,
    /// Answer with `Connection: close` and close afterwards
    pub close_after_response: bool,
}

#[derive(Default)]
struct SinkState {
    acknowledged: Vec<Recorded>,
    dropped: Vec<Recorded>,
    connections: usize,
}

/// HTTP endpoint on 127.0.0.1 served by a background thread
pub struct HttpSink {
    port: u16,
    state: Arc<Mutex<SinkState>>,
}

impl HttpSink {
    pub fn start() -> Self {
        Self::with_options(SinkOptions::default())
    }

    pub fn with_options(options: SinkOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(SinkState::default()));

        let shared = Arc::clone(&state);
        thread::Builder::new()
            .name("http-sink".to_string())
            .spawn(move || {
                let mut to_drop = options.drop_requests;
                for conn in listener.incoming() {
                    let Ok(conn) = conn else { break };
                    shared.lock().unwrap().connections += 1;
                    serve_connection(conn, &shared, &mut to_drop, options.close_after_response);
                }
            })
            .unwrap();

        Self { port, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Requests that were answered, in arrival order
    pub fn acknowledged(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().acknowledged.clone()
    }

    /// Requests read completely and then dropped without an answer
    pub fn dropped(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().dropped.clone()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    /// Wait until at least `n` requests were answered
    pub fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.acknowledged().len() >= n {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

fn serve_connection(
    mut conn: TcpStream,
    state: &Mutex<SinkState>,
    to_drop: &mut usize,
    close_after_response: bool,
) {
    let mut pending = Vec::new();
    loop {
        let Some(request) = read_request(&mut conn, &mut pending) else {
            return;
        };

        if *to_drop > 0 {
            *to_drop -= 1;
            state.lock().unwrap().dropped.push(request);
            return;
        }

        let client_close = request
            .field("Connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"));
        state.lock().unwrap().acknowledged.push(request);

        let response: &[u8] = if close_after_response {
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
        } else {
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"
        };
        if conn.write_all(response).is_err() || close_after_response || client_close {
            return;
        }
    }
}

/// Read one request; `None` when the client closed
fn read_request(conn: &mut TcpStream, pending: &mut Vec<u8>) -> Option<Recorded> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&pending[..end]).to_string();
            let len = head
                .lines()
                .find_map(|l| {
                    let (k, v) = l.split_once(':')?;
                    k.eq_ignore_ascii_case("Content-Length")
                        .then(|| v.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            let total = end + 4 + len;
            if pending.len() >= total {
                let body = pending[end + 4..total].to_vec();
                pending.drain(..total);
                return Some(Recorded { head, body });
            }
        }
        match conn.read(&mut chunk) {
            Ok(0) | Err(_) => return None,
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Engine configuration with pacing off and a short reconnect delay
pub fn test_config() -> PipeConfig {
    PipeConfig {
        transfer_rate: 0,
        reconnect_delay_ms: 10,
        interval_secs: LONG_WINDOW.as_secs(),
        client_id: Some("0123456789ab".to_string()),
        ..PipeConfig::default()
    }
}

/// One-second windows without heartbeats: buffered input goes out at
/// each boundary
pub fn short_window() -> PipeConfig {
    PipeConfig {
        interval_secs: 1,
        idle_limit: 0,
        ..test_config()
    }
}

/// Engine with a fixed client identifier
pub fn engine(config: PipeConfig) -> StreamingEngine {
    let mut header = PostHeader::with_user_agent("netpipe/test");
    let id = config.client_id.clone().unwrap_or_default();
    header.set_field(FIELD_CLIENT_ID, Some(&id)).unwrap();
    StreamingEngine::new(config, Box::new(header))
}

/// Input pair: the engine reads from the first, the test writes the second
pub fn input_pair() -> (UnixStream, UnixStream) {
    UnixStream::pair().unwrap()
}

/// Feed `chunks` then close the input, and serve to completion
pub fn pipe_through(
    config: PipeConfig,
    sink: &HttpSink,
    chunks: &[&[u8]],
) -> netpipe::Result<ServeReport> {
    let (reader, mut writer) = input_pair();
    for chunk in chunks {
        writer.write_all(chunk).unwrap();
    }
    drop(writer);

    let interval = config.interval();
    let mut engine = engine(config);
    engine.init(Box::new(reader), &sink.url("/upload"))?;
    engine.serve(interval, &StopToken::new())
}

/// Dialer refusing the first `refusals` attempts, counting every attempt
pub struct FlakyDialer {
    refusals: u32,
    attempts: Arc<AtomicU32>,
}

impl FlakyDialer {
    pub fn new(refusals: u32) -> (Self, Arc<AtomicU32>) {
        let attempts = Arc::new(AtomicU32::new(0));
        (
            Self {
                refusals,
                attempts: Arc::clone(&attempts),
            },
            attempts,
        )
    }
}

impl Dialer for FlakyDialer {
    fn dial(&mut self, host: &str, port: u16) -> io::Result<Dialed> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusals > 0 {
            self.refusals -= 1;
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        let stream = TcpStream::connect((host, port))?;
        stream.set_nonblocking(true)?;
        Ok(Dialed {
            stream,
            in_progress: false,
        })
    }
}
