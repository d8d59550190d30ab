//! Delivery scenarios

use crate::harness::{
    engine, input_pair, pipe_through, short_window, test_config, FlakyDialer, HttpSink,
    SinkOptions, LONG_WINDOW,
};
use flate2::read::ZlibDecoder;
use netpipe::{PipeConfig, StopToken};
use std::io::{Read, Write};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_single_post_for_small_input() {
    let sink = HttpSink::start();
    let config = PipeConfig {
        idle_limit: 1,
        busy_limit: 3,
        ..test_config()
    };

    let report = pipe_through(config, &sink, &[b"0123456789"]).unwrap();

    let requests = sink.acknowledged();
    assert_eq!(requests.len(), 1);
    assert_eq!(report.transactions, 1);
    let request = &requests[0];
    assert!(request.head.starts_with("POST /upload HTTP/1.1\r\n"));
    assert_eq!(request.field("Content-Length"), Some("10"));
    assert_eq!(request.field("LETV-TV-MAC"), Some("0123456789ab"));
    assert_eq!(request.field("LETV-ZIP"), None);
    assert_eq!(request.body, b"0123456789");
}

#[test]
fn test_chunks_in_one_window_are_coalesced() {
    let sink = HttpSink::start();
    let config = PipeConfig {
        busy_limit: 1,
        ..test_config()
    };
    let (reader, mut writer) = input_pair();

    let mut engine = engine(config);
    engine.init(Box::new(reader), &sink.url("/upload")).unwrap();
    let server = thread::spawn(move || engine.serve(LONG_WINDOW, &StopToken::new()));

    writer.write_all(b"hello").unwrap();
    thread::sleep(Duration::from_millis(100));
    writer.write_all(b"world").unwrap();
    thread::sleep(Duration::from_millis(100));
    // nothing is due before the window ends or the input closes
    assert!(sink.acknowledged().is_empty());
    drop(writer);

    let report = server.join().unwrap().unwrap();
    assert_eq!(report.transactions, 1);
    let requests = sink.acknowledged();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].field("Content-Length"), Some("10"));
    assert_eq!(requests[0].body, b"helloworld");
}

#[test]
fn test_buffered_input_goes_out_at_window_boundary() {
    let sink = HttpSink::start();
    let config = PipeConfig {
        interval_secs: 1,
        idle_limit: 0,
        busy_limit: 1,
        ..test_config()
    };
    let (reader, mut writer) = input_pair();

    let mut engine = engine(config);
    engine.init(Box::new(reader), &sink.url("/upload")).unwrap();
    let stop = StopToken::new();
    let token = stop.clone();
    let started = Instant::now();
    let server = thread::spawn(move || engine.serve(Duration::from_secs(1), &token));

    writer.write_all(b"first ").unwrap();
    thread::sleep(Duration::from_millis(100));
    writer.write_all(b"second").unwrap();
    assert!(sink.wait_for(1, Duration::from_secs(5)));
    assert!(started.elapsed() >= Duration::from_millis(900));

    stop.stop();
    let report = server.join().unwrap().unwrap();
    drop(writer);

    assert_eq!(report.transactions, 1);
    assert_eq!(sink.acknowledged()[0].body, b"first second");
}

#[test]
fn test_full_buffer_is_sent_before_window_ends() {
    let sink = HttpSink::start();
    let config = PipeConfig {
        buffer_size: 16,
        busy_limit: 1,
        ..test_config()
    };
    let (reader, mut writer) = input_pair();

    let mut engine = engine(config);
    engine.init(Box::new(reader), &sink.url("/upload")).unwrap();
    let server = thread::spawn(move || engine.serve(LONG_WINDOW, &StopToken::new()));

    writer.write_all(b"0123456789abcdef").unwrap();
    assert!(sink.wait_for(1, Duration::from_secs(5)));
    // the window's only busy transfer is spent; the tail waits for EOF
    writer.write_all(b"tail").unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(sink.acknowledged().len(), 1);
    drop(writer);

    let report = server.join().unwrap().unwrap();
    assert_eq!(report.transactions, 2);
    let bodies: Vec<_> = sink.acknowledged().into_iter().map(|r| r.body).collect();
    assert_eq!(bodies, vec![b"0123456789abcdef".to_vec(), b"tail".to_vec()]);
}

#[test]
fn test_connect_retry_then_success() {
    let sink = HttpSink::start();
    let config = PipeConfig {
        connect_retry: 3,
        ..test_config()
    };
    let (reader, mut writer) = input_pair();
    writer.write_all(b"complete original payload").unwrap();
    drop(writer);

    let (dialer, attempts) = FlakyDialer::new(1);
    let mut engine = engine(config);
    engine.set_dialer(Box::new(dialer));
    engine.init(Box::new(reader), &sink.url("/upload")).unwrap();
    let report = engine.serve(LONG_WINDOW, &StopToken::new()).unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(report.connect_attempts, 2);
    let requests = sink.acknowledged();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, b"complete original payload");
}

#[test]
fn test_compressed_body_inflates_to_input() {
    let sink = HttpSink::start();
    let config = PipeConfig {
        zip_level: 6,
        ..test_config()
    };
    let text = "level=info msg=\"heartbeat ok\" uptime=42\n".repeat(200);

    pipe_through(config, &sink, &[text.as_bytes()]).unwrap();

    let requests = sink.acknowledged();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.field("LETV-ZIP"), Some("1"));
    let declared: usize = request.field("Content-Length").unwrap().parse().unwrap();
    assert_eq!(declared, request.body.len());
    assert!(declared < text.len());

    let mut inflated = Vec::new();
    ZlibDecoder::new(&request.body[..])
        .read_to_end(&mut inflated)
        .unwrap();
    assert_eq!(inflated, text.as_bytes());
}

#[test]
fn test_unanswered_requests_are_resent_exactly_once() {
    let sink = HttpSink::with_options(SinkOptions {
        drop_requests: 2,
        ..SinkOptions::default()
    });
    let config = PipeConfig {
        connect_retry: 5,
        ..test_config()
    };
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

    let report = pipe_through(config, &sink, &[&payload]).unwrap();

    let dropped = sink.dropped();
    assert_eq!(dropped.len(), 2);
    for attempt in &dropped {
        assert_eq!(attempt.body, payload);
    }

    let delivered: Vec<u8> = sink
        .acknowledged()
        .into_iter()
        .flat_map(|r| r.body)
        .collect();
    assert_eq!(delivered, payload);
    assert_eq!(report.transactions, 1);
    assert_eq!(sink.connections(), 3);
}

#[test]
fn test_short_transactions_close_each_connection() {
    let sink = HttpSink::start();
    let config = PipeConfig {
        persistent: false,
        ..short_window()
    };
    let (reader, mut writer) = input_pair();

    let mut engine = engine(config);
    engine.init(Box::new(reader), &sink.url("/upload")).unwrap();
    let server = thread::spawn(move || engine.serve(Duration::from_secs(1), &StopToken::new()));

    writer.write_all(b"one").unwrap();
    assert!(sink.wait_for(1, Duration::from_secs(5)));
    writer.write_all(b"two").unwrap();
    assert!(sink.wait_for(2, Duration::from_secs(5)));
    drop(writer);
    server.join().unwrap().unwrap();

    let requests = sink.acknowledged();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request.field("Connection"), Some("close"));
    }
    assert_eq!(sink.connections(), 2);
}

#[test]
fn test_server_close_forces_reconnect() {
    let sink = HttpSink::with_options(SinkOptions {
        close_after_response: true,
        ..SinkOptions::default()
    });
    let (reader, mut writer) = input_pair();

    let mut engine = engine(short_window());
    engine.init(Box::new(reader), &sink.url("/upload")).unwrap();
    let server = thread::spawn(move || engine.serve(Duration::from_secs(1), &StopToken::new()));

    writer.write_all(b"alpha").unwrap();
    assert!(sink.wait_for(1, Duration::from_secs(5)));
    writer.write_all(b"beta").unwrap();
    assert!(sink.wait_for(2, Duration::from_secs(5)));
    drop(writer);

    let report = server.join().unwrap().unwrap();
    assert_eq!(report.transactions, 2);
    assert_eq!(sink.connections(), 2);
}

#[test]
fn test_rate_ceiling_paces_upload() {
    let sink = HttpSink::start();
    let config = PipeConfig {
        transfer_rate: 4000,
        ..test_config()
    };
    let payload = vec![b'x'; 6000];

    let started = Instant::now();
    pipe_through(config, &sink, &[&payload]).unwrap();
    let elapsed = started.elapsed();

    // one second of credit up front, the remaining 2000 bytes take ~500ms
    assert!(elapsed >= Duration::from_millis(400), "took {:?}", elapsed);
    assert_eq!(sink.acknowledged()[0].body.len(), 6000);
}

#[test]
fn test_idle_heartbeat_on_window_boundary() {
    let sink = HttpSink::start();
    let config = PipeConfig {
        interval_secs: 1,
        idle_limit: 1,
        ..test_config()
    };
    let (reader, writer) = input_pair();

    let mut engine = engine(config);
    engine.init(Box::new(reader), &sink.url("/beat")).unwrap();
    let stop = StopToken::new();
    let token = stop.clone();
    let server = thread::spawn(move || engine.serve(Duration::from_secs(1), &token));

    assert!(sink.wait_for(1, Duration::from_secs(5)));
    stop.stop();
    server.join().unwrap().unwrap();
    drop(writer);

    let beat = &sink.acknowledged()[0];
    assert!(beat.head.starts_with("POST /beat HTTP/1.1\r\n"));
    assert_eq!(beat.field("Content-Length"), Some("0"));
    assert!(beat.body.is_empty());
}

#[test]
fn test_no_heartbeat_when_idle_limit_is_zero() {
    let sink = HttpSink::start();
    let config = PipeConfig {
        interval_secs: 1,
        idle_limit: 0,
        ..test_config()
    };
    let (reader, writer) = input_pair();

    let mut engine = engine(config);
    engine.init(Box::new(reader), &sink.url("/beat")).unwrap();
    let stop = StopToken::new();
    let token = stop.clone();
    let server = thread::spawn(move || engine.serve(Duration::from_secs(1), &token));

    thread::sleep(Duration::from_millis(1500));
    stop.stop();
    let report = server.join().unwrap().unwrap();
    drop(writer);

    assert_eq!(report.transactions, 0);
    assert!(sink.acknowledged().is_empty());
}

#[test]
fn test_stop_token_returns_with_input_open() {
    let sink = HttpSink::start();
    let (reader, _writer) = input_pair();
    let config = PipeConfig {
        idle_limit: 0,
        ..test_config()
    };

    let mut engine = engine(config);
    engine.init(Box::new(reader), &sink.url("/upload")).unwrap();
    let stop = StopToken::new();
    let token = stop.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        token.stop();
    });

    // the stop flag is seen at the next window boundary
    let report = engine.serve(Duration::from_millis(200), &stop).unwrap();
    stopper.join().unwrap();
    assert_eq!(report.transactions, 0);
}
