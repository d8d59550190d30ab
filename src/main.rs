//! netpipe - pipe stdin to an HTTP endpoint
//!
//! ```text
//! some-producer | netpipe -d http://collector:8080/upload -r 100k -c 6
//! ```
//!
//! Settings come from an optional TOML file (`--config`), then flags.
//! SIGINT, SIGTERM and SIGQUIT stop the engine after its current
//! iteration.

use clap::Parser;
use netpipe::config::{parse_interval, parse_rate, parse_size};
use netpipe::header::FIELD_CLIENT_ID;
use netpipe::{identity, HeaderStrategy, PipeConfig, PostHeader, StopToken, StreamingEngine};
use std::fs::File;
use std::io;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set from the signal handler
static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

#[derive(Parser, Debug)]
#[command(
    name = "netpipe",
    version,
    about = "Stream stdin to an HTTP endpoint as paced POST transactions",
    disable_version_flag = true
)]
struct Args {
    /// Verbose output
    #[arg(short = 'V')]
    verbose: bool,

    /// Print version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Close the connection after every transaction
    #[arg(short = 'S')]
    short_transaction: bool,

    /// Destination URL, http://host[:port]/path
    #[arg(short = 'd', value_name = "URL")]
    destination: Option<String>,

    /// zlib compression level, 0 disables
    #[arg(short = 'c', value_name = "LEVEL")]
    zip_level: Option<u32>,

    /// Buffer size, [0-9]+[kKmM]
    #[arg(short = 's', value_name = "SIZE", value_parser = parse_size)]
    buffer_size: Option<usize>,

    /// Transfer rate in bits/s, [0-9]+[kKmM]; 0 is unlimited
    #[arg(short = 'r', value_name = "RATE", value_parser = parse_rate)]
    rate: Option<u64>,

    /// Connect retries per cycle
    #[arg(short = 'n', value_name = "COUNT")]
    connect_retry: Option<u32>,

    /// Transfer window, [0-9]+[sSmMhH]
    #[arg(short = 'i', value_name = "INTERVAL", value_parser = parse_interval)]
    interval: Option<u64>,

    /// Transfers per window while idle
    #[arg(short = 'l', value_name = "COUNT")]
    idle_limit: Option<u32>,

    /// Transfers per window while busy
    #[arg(short = 'L', value_name = "COUNT")]
    busy_limit: Option<u32>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Args {
    /// Flags override file values
    fn apply(&self, config: &mut PipeConfig) {
        if self.verbose {
            config.verbose = true;
        }
        if self.short_transaction {
            config.persistent = false;
        }
        if let Some(d) = &self.destination {
            config.destination = d.clone();
        }
        if let Some(v) = self.zip_level {
            config.zip_level = v;
        }
        if let Some(v) = self.buffer_size {
            config.buffer_size = v;
        }
        if let Some(v) = self.rate {
            config.transfer_rate = v;
        }
        if let Some(v) = self.connect_retry {
            config.connect_retry = v;
        }
        if let Some(v) = self.interval {
            config.interval_secs = v;
        }
        if let Some(v) = self.idle_limit {
            config.idle_limit = v;
        }
        if let Some(v) = self.busy_limit {
            config.busy_limit = v;
        }
    }
}

fn install_signal_handlers() {
    // SAFETY: the handler only stores to an atomic, which is
    // async-signal-safe; SIG_IGN for SIGPIPE turns broken-pipe writes into
    // EPIPE errors the engine already handles.
    unsafe {
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGQUIT, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// File values, then flags on top
fn load_config(args: &Args) -> netpipe::Result<PipeConfig> {
    let mut config = match &args.config {
        Some(path) => PipeConfig::from_file(path)?,
        None => PipeConfig::default(),
    };
    args.apply(&mut config);
    Ok(config)
}

fn run(config: PipeConfig) -> netpipe::Result<()> {
    if config.destination.is_empty() {
        return Err(netpipe::Error::Config(
            "missing destination, expect an URL".into(),
        ));
    }
    config.validate()?;

    log::debug!("{:#?}", config);

    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(identity::mac_address);
    let mut header = PostHeader::new();
    header.set_field(FIELD_CLIENT_ID, Some(&client_id))?;

    let destination = config.destination.clone();
    let interval = config.interval();
    // unbuffered: bytes held in a userspace buffer are invisible to poll(2)
    let input = File::from(io::stdin().as_fd().try_clone_to_owned()?);
    let mut engine = StreamingEngine::new(config, Box::new(header));
    engine.init(Box::new(input), &destination)?;

    let stop = StopToken::from_static(&STOP);
    let report = engine.serve(interval, &stop)?;
    log::info!(
        "{} transactions, {} bytes sent, {} connection attempts",
        report.transactions,
        report.bytes_sent,
        report.connect_attempts
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = load_config(&args);

    let verbose = match &config {
        Ok(config) => config.verbose,
        Err(_) => args.verbose,
    };
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    log::info!("netpipe v{} starting...", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        log::info!("Using config: {}", path.display());
    }
    install_signal_handlers();

    match config.and_then(run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
