//! shmrpc-server - Unix socket front end for the serving layer
//!
//! Usage:
//!   shmrpc-server [--config server.json] [--socket /tmp/shmrpc.sock] [--allow-ingest]
//!
//! Protocol:
//!   Request:  [4-byte length BE] [MessagePack JSON-RPC request]
//!   Response: [4-byte length BE] [MessagePack JSON-RPC response]
//!
//! `publish_epoch` requests are handed to a single ingest thread so that
//! epochs are installed in the order they arrive; every other method is
//! served on the client's own thread.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};
use tracing_subscriber::EnvFilter;

use shmrpc::metrics::Metrics;
use shmrpc::protocol::{self, RpcRequest, RpcResponse};
use shmrpc::{AlgorithmRegistry, Dispatcher, ServerConfig};

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Parser, Debug)]
#[clap(name = "shmrpc-server", version)]
struct Args {
    /// JSON configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Unix socket path (overrides the config file)
    #[clap(long)]
    socket: Option<String>,

    /// Idle seconds before a session is dropped
    #[clap(long)]
    session_timeout: Option<u64>,

    /// Accept publish_epoch requests
    #[clap(long)]
    allow_ingest: bool,

    /// Collect per-method request metrics
    #[clap(long)]
    metrics: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(socket) = self.socket {
            config.socket_path = socket;
        }
        if let Some(secs) = self.session_timeout {
            config.session_timeout_secs = secs;
        }
        config.allow_ingest |= self.allow_ingest;
        config.metrics |= self.metrics;
        Ok(config)
    }
}

/// A publication waiting for the ingest thread.
struct IngestJob {
    request: RpcRequest,
    reply: Sender<RpcResponse>,
}

fn ingest_loop(dispatcher: Arc<Dispatcher>, jobs: Receiver<IngestJob>) {
    for job in jobs {
        let response = dispatcher.handle(&job.request);
        // Client may have gone away
        let _ = job.reply.send(response);
    }
    tracing::debug!("ingest channel closed");
}

fn sweep_loop(dispatcher: Arc<Dispatcher>) {
    let interval = dispatcher.config().sweep_interval();
    loop {
        thread::sleep(interval);
        let expired = dispatcher.sweep(Instant::now());
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired idle sessions");
        }
    }
}

fn handle_client(mut stream: UnixStream, dispatcher: Arc<Dispatcher>, ingest: Sender<IngestJob>, client_id: usize) {
    tracing::info!(client = client_id, "client connected");

    loop {
        let frame = match protocol::read_message(&mut stream) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!(client = client_id, "client disconnected");
                break;
            }
            Err(e) => {
                tracing::warn!(client = client_id, "read error: {}", e);
                break;
            }
        };

        let response = match protocol::decode_request(&frame) {
            Ok(request) if request.method == "publish_epoch" => {
                let (reply, wait) = crossbeam_channel::bounded(1);
                if ingest.send(IngestJob { request, reply }).is_err() {
                    tracing::error!("ingest thread is gone");
                    break;
                }
                match wait.recv() {
                    Ok(response) => response,
                    Err(_) => break,
                }
            }
            Ok(request) => dispatcher.handle(&request),
            Err(e) => RpcResponse::parse_error(e.to_string()),
        };

        let bytes = match protocol::encode(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(client = client_id, "serialize error: {}", e);
                continue;
            }
        };
        if let Err(e) = protocol::write_message(&mut stream, &bytes) {
            tracing::warn!(client = client_id, "write error: {}", e);
            break;
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Args::parse().into_config()?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), ?config, "starting shmrpc-server");

    let metrics = config.metrics.then(|| Arc::new(Metrics::new(config.slow_request_ms)));
    let socket_path = config.socket_path.clone();
    let dispatcher = Arc::new(Dispatcher::new(config, Arc::new(AlgorithmRegistry::new()), metrics));

    // Remove stale socket file
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path).with_context(|| format!("binding {}", socket_path))?;
    tracing::info!(socket = %socket_path, "listening");

    let (ingest_tx, ingest_rx) = crossbeam_channel::unbounded();
    {
        let dispatcher = Arc::clone(&dispatcher);
        thread::Builder::new()
            .name("ingest".into())
            .spawn(move || ingest_loop(dispatcher, ingest_rx))?;
    }
    {
        let dispatcher = Arc::clone(&dispatcher);
        thread::Builder::new()
            .name("sweeper".into())
            .spawn(move || sweep_loop(dispatcher))?;
    }

    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("registering signal handlers")?;
    let socket_for_signal = socket_path.clone();
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::info!(signal = sig, "shutting down");
            let _ = std::fs::remove_file(&socket_for_signal);
            std::process::exit(0);
        }
    });

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst);
                let dispatcher = Arc::clone(&dispatcher);
                let ingest = ingest_tx.clone();
                thread::spawn(move || handle_client(stream, dispatcher, ingest, client_id));
            }
            Err(e) => tracing::warn!("accept error: {}", e),
        }
    }
    Ok(())
}
