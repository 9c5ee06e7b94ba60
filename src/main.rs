use evloop::config::{
    DEFAULT_EVENTS_CAPACITY, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_READ_CHUNK, DEFAULT_WORKERS,
};
use evloop::{Backend, EventLoopBuilder, PoolConfig, PoolServer, Transform, TransformHandler};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::AsRawFd;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// TCP echo servers built on select, poll and epoll.
#[derive(Debug, Parser)]
#[command(name = "evloop", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve clients from a single-threaded event loop (default).
    Reactor(ReactorArgs),

    /// Serve clients from a pool of blocking worker threads.
    Pool(PoolArgs),

    /// Send lines from stdin to a server and print its replies.
    Client(ClientArgs),
}

#[derive(Debug, Args)]
struct ReactorArgs {
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// select, poll, epoll or epoll-edge.
    #[arg(long, default_value_t = Backend::platform_default())]
    backend: Backend,

    /// echo or rot13.
    #[arg(long, default_value_t = Transform::Rot13)]
    transform: Transform,

    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Events collected per wait.
    #[arg(long, default_value_t = DEFAULT_EVENTS_CAPACITY)]
    events: usize,

    #[arg(long, default_value_t = DEFAULT_READ_CHUNK)]
    read_chunk: usize,
}

impl Default for ReactorArgs {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            backend: Backend::platform_default(),
            transform: Transform::Rot13,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            events: DEFAULT_EVENTS_CAPACITY,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

#[derive(Debug, Args)]
struct PoolArgs {
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// echo or rot13.
    #[arg(long, default_value_t = Transform::Echo)]
    transform: Transform,

    #[arg(long, default_value_t = DEFAULT_READ_CHUNK)]
    read_chunk: usize,
}

#[derive(Debug, Args)]
struct ClientArgs {
    /// Server host name or IP address.
    address: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None => run_reactor(ReactorArgs::default()),
        Some(Command::Reactor(args)) => run_reactor(args),
        Some(Command::Pool(args)) => run_pool(args),
        Some(Command::Client(args)) => run_client(args),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn run_reactor(args: ReactorArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.max_connections > 0, "--max-connections must be > 0");
    anyhow::ensure!(args.events > 0, "--events must be > 0");
    anyhow::ensure!(args.read_chunk > 0, "--read-chunk must be > 0");

    let mut event_loop = EventLoopBuilder::new()
        .backend(args.backend)
        .max_connections(args.max_connections)
        .events_capacity(args.events)
        .read_chunk(args.read_chunk)
        .build(TransformHandler::new(args.transform))
        .with_context(|| format!("failed to create the {} event loop", args.backend))?;

    let addr = format!("0.0.0.0:{}", args.port);
    event_loop
        .bind(&addr)
        .with_context(|| format!("failed to start the reactor on {addr}"))?;

    info!(transform = %args.transform, "reactor ready");
    event_loop.run().context("event loop failed")
}

fn run_pool(args: PoolArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.workers > 0, "--workers must be > 0");
    anyhow::ensure!(args.queue_capacity > 0, "--queue-capacity must be > 0");
    anyhow::ensure!(args.read_chunk > 0, "--read-chunk must be > 0");

    let config = PoolConfig {
        workers: args.workers,
        queue_capacity: args.queue_capacity,
        transform: args.transform,
        read_chunk: args.read_chunk,
    };

    let addr = format!("0.0.0.0:{}", args.port);
    let server = PoolServer::bind(&addr, config)
        .with_context(|| format!("failed to start the worker pool on {addr}"))?;

    server.run().context("worker pool server failed")
}

fn run_client(args: ClientArgs) -> anyhow::Result<()> {
    let addr: SocketAddr = (args.address.as_str(), args.port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {}", args.address))?
        .next()
        .with_context(|| format!("no address found for {}", args.address))?;

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();

    evloop::client::run(addr, stdin.as_raw_fd(), &mut stdout)
        .with_context(|| format!("client session with {addr} failed"))
}
