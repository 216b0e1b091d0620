//! Single-threaded networking runtime.
//!
//! Readiness-based I/O through mio. Shared abstractions:
//! - `LineFramer` / `OutboundQueue`: per-connection byte buffers
//! - `Connection` / `ConnectionRegistry`: session state and lookup
//! - `protocol`: login dialog and command routing
//! - `TickClock`: periodic world message timing

pub mod buffer;
pub mod clock;
pub mod connection;
mod mio;
pub mod protocol;

use self::mio::Reactor;
use crate::auth::NameIsPassword;
use crate::config::Config;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

/// Failures that stop the server from starting or keep it from running.
#[derive(Debug)]
pub enum SetupError {
    /// Could not install a termination signal handler.
    Signal(io::Error),
    /// Could not create, configure or bind the listening socket.
    Bind(SocketAddr, io::Error),
    /// Could not create the poller or register the listener.
    Poll(io::Error),
    /// The event loop itself failed.
    Runtime(io::Error),
}

impl std::fmt::Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupError::Signal(e) => write!(f, "Failed to install signal handler: {e}"),
            SetupError::Bind(addr, e) => write!(f, "Failed to listen on {addr}: {e}"),
            SetupError::Poll(e) => write!(f, "Failed to set up poller: {e}"),
            SetupError::Runtime(e) => write!(f, "Event loop failed: {e}"),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Signal(e)
            | SetupError::Bind(_, e)
            | SetupError::Poll(e)
            | SetupError::Runtime(e) => Some(e),
        }
    }
}

/// Run the server until a termination signal arrives.
pub fn run(config: Config) -> Result<(), SetupError> {
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM, SIGHUP] {
        signal_hook::flag::register(signal, Arc::clone(&stop)).map_err(SetupError::Signal)?;
    }

    let listener = bind_listener(config.listen, config.backlog)
        .map_err(|e| SetupError::Bind(config.listen, e))?;
    let reactor =
        Reactor::new(listener, &config, NameIsPassword, stop).map_err(SetupError::Poll)?;

    info!(
        addr = %config.listen,
        max_connections = config.max_connections,
        tick_interval_secs = config.tick_interval.as_secs(),
        "Accepting connections"
    );

    reactor.run().map_err(SetupError::Runtime)
}

/// Create a non-blocking TCP listener.
pub(crate) fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
