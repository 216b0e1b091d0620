//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! ## Tick Structure
//!
//! Every pass through the loop is one tick:
//!
//! 1. Periodic world message, if the interval has elapsed
//! 2. Close drained quitters, then reap closed connections
//! 3. Re-register interest (read for everyone, write for non-empty queues)
//! 4. Poll with a bounded timeout
//! 5. Accept all pending connections
//! 6. Error, read and write handling per ready connection
//!
//! Interest is re-armed every tick, so readiness behaves like a level
//! triggered `select` even though mio registrations are edge triggered.

use crate::auth::CredentialVerifier;
use crate::commands;
use crate::config::Config;
use crate::messages::Message;
use crate::runtime::buffer::FlushOutcome;
use crate::runtime::clock::TickClock;
use crate::runtime::connection::{Connection, ConnectionRegistry};
use crate::runtime::protocol::{self, ProcessResult};
use chrono::Utc;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Max events handled per poll.
const EVENTS_CAPACITY: usize = 1024;

/// Reads per connection per tick, so one busy client cannot starve the rest.
const MAX_READS_PER_TICK: usize = 64;

/// Readiness reported for one connection in the current tick.
#[derive(Debug, Clone, Copy)]
struct Readiness {
    conn_id: usize,
    readable: bool,
    writable: bool,
    error: bool,
}

/// Single-threaded server loop owning the listener and every connection.
pub struct Reactor<V> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: ConnectionRegistry<TcpStream>,
    clock: TickClock,
    verifier: V,
    stop: Arc<AtomicBool>,
    read_buf: Vec<u8>,
    poll_timeout: Duration,
    linger: Duration,
    shutdown_grace: Duration,
}

impl<V: CredentialVerifier> Reactor<V> {
    /// Wrap a bound, non-blocking listener.
    pub fn new(
        listener: std::net::TcpListener,
        config: &Config,
        verifier: V,
        stop: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let interval = chrono::Duration::from_std(config.tick_interval)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener,
            connections: ConnectionRegistry::new(config.max_connections),
            clock: TickClock::new(Utc::now(), interval),
            verifier,
            stop,
            read_buf: vec![0u8; config.read_chunk],
            poll_timeout: config.poll_timeout,
            linger: config.linger,
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Run ticks until the stop flag is raised, then shut down cleanly.
    ///
    /// Consumes the reactor; the listener closes when this returns.
    pub fn run(mut self) -> io::Result<()> {
        while !self.stop.load(Ordering::Relaxed) {
            self.tick()?;
        }

        info!(
            connections = self.connections.len(),
            "Stop requested, shutting down"
        );
        self.shutdown();
        Ok(())
    }

    fn tick(&mut self) -> io::Result<()> {
        if self.clock.due(Utc::now()) {
            let players = self.connections.broadcast(None, &Message::Tick);
            debug!(players, at = %self.clock.last(), "Periodic tick");
        }

        self.settle_closing();
        self.reap();
        self.register_interest();

        match self.poll.poll(&mut self.events, Some(self.poll_timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        if self.events.is_empty() {
            return Ok(());
        }

        let mut accept = false;
        let mut ready = Vec::new();
        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => accept = true,
                Token(conn_id) => ready.push(Readiness {
                    conn_id,
                    readable: event.is_readable() || event.is_read_closed(),
                    writable: event.is_writable(),
                    error: event.is_error(),
                }),
            }
        }

        // New connections first, then per-connection work
        if accept {
            self.accept_connections();
        }

        for r in ready {
            if r.error {
                self.handle_error(r.conn_id);
            }
            if r.readable {
                self.handle_readable(r.conn_id);
            }
            if r.writable {
                self.handle_writable(r.conn_id);
            }
        }

        self.settle_closing();
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let conn_id = match self.connections.insert(Connection::new(stream, peer)) {
                        Ok(id) => id,
                        Err(_) => {
                            warn!(
                                peer = %peer,
                                max_connections = self.connections.capacity(),
                                "Connection limit reached, rejecting"
                            );
                            continue;
                        }
                    };

                    let registered = match self
                        .connections
                        .get_mut(conn_id)
                        .and_then(Connection::handle_mut)
                    {
                        Some(stream) => {
                            self.poll
                                .registry()
                                .register(stream, Token(conn_id), Interest::READABLE)
                        }
                        None => Ok(()),
                    };
                    if let Err(e) = registered {
                        warn!(peer = %peer, error = %e, "Failed to register connection");
                        self.connections.remove(conn_id);
                        continue;
                    }

                    protocol::greet(&mut self.connections, conn_id);
                    info!(conn_id, peer = %peer, "New player accepted");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn handle_error(&mut self, conn_id: usize) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        let peer = conn.peer();
        let pending = conn.handle_mut().map(|stream| stream.take_error());
        match pending {
            Some(Ok(Some(e))) => warn!(conn_id, peer = %peer, error = %e, "Exception on socket"),
            _ => warn!(conn_id, peer = %peer, "Exception on socket"),
        }
    }

    fn handle_readable(&mut self, conn_id: usize) {
        let mut eof = false;
        let mut failure = None;

        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        if !conn.is_active() {
            return;
        }

        for _ in 0..MAX_READS_PER_TICK {
            let Some(stream) = conn.handle_mut() else {
                break;
            };
            match stream.read(&mut self.read_buf) {
                Ok(n) => {
                    if conn.framer_mut().feed(&self.read_buf[..n]).is_closed() {
                        eof = true;
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Lines that arrived before a close still count
        while let Some(line) = self
            .connections
            .get_mut(conn_id)
            .and_then(|conn| conn.framer_mut().next_line())
        {
            let result = protocol::process_line(&mut self.connections, conn_id, &line, &self.verifier);
            if result == ProcessResult::Close {
                break;
            }
        }

        if let Some(e) = failure {
            warn!(conn_id, error = %e, "Read from player failed");
            commands::quit(&mut self.connections, conn_id);
            self.close_handle(conn_id);
        } else if eof {
            let unread = self
                .connections
                .get_mut(conn_id)
                .map_or(0, |conn| conn.framer_mut().pending());
            debug!(conn_id, unread, "Connection closed by peer");
            commands::quit(&mut self.connections, conn_id);
        }
    }

    fn handle_writable(&mut self, conn_id: usize) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        if let FlushOutcome::Failed(e) = conn.flush() {
            warn!(conn_id, peer = %conn.peer(), error = %e, "Send to player failed");
            commands::quit(&mut self.connections, conn_id);
            self.close_handle(conn_id);
        }
    }

    /// Close connections marked for closure once their output is out,
    /// the write fails, or they have lingered too long.
    fn settle_closing(&mut self) {
        let now = Instant::now();
        let mut done = Vec::new();

        for (conn_id, conn) in self.connections.iter_mut() {
            let Some(since) = conn.closing_since() else {
                continue;
            };
            if !conn.is_open() {
                continue;
            }
            match conn.flush() {
                FlushOutcome::Drained => done.push(conn_id),
                FlushOutcome::Pending => {
                    if now.duration_since(since) > self.linger {
                        debug!(
                            conn_id,
                            chunks = conn.outbound().len(),
                            unsent = conn.outbound().pending_bytes(),
                            "Linger expired, dropping output"
                        );
                        done.push(conn_id);
                    }
                }
                FlushOutcome::Failed(e) => {
                    debug!(conn_id, error = %e, "Final flush failed");
                    done.push(conn_id);
                }
            }
        }

        for conn_id in done {
            self.close_handle(conn_id);
        }
    }

    /// Deregister and drop the socket. The entry is reaped next tick.
    fn close_handle(&mut self, conn_id: usize) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        if let Some(mut stream) = conn.close() {
            if let Err(e) = self.poll.registry().deregister(&mut stream) {
                debug!(conn_id, error = %e, "Deregister failed");
            }
        }
    }

    fn reap(&mut self) {
        for (conn_id, conn) in self.connections.reap() {
            debug!(conn_id, peer = %conn.peer(), "Released connection");
        }
    }

    /// Arm read interest for every live connection and write interest
    /// for those with queued output.
    fn register_interest(&mut self) {
        let registry = self.poll.registry();

        if let Err(e) = registry.reregister(&mut self.listener, LISTENER_TOKEN, Interest::READABLE) {
            warn!(error = %e, "Failed to re-arm listener");
        }

        let mut failed = Vec::new();
        for (conn_id, conn) in self.connections.iter_mut() {
            let closing = conn.closing_since().is_some();
            let wants_write = !conn.outbound().is_empty();
            let interest = match (closing, wants_write) {
                (false, false) => Interest::READABLE,
                (false, true) => Interest::READABLE | Interest::WRITABLE,
                (true, _) => Interest::WRITABLE,
            };
            if let Some(stream) = conn.handle_mut() {
                if let Err(e) = registry.reregister(stream, Token(conn_id), interest) {
                    warn!(conn_id, error = %e, "Failed to re-arm connection");
                    failed.push(conn_id);
                }
            }
        }

        for conn_id in failed {
            commands::quit(&mut self.connections, conn_id);
            self.close_handle(conn_id);
        }
    }

    /// Tell everyone the game is closing, give the message a chance to
    /// drain, then release every connection.
    fn shutdown(&mut self) {
        let players = self.connections.broadcast(None, &Message::Shutdown);
        info!(players, "Game closed by system operator");

        let deadline = Instant::now() + self.shutdown_grace;
        while !self.connections.is_empty() {
            let registry = self.poll.registry();
            let mut pending = false;
            let mut failed = Vec::new();

            for (conn_id, conn) in self.connections.iter_mut() {
                match conn.flush() {
                    FlushOutcome::Drained => {}
                    FlushOutcome::Pending => {
                        pending = true;
                        if let Some(stream) = conn.handle_mut() {
                            if let Err(e) =
                                registry.reregister(stream, Token(conn_id), Interest::WRITABLE)
                            {
                                debug!(conn_id, error = %e, "Re-arm failed during shutdown");
                            }
                        }
                    }
                    FlushOutcome::Failed(e) => {
                        debug!(conn_id, error = %e, "Final flush failed");
                        failed.push(conn_id);
                    }
                }
            }

            for conn_id in failed {
                self.close_handle(conn_id);
            }

            let now = Instant::now();
            if !pending || now >= deadline {
                break;
            }

            let wait = (deadline - now).min(self.poll_timeout);
            if let Err(e) = self.poll.poll(&mut self.events, Some(wait)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    warn!(error = %e, "Poll failed during shutdown");
                    break;
                }
            }
        }

        for conn_id in self.connections.ids() {
            self.close_handle(conn_id);
        }
        self.reap();

        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            debug!(error = %e, "Deregister listener failed");
        }
        info!("Closing all comms connections");
    }
}
