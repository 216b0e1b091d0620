//! Connection state and the session registry.
//!
//! Each connection tracks its login state, display name, and the two
//! buffers of its data plane. The socket type is a parameter so the
//! protocol layer can be exercised without real sockets.

use crate::messages::Message;
use crate::runtime::buffer::{FlushOutcome, LineFramer, OutboundQueue};
use slab::Slab;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Instant;

/// Login dialog state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the player to type a name.
    AwaitingName,
    /// Name accepted, waiting for the password.
    AwaitingPassword,
    /// Logged in; every line is a command.
    Playing,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    /// Socket, or `None` once closed.
    handle: Option<S>,
    state: ConnState,
    name: String,
    framer: LineFramer,
    outbound: OutboundQueue,
    peer: SocketAddr,
    /// When the connection was marked for closure.
    closing_since: Option<Instant>,
}

impl<S> Connection<S> {
    /// Create a freshly accepted connection awaiting a name.
    pub fn new(handle: S, peer: SocketAddr) -> Self {
        Self {
            handle: Some(handle),
            state: ConnState::AwaitingName,
            name: String::new(),
            framer: LineFramer::new(),
            outbound: OutboundQueue::new(),
            peer,
            closing_since: None,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnState) {
        self.state = state;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Socket still held.
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Open and not on its way out.
    pub fn is_active(&self) -> bool {
        self.is_open() && self.closing_since.is_none()
    }

    /// Active and logged in.
    pub fn is_playing(&self) -> bool {
        self.is_active() && self.state == ConnState::Playing
    }

    /// Mark for closure. The handle is closed once pending output is flushed.
    pub fn mark_closing(&mut self) {
        if self.closing_since.is_none() {
            self.closing_since = Some(Instant::now());
        }
    }

    pub fn closing_since(&self) -> Option<Instant> {
        self.closing_since
    }

    /// Release the socket, returning it so the caller can deregister it.
    pub fn close(&mut self) -> Option<S> {
        self.outbound.clear();
        self.handle.take()
    }

    pub fn handle_mut(&mut self) -> Option<&mut S> {
        self.handle.as_mut()
    }

    /// Queue a message for this connection. Ignored once closed.
    pub fn send(&mut self, message: &Message<'_>) {
        if self.is_open() {
            self.outbound.enqueue(message.to_string());
        }
    }

    pub fn framer_mut(&mut self) -> &mut LineFramer {
        &mut self.framer
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }
}

impl<S: Write> Connection<S> {
    /// Push queued output into the socket.
    pub fn flush(&mut self) -> FlushOutcome {
        match self.handle.as_mut() {
            Some(handle) => self.outbound.flush(handle),
            None => FlushOutcome::Drained,
        }
    }
}

/// Registry of live connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations, plus the
/// world-level queries the protocol needs (find by name, broadcast).
#[derive(Debug)]
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
}

impl<S> ConnectionRegistry<S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<S>) -> Result<usize, Connection<S>> {
        if self.connections.len() >= self.max_connections {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    pub fn get(&self, id: usize) -> Option<&Connection<S>> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Connection<S>)> {
        self.connections.iter_mut()
    }

    /// Snapshot of ids, for loops that mutate the registry as they go.
    pub fn ids(&self) -> Vec<usize> {
        self.connections.iter().map(|(id, _)| id).collect()
    }

    /// Find the Playing connection with exactly this name.
    pub fn find_playing(&self, name: &str) -> Option<usize> {
        self.connections
            .iter()
            .find(|(_, conn)| conn.is_playing() && conn.name == name)
            .map(|(id, _)| id)
    }

    /// Names of every Playing connection other than `except`, in slab order.
    pub fn playing_names_except(&self, except: usize) -> Vec<&str> {
        self.connections
            .iter()
            .filter(|(id, conn)| *id != except && conn.is_playing())
            .map(|(_, conn)| conn.name.as_str())
            .collect()
    }

    /// Queue a message for one connection.
    pub fn send(&mut self, id: usize, message: &Message<'_>) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.send(message);
        }
    }

    /// Queue a message for every Playing connection except `except`.
    pub fn broadcast(&mut self, except: Option<usize>, message: &Message<'_>) -> usize {
        let text = message.to_string();
        let mut sent = 0;
        for (id, conn) in self.connections.iter_mut() {
            if Some(id) != except && conn.is_playing() {
                conn.outbound.enqueue(text.clone());
                sent += 1;
            }
        }
        sent
    }

    /// Remove every connection whose handle is closed.
    pub fn reap(&mut self) -> Vec<(usize, Connection<S>)> {
        let closed: Vec<usize> = self
            .connections
            .iter()
            .filter(|(_, conn)| !conn.is_open())
            .map(|(id, _)| id)
            .collect();

        closed
            .into_iter()
            .map(|id| (id, self.connections.remove(id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn playing(name: &str) -> Connection<Vec<u8>> {
        let mut conn = Connection::new(Vec::new(), peer());
        conn.set_name(name);
        conn.set_state(ConnState::Playing);
        conn
    }

    #[test]
    fn test_connection_lifecycle() {
        let mut conn = Connection::new(Vec::<u8>::new(), peer());
        assert_eq!(conn.state(), ConnState::AwaitingName);
        assert!(conn.name().is_empty());
        assert!(conn.is_active());
        assert!(!conn.is_playing());

        conn.set_name("alice");
        conn.set_state(ConnState::Playing);
        assert!(conn.is_playing());

        conn.mark_closing();
        assert!(conn.is_open());
        assert!(!conn.is_active());
        assert!(!conn.is_playing());

        assert!(conn.close().is_some());
        assert!(!conn.is_open());
        assert!(conn.close().is_none());
    }

    #[test]
    fn test_send_and_flush_through_handle() {
        let mut conn = Connection::new(Vec::new(), peer());
        conn.send(&Message::Banner);
        conn.send(&Message::NamePrompt);
        assert_eq!(conn.outbound().len(), 2);

        assert!(matches!(conn.flush(), FlushOutcome::Drained));
        let written = conn.handle_mut().unwrap().clone();
        let expected = format!("{}{}", Message::Banner, Message::NamePrompt);
        assert_eq!(written, expected.as_bytes());
    }

    #[test]
    fn test_send_after_close_is_dropped() {
        let mut conn = Connection::new(Vec::<u8>::new(), peer());
        conn.close();
        conn.send(&Message::Huh);
        assert!(conn.outbound().is_empty());
    }

    #[test]
    fn test_closing_since_is_set_once() {
        let mut conn = Connection::new(Vec::<u8>::new(), peer());
        assert!(conn.closing_since().is_none());

        let before = Instant::now();
        conn.mark_closing();
        let since = conn.closing_since().unwrap();
        assert!(since >= before);
        assert!(since <= Instant::now());

        // Marking again keeps the original deadline base
        std::thread::sleep(std::time::Duration::from_millis(5));
        conn.mark_closing();
        assert_eq!(conn.closing_since(), Some(since));
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new(2);

        let id1 = registry.insert(playing("alice")).unwrap();
        let id2 = registry.insert(playing("bob")).unwrap();

        // At capacity
        assert!(registry.insert(playing("carol")).is_err());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.capacity(), 2);
        assert_eq!(registry.get(id1).unwrap().name(), "alice");
        assert_eq!(registry.find_playing("bob"), Some(id2));
        assert_eq!(registry.find_playing("Bob"), None);

        registry.remove(id1);
        assert!(registry.get(id1).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_find_playing_skips_closing_and_logging_in() {
        let mut registry = ConnectionRegistry::new(8);
        let leaving = registry.insert(playing("alice")).unwrap();
        registry.get_mut(leaving).unwrap().mark_closing();

        let mut pending = Connection::new(Vec::new(), peer());
        pending.set_name("bob");
        pending.set_state(ConnState::AwaitingPassword);
        registry.insert(pending).unwrap();

        assert_eq!(registry.find_playing("alice"), None);
        assert_eq!(registry.find_playing("bob"), None);
    }

    #[test]
    fn test_broadcast_excludes_sender_and_non_playing() {
        let mut registry = ConnectionRegistry::new(8);
        let a = registry.insert(playing("alice")).unwrap();
        let b = registry.insert(playing("bob")).unwrap();
        let c = registry.insert(Connection::new(Vec::new(), peer())).unwrap();

        let sent = registry.broadcast(Some(a), &Message::Tick);
        assert_eq!(sent, 1);
        assert!(registry.get(a).unwrap().outbound().is_empty());
        assert_eq!(registry.get(b).unwrap().outbound().len(), 1);
        assert!(registry.get(c).unwrap().outbound().is_empty());

        assert_eq!(registry.broadcast(None, &Message::Tick), 2);
    }

    #[test]
    fn test_playing_names_except() {
        let mut registry = ConnectionRegistry::new(8);
        let a = registry.insert(playing("alice")).unwrap();
        registry.insert(playing("bob")).unwrap();
        registry.insert(playing("carol")).unwrap();

        assert_eq!(registry.playing_names_except(a), vec!["bob", "carol"]);
    }

    #[test]
    fn test_reap_removes_only_closed() {
        let mut registry = ConnectionRegistry::new(8);
        let a = registry.insert(playing("alice")).unwrap();
        let b = registry.insert(playing("bob")).unwrap();
        let c = registry.insert(playing("carol")).unwrap();

        registry.get_mut(a).unwrap().close();
        registry.get_mut(c).unwrap().close();

        let reaped: Vec<usize> = registry.reap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(reaped, vec![a, c]);
        assert_eq!(registry.ids(), vec![b]);
        assert!(registry.reap().is_empty());
    }
}
