//! Login dialog and command routing.
//!
//! Each complete input line is interpreted against the connection's state:
//!
//! ```text
//! AwaitingName --name--> AwaitingPassword --password--> Playing
//!      ^                        |
//!      +---- name taken --------+
//! ```
//!
//! Playing connections hand every line to the command dispatcher. Closure
//! can happen from any state.

use crate::auth::CredentialVerifier;
use crate::commands::{self, Command};
use crate::messages::Message;
use crate::runtime::connection::{ConnState, ConnectionRegistry};
use tracing::{error, info};

/// Result of processing one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// Keep reading lines from this connection.
    Continue,
    /// Connection is closing or gone; stop feeding it input.
    Close,
}

/// Process one trimmed line from connection `id`.
pub fn process_line<S, V>(
    registry: &mut ConnectionRegistry<S>,
    id: usize,
    line: &str,
    verifier: &V,
) -> ProcessResult
where
    V: CredentialVerifier + ?Sized,
{
    let state = match registry.get(id) {
        Some(conn) if conn.is_active() => conn.state(),
        _ => return ProcessResult::Close,
    };

    match state {
        ConnState::AwaitingName => process_name(registry, id, line),
        ConnState::AwaitingPassword => process_password(registry, id, line, verifier),
        ConnState::Playing => commands::execute(registry, id, Command::parse(line)),
    }

    match registry.get(id) {
        Some(conn) if conn.is_active() => ProcessResult::Continue,
        _ => ProcessResult::Close,
    }
}

/// Greet a freshly accepted connection.
pub fn greet<S>(registry: &mut ConnectionRegistry<S>, id: usize) {
    registry.send(id, &Message::Banner);
    registry.send(id, &Message::NamePrompt);
}

fn process_name<S>(registry: &mut ConnectionRegistry<S>, id: usize, line: &str) {
    if line.is_empty() {
        registry.send(id, &Message::NamePrompt);
        return;
    }

    if registry.find_playing(line).is_some() {
        registry.send(id, &Message::AlreadyConnected { name: line });
        registry.send(id, &Message::NamePrompt);
        return;
    }

    if let Some(conn) = registry.get_mut(id) {
        conn.set_name(line);
        conn.set_state(ConnState::AwaitingPassword);
        conn.send(&Message::PasswordPrompt);
    }
}

fn process_password<S, V>(registry: &mut ConnectionRegistry<S>, id: usize, line: &str, verifier: &V)
where
    V: CredentialVerifier + ?Sized,
{
    if line.is_empty() {
        registry.send(id, &Message::PasswordPrompt);
        return;
    }

    let Some(conn) = registry.get(id) else {
        return;
    };
    let name = conn.name().to_string();
    let peer = conn.peer();

    if name.is_empty() {
        error!(conn_id = id, "Password stage reached without a name");
        reset_to_name(registry, id);
        return;
    }

    if !verifier.verify(&name, line) {
        registry.send(id, &Message::PasswordIncorrect);
        registry.send(id, &Message::PasswordPrompt);
        return;
    }

    // Someone may have logged in under this name while we were typing
    if registry.find_playing(&name).is_some() {
        registry.send(id, &Message::AlreadyConnected { name: &name });
        reset_to_name(registry, id);
        return;
    }

    if let Some(conn) = registry.get_mut(id) {
        conn.set_state(ConnState::Playing);
        conn.send(&Message::Welcome { name: &name });
    }
    commands::handler::look(registry, id);
    registry.broadcast(Some(id), &Message::Joined { name: &name });
    info!(player = %name, peer = %peer, "Player has joined the game");
}

fn reset_to_name<S>(registry: &mut ConnectionRegistry<S>, id: usize) {
    if let Some(conn) = registry.get_mut(id) {
        conn.set_name("");
        conn.set_state(ConnState::AwaitingName);
        conn.send(&Message::NamePrompt);
    }
}
