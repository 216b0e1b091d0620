//! World actions behind each player command.

use crate::commands::parser::Command;
use crate::messages::Message;
use crate::runtime::connection::{ConnState, ConnectionRegistry};
use tracing::{debug, info};

/// Run a parsed command on behalf of connection `id`.
pub fn execute<S>(registry: &mut ConnectionRegistry<S>, id: usize, command: Command<'_>) {
    match command {
        Command::Quit => quit(registry, id),
        Command::Look => look(registry, id),
        Command::Say { text } => say(registry, id, text),
        Command::Tell { target, text } => tell(registry, id, target, text),
        Command::Unknown { verb } => {
            debug!(conn_id = id, verb, "Unrecognized command");
            registry.send(id, &Message::Huh);
        }
    }
}

/// Leave the game. Works from any state; only Playing connections say goodbye.
pub fn quit<S>(registry: &mut ConnectionRegistry<S>, id: usize) {
    let Some(conn) = registry.get_mut(id) else {
        return;
    };

    if conn.is_playing() {
        let name = conn.name().to_string();
        conn.send(&Message::Farewell);
        conn.mark_closing();
        info!(player = %name, "Player has left the game");
        registry.broadcast(Some(id), &Message::Left { name: &name });
    } else {
        conn.mark_closing();
    }
}

/// Describe the room and list every other player in it.
pub fn look<S>(registry: &mut ConnectionRegistry<S>, id: usize) {
    let others: Vec<String> = registry
        .playing_names_except(id)
        .into_iter()
        .map(str::to_owned)
        .collect();

    registry.send(id, &Message::RoomDescription);
    if !others.is_empty() {
        let names: Vec<&str> = others.iter().map(String::as_str).collect();
        registry.send(id, &Message::AlsoHere { names: &names });
    }
}

fn say<S>(registry: &mut ConnectionRegistry<S>, id: usize, text: &str) {
    if text.is_empty() {
        registry.send(id, &Message::SayWhat);
        return;
    }

    let Some(name) = speaker_name(registry, id) else {
        return;
    };
    registry.send(id, &Message::YouSay { text });
    registry.broadcast(Some(id), &Message::Says { name: &name, text });
}

fn tell<S>(registry: &mut ConnectionRegistry<S>, id: usize, target: &str, text: &str) {
    if target.is_empty() {
        registry.send(id, &Message::TellWhom);
        return;
    }
    if text.is_empty() {
        registry.send(id, &Message::TellWhat { name: target });
        return;
    }

    let Some(target_id) = registry.find_playing(target) else {
        registry.send(id, &Message::NotConnected { name: target });
        return;
    };
    if target_id == id {
        registry.send(id, &Message::NotSelf);
        return;
    }

    let Some(name) = speaker_name(registry, id) else {
        return;
    };
    registry.send(id, &Message::YouTell { name: target, text });
    registry.send(target_id, &Message::Tells { name: &name, text });
}

fn speaker_name<S>(registry: &ConnectionRegistry<S>, id: usize) -> Option<String> {
    registry
        .get(id)
        .filter(|conn| conn.state() == ConnState::Playing)
        .map(|conn| conn.name().to_string())
}
