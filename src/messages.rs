//! Server-to-client message catalogue.
//!
//! Every piece of text the server sends is one of these occasions. Rendering
//! goes through `Display`, so formatting can be tested without any socket.

use std::fmt;

/// Server version shown in the banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One outbound message occasion with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message<'a> {
    Banner,
    NamePrompt,
    AlreadyConnected { name: &'a str },
    PasswordPrompt,
    PasswordIncorrect,
    Welcome { name: &'a str },
    RoomDescription,
    AlsoHere { names: &'a [&'a str] },
    SayWhat,
    YouSay { text: &'a str },
    Says { name: &'a str, text: &'a str },
    TellWhom,
    TellWhat { name: &'a str },
    NotSelf,
    YouTell { name: &'a str, text: &'a str },
    Tells { name: &'a str, text: &'a str },
    NotConnected { name: &'a str },
    Huh,
    Tick,
    Shutdown,
    Farewell,
    Joined { name: &'a str },
    Left { name: &'a str },
}

impl fmt::Display for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Banner => write!(f, "\nWelcome to the Tiny MUD Server version {VERSION}\n"),
            Message::NamePrompt => f.write_str("Enter your name ...  "),
            Message::AlreadyConnected { name } => writeln!(f, "{name} is already connected."),
            Message::PasswordPrompt => f.write_str("Enter your password ... "),
            Message::PasswordIncorrect => f.write_str("That password is incorrect.\n"),
            Message::Welcome { name } => write!(f, "Welcome back, {name}!\n\n"),
            Message::RoomDescription => {
                f.write_str("You are standing in a large, sombre room, with no exits.\n")
            }
            Message::AlsoHere { names } => writeln!(f, "You also see {}.", names.join(", ")),
            Message::SayWhat => f.write_str("Say what?\n"),
            Message::YouSay { text } => writeln!(f, "You say, \"{text}\""),
            Message::Says { name, text } => writeln!(f, "{name} says, \"{text}\""),
            Message::TellWhom => f.write_str("Tell whom?\n"),
            Message::TellWhat { name } => writeln!(f, "Tell {name} what?"),
            Message::NotSelf => f.write_str("You cannot do that to yourself\n"),
            Message::YouTell { name, text } => writeln!(f, "You tell {name}, \"{text}\""),
            Message::Tells { name, text } => writeln!(f, "{name} tells you, \"{text}\""),
            Message::NotConnected { name } => writeln!(f, "{name} is not connected."),
            Message::Huh => f.write_str("Huh?\n"),
            Message::Tick => f.write_str("You hear creepy noises ...\n"),
            Message::Shutdown => f.write_str("\n\n** Game closed by system operator\n\n"),
            Message::Farewell => f.write_str("See you next time!\n"),
            Message::Joined { name } => writeln!(f, "Player {name} has joined the game."),
            Message::Left { name } => writeln!(f, "Player {name} has left the game."),
        }
    }
}
