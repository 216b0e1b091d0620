//! Command line parser for logged-in players.

/// Parsed player command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Leave the game.
    Quit,
    /// Describe the room and who is in it.
    Look,
    /// Speak to everyone in the room. `text` may be empty.
    Say { text: &'a str },
    /// Speak privately to one player. Either part may be empty.
    Tell { target: &'a str, text: &'a str },
    /// Anything else, including an empty line.
    Unknown { verb: &'a str },
}

impl<'a> Command<'a> {
    /// Parse a trimmed input line. Verbs are case-sensitive.
    pub fn parse(line: &'a str) -> Self {
        let (verb, rest) = split_word(line);
        match verb {
            "quit" => Command::Quit,
            "look" => Command::Look,
            "say" => Command::Say { text: rest },
            "tell" => {
                let (target, text) = split_word(rest);
                Command::Tell { target, text }
            }
            _ => Command::Unknown { verb },
        }
    }
}

/// Split off the first whitespace-delimited word; both parts come back trimmed.
pub fn split_word(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    }
}
