//! Player commands.
//!
//! Once a connection reaches the Playing state, every line it sends is a
//! command of the form `<verb> <remainder>`:
//!
//! ```text
//! look                  describe the room and who else is here
//! say <text>            speak to everyone in the room
//! tell <name> <text>    speak privately to one player
//! quit                  leave the game
//! ```
//!
//! Malformed input always degrades to a message back to the sender.

pub mod handler;
pub mod parser;

pub use handler::{execute, quit};
pub use parser::Command;
