//! Operator console shared between firmware and emulator targets.
//!
//! Lines are lexed and parsed in [`grammar`] and executed against the running
//! terminal by [`commands`]. Both stay `no_std` so the USB CDC port and the
//! host REPL behave identically.

pub mod commands;
pub mod grammar;

pub use commands::{ConsoleError, ConsoleReply, ConsoleTarget, execute};
