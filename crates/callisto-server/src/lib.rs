//! callisto-server: a small line-oriented TCP command server.
//!
//! Operators connect with a plain TCP client and type commands:
//!
//! | Command    | Effect |
//! |------------|--------|
//! | `start`    | start recording, or begin a new output file |
//! | `stop`     | stop recording |
//! | `overview` | run a frequency-sweep overview |
//! | `get`      | print the latest complete sweep |
//! | `quit`     | close the connection |
//!
//! Every reply ends with an empty line. Commands only raise
//! [`CommandFlags`](callisto_core::CommandFlags); the acquisition loop acts
//! on them.

pub mod commands;
pub mod server;

pub use commands::{CommandContext, Reply};
pub use server::CommandServer;
