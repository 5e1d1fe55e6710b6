//! pong-responder: a sequential TCP responder
//!
//! Accepts one connection at a time and answers every chunk it reads with
//! `PONG <n>\0`, where `<n>` counts the replies already sent on that
//! connection.
//!
//! Features:
//! - Blocking, mio or Tokio backend, all strictly one connection at a time
//! - Replies completed across short writes
//! - Configuration via CLI arguments or TOML file
//! - A ping client for exercising a running responder

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod responder;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use config::{ResponderConfig, RuntimeType};
pub use error::ResponderError;
pub use responder::EchoResponder;
