//! Multi-client line-based TCP chat relay.
//!
//! Clients connect, negotiate a unique username and then exchange public and
//! private text lines while the server keeps every participant's roster
//! current. The wire protocol is newline-delimited UTF-8 text, so `nc` works as
//! a client.
//!
//! - [`server`] binds the listener and spawns one handler task per connection.
//! - [`handler`] runs the username handshake and the per-connection command loop.
//! - [`registry`] owns the username to session map behind a single lock and is
//!   the only place that fans text out to several sessions.
//! - [`session`] is the registry's handle on a connection: a username plus a
//!   bounded outbound queue drained by a dedicated writer task.
//! - [`message`] renders server lines and classifies client lines.
//! - [`observer`] is the administrative view of roster changes and server events.
//! - [`client`] is the terminal client; [`cli`] parses the command line.

pub mod cli;
pub mod client;
pub mod handler;
pub mod message;
pub mod observer;
pub mod registry;
pub mod server;
pub mod session;
