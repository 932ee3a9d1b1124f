//! Async WebSockets transport for the Tokio stack.
//!
//! This library implements the framed transport of the
//! [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455):
//! the frame codec with masking, a connection object with concurrent send
//! and receive paths, transparent ping handling, a numbered-ping keepalive
//! loop, the graceful close handshake and the HTTP/1.1 upgrade for both
//! clients and servers.
//!
//! Clients dial with [`handshake::connect_async`], servers either upgrade
//! accepted streams with [`handshake::accept_async`] or spawn the whole
//! accept loop with [`server::start_server`] and consume its event stream.

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;
mod keepalive;
pub mod message;
mod read;
mod request;
pub mod server;
pub mod stream;
#[cfg(test)]
mod tests;
mod utils;
mod write;

pub use connection::WSConnection;
pub use write::MessageWriter;
