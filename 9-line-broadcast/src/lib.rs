//! Single-room text line broadcast over TCP.
//!
//! Clients connect, send a username as their first line, and from then on
//! every line any client sends is written to every connected client, the
//! sender included. The wire format is newline-delimited UTF-8 and nothing
//! else.
//!
//! Data flows one way through the server:
//! socket -> receive loop -> broadcast queue -> dispatcher -> every socket.
//!
//! - [`connection`] wraps one client socket: a shared write side and an
//!   owned read side.
//! - [`registry`] is the mutex-guarded set of active connections.
//! - [`queue`] is the unbounded FIFO between receive loops and the dispatcher.
//! - [`dispatcher`] is the sole consumer of the queue and performs fan-out.
//! - [`listener`] accepts sockets, runs the username handshake and the
//!   per-connection receive loops.
//! - [`server`] wires these together and owns graceful shutdown.
//! - [`event`] publishes the server's local transcript ("alice connected.").
//! - [`client`] is the participant side, used by the terminal client.
//! - [`cli`] parses the command-line interface.
//! - [`wire`] holds the newline framing shared by both ends.

pub mod cli;
pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod listener;
pub mod queue;
pub mod registry;
pub mod server;
pub mod wire;
