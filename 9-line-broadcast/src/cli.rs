use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::server::ServerConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the broadcast server, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:2000")]
    pub listen: SocketAddr,

    /// Milliseconds a single client write may take before that client is dropped.
    #[arg(long, default_value_t = 5000)]
    pub write_timeout_ms: u64,

    /// Seconds a new client has to send its username. Waits forever when unset.
    #[arg(long)]
    pub handshake_timeout_secs: Option<u64>,
}

impl ServerArgs {
    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            handshake_timeout: self.handshake_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name announced to the server; also prefixed to every line you send.
    #[arg(long)]
    pub username: String,

    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:2000")]
    pub server: SocketAddr,
}
