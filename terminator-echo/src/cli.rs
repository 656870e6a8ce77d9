use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{
    config::{BackoffConfig, ClientConfig, FramingConfig, ServerConfig},
    framer::{Terminator, TrailingBytes},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Without a subcommand, launches client processes like `launch`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept clients and acknowledge every message they send.
    Server(ServerArgs),
    /// Run one client that keeps a connection to the server alive.
    Client(ClientArgs),
    /// Spawn several client processes and exit.
    Launch(LaunchArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FramingArgs {
    /// Token that ends every message on the wire.
    #[arg(long, default_value = "<END>")]
    pub terminator: Terminator,

    /// Bytes read from the socket per receive.
    #[arg(long, default_value_t = 1024, value_parser = parse_nonzero_size)]
    pub buffer_size: usize,

    /// Bytes a peer may send without a terminator before it is disconnected.
    #[arg(long, default_value_t = 64 * 1024, value_parser = parse_nonzero_size)]
    pub max_message_len: usize,

    /// Drop bytes that follow a terminator in the same read instead of
    /// keeping them for the next message.
    #[arg(long)]
    pub discard_trailing: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address to listen on. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:42000")]
    pub listen: SocketAddr,

    /// Pending connection queue length.
    #[arg(long, default_value_t = 10)]
    pub backlog: u32,

    /// Reply sent for every received message.
    #[arg(long, default_value = "Message Received")]
    pub ack: String,

    #[command(flatten)]
    pub framing: FramingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Label of this client; messages read "Message from Client <LABEL>".
    pub label: String,

    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:42000")]
    pub server: SocketAddr,

    /// Milliseconds between messages.
    #[arg(long, default_value_t = 3000)]
    pub interval_ms: u64,

    /// First reconnect delay in milliseconds; 0 retries immediately.
    #[arg(long, default_value_t = 50)]
    pub backoff_initial_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub backoff_max_ms: u64,

    #[command(flatten)]
    pub framing: FramingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LaunchArgs {
    /// Number of client processes to start.
    #[arg(long, default_value_t = 2)]
    pub count: u32,

    /// Address the launched clients connect to.
    #[arg(long, default_value = "127.0.0.1:42000")]
    pub server: SocketAddr,
}

impl Default for LaunchArgs {
    fn default() -> Self {
        Self {
            count: 2,
            server: crate::config::DEFAULT_ADDR,
        }
    }
}

fn parse_nonzero_size(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(size) => Ok(size),
        Err(err) => Err(err.to_string()),
    }
}

impl From<FramingArgs> for FramingConfig {
    fn from(args: FramingArgs) -> Self {
        Self {
            terminator: args.terminator,
            trailing: if args.discard_trailing {
                TrailingBytes::Discard
            } else {
                TrailingBytes::Carry
            },
            buffer_size: args.buffer_size,
            max_message_len: args.max_message_len,
        }
    }
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            listen: args.listen,
            backlog: args.backlog,
            acknowledgement: args.ack,
            framing: args.framing.into(),
        }
    }
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        Self {
            server: args.server,
            identifier: format!("Client {}", args.label),
            send_interval: Duration::from_millis(args.interval_ms),
            backoff: BackoffConfig {
                initial: Duration::from_millis(args.backoff_initial_ms),
                max: Duration::from_millis(args.backoff_max_ms),
            },
            framing: args.framing.into(),
        }
    }
}
