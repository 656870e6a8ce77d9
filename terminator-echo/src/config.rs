//! Runtime settings for both ends of the connection.

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

use crate::framer::{DEFAULT_MAX_MESSAGE_LEN, Terminator, TrailingBytes};

pub const DEFAULT_PORT: u16 = 42000;
pub const DEFAULT_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT));
pub const DEFAULT_BACKLOG: u32 = 10;
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_ACKNOWLEDGEMENT: &str = "Message Received";

/// How a connection carves its byte stream into messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramingConfig {
    pub terminator: Terminator,
    pub trailing: TrailingBytes,
    /// Size of the scratch buffer each read fills.
    pub buffer_size: usize,
    /// Most bytes a peer may send without a terminator before the
    /// connection is dropped.
    pub max_message_len: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            terminator: Terminator::default(),
            trailing: TrailingBytes::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub backlog: u32,
    /// Payload sent back for every complete message.
    pub acknowledgement: String,
    pub framing: FramingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_ADDR,
            backlog: DEFAULT_BACKLOG,
            acknowledgement: DEFAULT_ACKNOWLEDGEMENT.to_string(),
            framing: FramingConfig::default(),
        }
    }
}

/// Delay between failed connection attempts.
///
/// Starts at `initial` and doubles after each failure, capped at `max`.
/// A zero `initial` retries immediately every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffConfig {
    pub const fn none() -> Self {
        Self {
            initial: Duration::ZERO,
            max: Duration::ZERO,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server: SocketAddr,
    /// Name carried in every outgoing message.
    pub identifier: String,
    pub send_interval: Duration,
    pub backoff: BackoffConfig,
    pub framing: FramingConfig,
}

impl ClientConfig {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            server: DEFAULT_ADDR,
            identifier: identifier.into(),
            send_interval: DEFAULT_SEND_INTERVAL,
            backoff: BackoffConfig::default(),
            framing: FramingConfig::default(),
        }
    }

    /// The text the send loop repeats.
    pub fn outgoing_text(&self) -> String {
        format!("Message from {}", self.identifier)
    }
}
