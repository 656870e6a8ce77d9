//! Terminator-framed TCP messaging between one server and many clients.
//!
//! Messages are plain text followed by a terminator token (`<END>` by
//! default). Each module handles one concern:
//!
//! - [`framer`] turns byte chunks into messages and messages into bytes.
//! - [`connection`] pairs a socket with its framing state and exposes
//!   idempotent close.
//! - [`registry`] tracks live server-side connections for bulk shutdown.
//! - [`server`] accepts clients and acknowledges every message.
//! - [`client`] keeps one connection alive, reconnecting whenever it drops,
//!   and sends a message on a fixed interval.
//! - [`config`] and [`cli`] hold settings and their command-line form.
//! - [`display`] and [`launcher`] are the console-facing pieces of the binary.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod display;
pub mod error;
pub mod framer;
pub mod launcher;
pub mod registry;
pub mod server;
