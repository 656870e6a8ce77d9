//! A live socket paired with its framing state.
//!
//! [`Connection`] owns both halves of one TCP stream. The server drives it
//! from a single task; the client splits it with [`Connection::into_split`]
//! so its send and receive loops each own one half and never touch the
//! other's buffers.

use std::{io, net::SocketAddr};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::watch,
};
use tracing::debug;

use crate::{
    config::FramingConfig,
    error::TransportError,
    framer::{Framer, Message, OutgoingBuffer},
};

/// Receiving half: socket reader, scratch buffer, incoming framer.
#[derive(Debug)]
pub struct ConnectionReader<R> {
    reader: R,
    buffer: Box<[u8]>,
    framer: Framer,
}

impl<R> ConnectionReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, framing: &FramingConfig) -> Self {
        Self {
            reader,
            buffer: vec![0; framing.buffer_size.max(1)].into_boxed_slice(),
            framer: Framer::new(framing.terminator.clone(), framing.trailing)
                .with_max_message_len(framing.max_message_len),
        }
    }

    /// Reads whatever is available into the scratch buffer.
    ///
    /// `Ok(0)` means the peer closed its side.
    pub async fn receive(&mut self) -> Result<usize, TransportError> {
        Ok(self.reader.read(&mut self.buffer).await?)
    }

    /// Reads one chunk and returns every message it completed, possibly none.
    ///
    /// Fails with [`MessageTooLong`](crate::error::FramingError::MessageTooLong) once the peer has sent more
    /// than `max_message_len` bytes without a terminator.
    pub async fn receive_messages(&mut self) -> Result<Vec<Message>, TransportError> {
        let bytes_read = self.receive().await?;
        if bytes_read == 0 {
            return Err(TransportError::Closed);
        }

        self.framer.push(&self.buffer[..bytes_read])?;
        Ok(std::iter::from_fn(|| self.framer.take_message()).collect())
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }
}

/// Sending half: socket writer and the pending outgoing message.
#[derive(Debug)]
pub struct ConnectionWriter<W> {
    writer: W,
    outgoing: OutgoingBuffer,
    closed: bool,
}

impl<W> ConnectionWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W, framing: &FramingConfig) -> Self {
        Self {
            writer,
            outgoing: OutgoingBuffer::new(framing.terminator.clone()),
            closed: false,
        }
    }

    /// Writes `bytes` in full.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Sets the pending message without sending it.
    pub fn build_message(&mut self, text: &str) {
        self.outgoing.build(text);
    }

    /// Sends the pending message and returns the number of bytes written.
    pub async fn send_outgoing(&mut self) -> Result<usize, TransportError> {
        let bytes: Bytes = self.outgoing.serialize();
        self.send(&bytes).await?;
        Ok(bytes.len())
    }

    pub async fn send_message(&mut self, text: &str) -> Result<usize, TransportError> {
        self.build_message(text);
        self.send_outgoing().await
    }

    /// Shuts the write side down. Only the first call does anything and
    /// failures are logged, not returned.
    pub async fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        if let Err(error) = self.writer.shutdown().await {
            debug!(?error, "connection already closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

pub type TcpReader = ConnectionReader<OwnedReadHalf>;
pub type TcpWriter = ConnectionWriter<OwnedWriteHalf>;

#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    reader: TcpReader,
    writer: TcpWriter,
}

impl Connection {
    pub fn new(stream: TcpStream, framing: &FramingConfig) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            peer,
            reader: ConnectionReader::new(reader, framing),
            writer: ConnectionWriter::new(writer, framing),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn receive_messages(&mut self) -> Result<Vec<Message>, TransportError> {
        self.reader.receive_messages().await
    }

    pub async fn send_message(&mut self, text: &str) -> Result<usize, TransportError> {
        self.writer.send_message(text).await
    }

    /// Idempotent. The socket itself is released when the connection drops.
    pub async fn close(&mut self) {
        self.writer.close().await;
    }

    pub fn into_split(self) -> (TcpReader, TcpWriter) {
        (self.reader, self.writer)
    }
}

/// Creates a linked close trigger and the signal its loops wait on.
pub fn close_pair() -> (Closer, CloseSignal) {
    let (tx, rx) = watch::channel(false);
    (Closer(tx), CloseSignal(rx))
}

/// Asks every loop holding the paired [`CloseSignal`] to stop.
#[derive(Debug)]
pub struct Closer(watch::Sender<bool>);

impl Closer {
    pub fn close(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CloseSignal(watch::Receiver<bool>);

impl CloseSignal {
    /// Resolves once the paired [`Closer`] fires or is dropped.
    pub async fn closed(&mut self) {
        let _ = self.0.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.0.borrow()
    }
}
