//! Terminator-delimited message framing.
//!
//! TCP hands us a byte stream, not messages. Every message on the wire is
//! followed by a fixed terminator token (`<END>` unless configured otherwise):
//!
//! - [`Framer`] accumulates received chunks until a terminator shows up and
//!   then yields one [`Message`] at a time.
//! - [`OutgoingBuffer`] holds the next message to send and guarantees it
//!   carries exactly one terminator.
//!
//! There is no escaping, so a payload that contains the terminator itself
//! is split at that point.

use std::{fmt, str::FromStr};

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::error::FramingError;

pub const DEFAULT_TERMINATOR: &str = "<END>";
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 64 * 1024;

/// The token that marks the end of a message. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminator(Bytes);

impl Terminator {
    pub fn new(token: &str) -> Result<Self, FramingError> {
        if token.is_empty() {
            return Err(FramingError::EmptyTerminator);
        }
        Ok(Self(Bytes::copy_from_slice(token.as_bytes())))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Offset of the first occurrence of the terminator in `haystack`.
    fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        haystack
            .windows(self.0.len())
            .position(|window| window == self.as_bytes())
    }
}

impl Default for Terminator {
    fn default() -> Self {
        Self(Bytes::from_static(DEFAULT_TERMINATOR.as_bytes()))
    }
}

impl FromStr for Terminator {
    type Err = FramingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// What happens to bytes that arrive after a terminator in the same buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrailingBytes {
    /// Keep them as the start of the next message.
    #[default]
    Carry,
    /// Drop them. One message per chunk is assumed.
    Discard,
}

/// One complete message as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    text: String,
    payload_len: usize,
}

impl Message {
    fn from_frame(payload: &[u8], terminator: &Terminator) -> Self {
        let mut text = String::from_utf8_lossy(payload).into_owned();
        let payload_len = text.len();
        text.push_str(&String::from_utf8_lossy(terminator.as_bytes()));
        Self { text, payload_len }
    }

    /// Payload followed by its terminator.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Payload without the terminator.
    pub fn payload(&self) -> &str {
        &self.text[..self.payload_len]
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Incoming side: turns arbitrary chunks into complete messages.
#[derive(Debug)]
pub struct Framer {
    terminator: Terminator,
    trailing: TrailingBytes,
    max_message_len: usize,
    incoming: BytesMut,
    /// Prefix of `incoming` already searched without finding a terminator.
    scanned: usize,
}

impl Framer {
    pub fn new(terminator: Terminator, trailing: TrailingBytes) -> Self {
        Self {
            terminator,
            trailing,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            incoming: BytesMut::new(),
            scanned: 0,
        }
    }

    /// Limit on buffered bytes that do not yet contain a terminator.
    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }

    /// Appends a received chunk. Content is opaque.
    ///
    /// Fails once more than `max_message_len` bytes are buffered without a
    /// terminator among them.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), FramingError> {
        self.incoming.extend_from_slice(chunk);
        if self.incoming.len() > self.max_message_len && self.find_terminator().is_none() {
            return Err(FramingError::MessageTooLong {
                limit: self.max_message_len,
            });
        }
        Ok(())
    }

    /// True when at least one terminator is buffered.
    pub fn has_message(&self) -> bool {
        let start = self.search_start();
        self.terminator.find_in(&self.incoming[start..]).is_some()
    }

    /// Bytes received but not yet returned as part of a message.
    pub fn buffered_len(&self) -> usize {
        self.incoming.len()
    }

    /// Removes the oldest complete message from the accumulator.
    pub fn take_message(&mut self) -> Option<Message> {
        let start = self.find_terminator()?;
        let frame = self
            .incoming
            .split_to(start + self.terminator.as_bytes().len());
        self.scanned = 0;
        let message = Message::from_frame(&frame[..start], &self.terminator);

        if self.trailing == TrailingBytes::Discard && !self.incoming.is_empty() {
            warn!(
                discarded = self.incoming.len(),
                terminator = %self.terminator,
                "discarding bytes received after message terminator"
            );
            self.incoming.clear();
        }

        Some(message)
    }

    /// A terminator may straddle the end of the scanned prefix, so the
    /// search backs up by one byte less than its length.
    fn search_start(&self) -> usize {
        self.scanned
            .saturating_sub(self.terminator.as_bytes().len() - 1)
    }

    fn find_terminator(&mut self) -> Option<usize> {
        let start = self.search_start();
        match self.terminator.find_in(&self.incoming[start..]) {
            Some(offset) => Some(start + offset),
            None => {
                self.scanned = self.incoming.len();
                None
            }
        }
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(Terminator::default(), TrailingBytes::default())
    }
}

/// Outgoing side: the next message to send.
#[derive(Debug, Default)]
pub struct OutgoingBuffer {
    terminator: Terminator,
    buffer: BytesMut,
}

impl OutgoingBuffer {
    pub fn new(terminator: Terminator) -> Self {
        Self {
            terminator,
            buffer: BytesMut::new(),
        }
    }

    /// Replaces whatever was pending with `text` plus the terminator.
    ///
    /// Text goes out as UTF-8, one byte per character only for ASCII input.
    pub fn build(&mut self, text: &str) {
        self.buffer.clear();
        self.buffer.extend_from_slice(text.as_bytes());
        self.buffer.extend_from_slice(self.terminator.as_bytes());
    }

    /// Appends raw text without terminating it.
    pub fn push_str(&mut self, text: &str) {
        self.buffer.extend_from_slice(text.as_bytes());
    }

    /// Wire bytes for the pending message.
    ///
    /// Adds the terminator first if the buffer does not contain one yet, so
    /// calling this without [`OutgoingBuffer::build`] still yields a frame.
    /// The buffer is left in place and can be sent again.
    pub fn serialize(&mut self) -> Bytes {
        if self.terminator.find_in(&self.buffer).is_none() {
            self.buffer.extend_from_slice(self.terminator.as_bytes());
        }
        Bytes::copy_from_slice(&self.buffer)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(text: &str) -> Bytes {
        let mut outgoing = OutgoingBuffer::default();
        outgoing.build(text);
        outgoing.serialize()
    }

    #[test]
    fn serialized_message_frames_back_to_its_payload() {
        for payload in ["Message from Client 1", "", "a", "spaces and <tags>"] {
            let mut framer = Framer::default();
            framer.push(&framed(payload)).unwrap();

            let message = framer.take_message().expect("complete message");
            assert_eq!(message.payload(), payload);
            assert_eq!(message.as_str(), format!("{payload}<END>"));
            assert_eq!(framer.buffered_len(), 0);
        }
    }

    #[test]
    fn reassembles_message_from_chunks_of_any_size() {
        let wire = framed("Message from Client 1");

        for chunk_size in 1..=wire.len() {
            let mut framer = Framer::default();
            let mut completed = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                framer.push(chunk).unwrap();
                while let Some(message) = framer.take_message() {
                    completed.push(message);
                }
            }
            assert_eq!(completed.len(), 1, "chunk size {chunk_size}");
            assert_eq!(completed[0].payload(), "Message from Client 1");
        }
    }

    #[test]
    fn terminator_split_between_chunks_is_not_complete_early() {
        let mut framer = Framer::default();
        framer.push(b"hello<EN").unwrap();
        assert!(!framer.has_message());
        assert!(framer.take_message().is_none());

        framer.push(b"D>").unwrap();
        assert!(framer.has_message());
        assert_eq!(framer.take_message().unwrap().payload(), "hello");
    }

    #[test]
    fn carries_bytes_after_terminator_into_next_message() {
        let mut framer = Framer::default();
        framer.push(b"first<END>second<END>thi").unwrap();

        assert_eq!(framer.take_message().unwrap().payload(), "first");
        assert_eq!(framer.take_message().unwrap().payload(), "second");
        assert!(framer.take_message().is_none());
        assert_eq!(framer.buffered_len(), 3);

        framer.push(b"rd<END>").unwrap();
        assert_eq!(framer.take_message().unwrap().payload(), "third");
    }

    #[test]
    fn discard_policy_drops_trailing_bytes() {
        let mut framer = Framer::new(Terminator::default(), TrailingBytes::Discard);
        framer.push(b"first<END>second<END>").unwrap();

        assert_eq!(framer.take_message().unwrap().payload(), "first");
        assert!(framer.take_message().is_none());
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn serialize_appends_terminator_exactly_once() {
        let mut outgoing = OutgoingBuffer::default();
        outgoing.build("ping");
        assert_eq!(&outgoing.serialize()[..], b"ping<END>");
        assert_eq!(&outgoing.serialize()[..], b"ping<END>");

        let mut raw = OutgoingBuffer::default();
        raw.push_str("unbuilt");
        assert_eq!(&raw.serialize()[..], b"unbuilt<END>");
        assert_eq!(&raw.serialize()[..], b"unbuilt<END>");
    }

    #[test]
    fn build_replaces_stale_content() {
        let mut outgoing = OutgoingBuffer::default();
        outgoing.build("old");
        outgoing.build("new");
        assert_eq!(outgoing.as_bytes(), b"new<END>");
    }

    #[test]
    fn non_ascii_text_is_sent_as_utf8() {
        let mut outgoing = OutgoingBuffer::default();
        outgoing.build("héllo");
        assert_eq!(outgoing.as_bytes(), "héllo<END>".as_bytes());
        assert_eq!(outgoing.as_bytes().len(), 11);
    }

    #[test]
    fn custom_terminator() {
        let terminator: Terminator = "\r\n\r\n".parse().unwrap();
        let mut outgoing = OutgoingBuffer::new(terminator.clone());
        outgoing.build("header");

        let mut framer = Framer::new(terminator, TrailingBytes::Carry);
        framer.push(&outgoing.serialize()).unwrap();
        let message = framer.take_message().unwrap();
        assert_eq!(message.payload(), "header");
        assert_eq!(message.len(), "header\r\n\r\n".len());
    }

    #[test]
    fn empty_terminator_is_rejected() {
        assert_eq!(Terminator::new(""), Err(FramingError::EmptyTerminator));
    }

    #[test]
    fn rejects_unterminated_input_past_the_limit() {
        let mut framer = Framer::default().with_max_message_len(8);
        framer.push(b"12345678").unwrap();
        assert_eq!(
            framer.push(b"9"),
            Err(FramingError::MessageTooLong { limit: 8 })
        );
    }

    #[test]
    fn limit_ignores_buffers_holding_a_terminator() {
        let mut framer = Framer::default().with_max_message_len(8);
        framer.push(b"abc<END>defg").unwrap();
        assert_eq!(framer.take_message().unwrap().payload(), "abc");
        assert_eq!(framer.buffered_len(), 4);
    }

    #[test]
    fn long_unterminated_stream_resumes_search_where_it_stopped() {
        let mut framer = Framer::default().with_max_message_len(usize::MAX);
        let chunk = [b'x'; 1024];
        for _ in 0..256 {
            framer.push(&chunk).unwrap();
            assert!(framer.take_message().is_none());
        }
        assert_eq!(framer.scanned, 256 * 1024);

        // Terminator split over the scanned boundary.
        framer.push(b"<EN").unwrap();
        assert!(framer.take_message().is_none());
        framer.push(b"D>next").unwrap();
        let message = framer.take_message().unwrap();
        assert_eq!(message.payload().len(), 256 * 1024);
        assert_eq!(framer.scanned, 0);
        assert_eq!(framer.buffered_len(), 4);
    }
}
