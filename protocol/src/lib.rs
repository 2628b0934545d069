//! Line-delimited JSON protocol shared by the relay server and its clients.
//!
//! Every frame on the wire is a single JSON object terminated by `\r\n`:
//!
//! ```text
//! {"type":"TEXT","name":"alice","text":"hi","time":"12:01:33"}
//! ```
//!
//! Lines that do not match the schema never tear the stream down, they are
//! surfaced as [`MessageType::Unrecognized`] carrying the raw line.

use std::cmp;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

pub mod connection;
mod error;

pub use connection::{
    event_channel, Connection, ConnectionEvent, ConnectionId, EventReceiver, EventSender, OUTGOING_CAPACITY,
};
pub use error::{ConnectionError, ProtocolError};

const LINE_TERMINATOR: &[u8] = b"\r\n";
const TIME_FORMAT: &str = "%H:%M:%S";

// upper bound for a single line, longer input is dropped up to the next newline
pub const LINES_MAX_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    Name,
    Notification,
    Users,
    Disconnect,
    Unrecognized,
}

/// Immutable wire payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    kind: MessageType,
    name: String,
    text: String,
    time: String,
}

impl Message {
    pub fn new(kind: MessageType, name: impl Into<String>, text: impl Into<String>, time: impl Into<String>) -> Self {
        Message {
            kind,
            name: name.into(),
            text: text.into(),
            time: time.into(),
        }
    }

    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Message::new(MessageType::Text, name, text, current_time())
    }

    // registration request, time is left for the server to fill in
    pub fn name(name: impl Into<String>) -> Self {
        Message::new(MessageType::Name, name, "", "")
    }

    pub fn notification(name: impl Into<String>, text: impl Into<String>) -> Self {
        Message::new(MessageType::Notification, name, text, current_time())
    }

    pub fn users(name: impl Into<String>, listing: impl Into<String>) -> Self {
        Message::new(MessageType::Users, name, listing, current_time())
    }

    pub fn disconnect(name: impl Into<String>) -> Self {
        Message::new(MessageType::Disconnect, name, "", current_time())
    }

    pub fn unrecognized(raw: impl Into<String>) -> Self {
        Message::new(MessageType::Unrecognized, "", raw, "")
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn sender(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &str {
        &self.text
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    /// Wire form without the line terminator.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one line of wire input. Never fails: anything that does not
    /// match the schema comes back as `Unrecognized` holding the raw line.
    pub fn decode(line: &str) -> Message {
        match serde_json::from_str(line) {
            Ok(message) => message,
            Err(err) => {
                debug!(error = %err, line, "unable to parse line as message");
                Message::unrecognized(line)
            }
        }
    }
}

/// Current wall-clock time as `HH:MM:SS`, used to stamp outgoing messages.
pub fn current_time() -> String {
    chrono::Local::now().format(TIME_FORMAT).to_string()
}

// convert bytes to Message and Message to bytes, one JSON object per line
#[derive(Debug)]
pub struct MessageCodec {
    max_length: usize,
    // where to resume the newline scan on the next decode call
    next_index: usize,
    // set while skipping the tail of an over-long line
    discarding: bool,
}

impl MessageCodec {
    pub fn new() -> Self {
        MessageCodec::with_max_length(LINES_MAX_LEN)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        MessageCodec {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        MessageCodec::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let read_to = cmp::min(self.max_length.saturating_add(1), src.len());
            let newline = src[self.next_index..read_to].iter().position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    // drop the rest of the over-long line, including its newline
                    src.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = src.split_to(end + 1);
                    let line = trim_line(&line[..end]);

                    if line.is_empty() {
                        continue;
                    }
                    return Ok(Some(decode_line(line)));
                }
                (false, None) if src.len() > self.max_length => {
                    debug!(max_length = self.max_length, "line too long, discarding");
                    self.discarding = true;
                    self.next_index = 0;
                    let head = src.split_to(self.max_length);
                    return Ok(Some(decode_line(&head)));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(buf)? {
            return Ok(Some(message));
        }

        // final line without a terminator
        self.next_index = 0;
        if self.discarding || buf.is_empty() {
            self.discarding = false;
            buf.clear();
            return Ok(None);
        }

        let rest = buf.split_to(buf.len());
        let line = trim_line(&rest);
        if line.is_empty() {
            Ok(None)
        } else {
            Ok(Some(decode_line(line)))
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.encode()?;
        dst.reserve(line.len() + LINE_TERMINATOR.len());
        dst.put_slice(line.as_bytes());
        dst.put_slice(LINE_TERMINATOR);
        Ok(())
    }
}

// strip trailing '\r' and surrounding whitespace bytes
fn trim_line(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &line[start..end]
}

fn decode_line(line: &[u8]) -> Message {
    match std::str::from_utf8(line) {
        Ok(text) => Message::decode(text),
        Err(_) => Message::unrecognized(String::from_utf8_lossy(line).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut MessageCodec, buf: &mut BytesMut) -> Vec<Message> {
        let mut out = vec![];
        while let Some(message) = codec.decode(buf).expect("decode") {
            out.push(message);
        }
        out
    }

    #[test]
    fn decodes_wire_schema() {
        let line = r#"{"type":"NAME","name":"alice","text":"","time":""}"#;
        let message = Message::decode(line);

        assert_eq!(message.kind(), MessageType::Name);
        assert_eq!(message.sender(), "alice");
        assert_eq!(message.body(), "");
        assert_eq!(message.time(), "");
    }

    #[test]
    fn encodes_upper_case_type_and_all_fields() {
        let message = Message::new(MessageType::Users, "SERVER", "> alice", "10:00:00");
        let line = message.encode().expect("encode");

        assert_eq!(line, r#"{"type":"USERS","name":"SERVER","text":"> alice","time":"10:00:00"}"#);
    }

    #[test]
    fn roundtrip_preserves_empty_fields() {
        for kind in [MessageType::Text, MessageType::Name, MessageType::Disconnect] {
            let message = Message::new(kind, "", "", "");
            let decoded = Message::decode(&message.encode().expect("encode"));
            assert_eq!(message, decoded);
        }

        let message = Message::new(MessageType::Text, "bob", "multi\nline \"quoted\"", "23:59:59");
        assert_eq!(Message::decode(&message.encode().expect("encode")), message);
    }

    #[test]
    fn non_json_becomes_unrecognized_with_raw_text() {
        let message = Message::decode("not-json");

        assert_eq!(message.kind(), MessageType::Unrecognized);
        assert_eq!(message.body(), "not-json");
    }

    #[test]
    fn missing_field_or_unknown_type_is_unrecognized() {
        let missing_time = r#"{"type":"TEXT","name":"a","text":"b"}"#;
        assert_eq!(Message::decode(missing_time).kind(), MessageType::Unrecognized);

        let bad_type = r#"{"type":"SHOUT","name":"a","text":"b","time":""}"#;
        let message = Message::decode(bad_type);
        assert_eq!(message.kind(), MessageType::Unrecognized);
        assert_eq!(message.body(), bad_type);
    }

    #[test]
    fn codec_handles_crlf_lf_and_partial_frames() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"{\"type\":\"TEXT\",\"name\":\"a\",\"text\":\"one\",\"time\":\"\"}\r\n");
        buf.extend_from_slice(b"{\"type\":\"TEXT\",\"name\":\"a\",\"text\":\"two\",\"time\":\"\"}\n");
        buf.extend_from_slice(b"{\"type\":\"TEXT\",\"name\":\"a\"");

        let messages = decode_all(&mut codec, &mut buf);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body(), "one");
        assert_eq!(messages[1].body(), "two");

        buf.extend_from_slice(b",\"text\":\"three\",\"time\":\"\"}\r\n");
        let messages = decode_all(&mut codec, &mut buf);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body(), "three");
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_skips_blank_lines() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&b"\r\n\n  \r\nnot-json\n"[..]);

        let messages = decode_all(&mut codec, &mut buf);
        assert_eq!(messages, vec![Message::unrecognized("not-json")]);
    }

    #[test]
    fn codec_survives_over_long_line() {
        let mut codec = MessageCodec::with_max_length(48);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[b'x'; 100]);
        buf.extend_from_slice(b"\n{\"type\":\"NAME\",\"name\":\"a\",\"text\":\"\",\"time\":\"\"}\n");

        let messages = decode_all(&mut codec, &mut buf);
        assert_eq!(messages.len(), 2, "{messages:?}");
        assert_eq!(messages[0].kind(), MessageType::Unrecognized);
        assert_eq!(messages[0].body(), "x".repeat(48));
        assert_eq!(messages[1].kind(), MessageType::Name);
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_decodes_unterminated_final_line_at_eof() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"DISCONNECT\",\"name\":\"a\",\"text\":\"\",\"time\":\"\"}"[..]);

        assert!(codec.decode(&mut buf).expect("decode").is_none());
        let message = codec.decode_eof(&mut buf).expect("decode eof").expect("message");
        assert_eq!(message.kind(), MessageType::Disconnect);
        assert!(codec.decode_eof(&mut buf).expect("decode eof").is_none());
    }

    #[test]
    fn codec_encodes_with_crlf_terminator() {
        let mut codec = MessageCodec::new();
        let mut dst = BytesMut::new();

        codec.encode(Message::new(MessageType::Text, "a", "b", "c"), &mut dst).expect("encode");
        assert!(dst.ends_with(b"}\r\n"));
        assert_eq!(dst.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn invalid_utf8_is_unrecognized() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfeabc\n"[..]);

        let messages = decode_all(&mut codec, &mut buf);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind(), MessageType::Unrecognized);
        assert!(messages[0].body().ends_with("abc"));
    }

    #[test]
    fn current_time_is_hh_mm_ss() {
        let time = current_time();
        let parts: Vec<&str> = time.split(':').collect();

        assert_eq!(time.len(), 8);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_digit())));
    }
}
