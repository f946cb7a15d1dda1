//! Streaming decoder for frontend (client→server) messages.

use crate::error::ProtocolError;
use crate::frontend::{self, FrontendMessage};
use crate::stream::{Decoded, StreamBuffer, ValueFormat};

type Result<T> = std::result::Result<T, ProtocolError>;

/// Reassembles frontend messages from arbitrary TCP chunk boundaries.
///
/// A fresh decoder interprets incoming bytes as the one-time unframed
/// startup packet; once a `Startup` message has been decoded, the rest of
/// the stream is framed `[code][length][body]` messages. `SslRequest` and
/// `CancelRequest` are recognized during the startup phase without
/// latching it, so the real startup can still follow.
pub struct CommandDecoder {
    stream: StreamBuffer,
    started_up: bool,
}

impl CommandDecoder {
    pub fn new() -> Self {
        Self {
            stream: StreamBuffer::new(),
            started_up: false,
        }
    }

    /// Construct with an explicit decode mode. Binary result mode is
    /// unsupported and refused here rather than misdecoding later.
    pub fn with_format(format: ValueFormat) -> Result<Self> {
        match format {
            ValueFormat::Text => Ok(Self::new()),
            ValueFormat::Binary => Err(ProtocolError::BinaryModeUnsupported),
        }
    }

    /// Append a chunk from the socket. Invalidates raw-bytes borrows
    /// returned by earlier decode calls.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.stream.feed(chunk);
    }

    pub fn startup_complete(&self) -> bool {
        self.started_up
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.stream.remaining()
    }

    /// Decode the next message, whichever phase the session is in.
    pub fn next_command(&mut self) -> Result<Option<Decoded<'_, FrontendMessage>>> {
        if self.started_up {
            self.next_framed()
        } else {
            self.next_startup_inner()
        }
    }

    /// Decode the next startup-phase message. Errors once a `Startup`
    /// has already been seen.
    pub fn next_startup(&mut self) -> Result<Option<Decoded<'_, FrontendMessage>>> {
        if self.started_up {
            return Err(ProtocolError::StartupAlreadyComplete);
        }
        self.next_startup_inner()
    }

    fn next_startup_inner(&mut self) -> Result<Option<Decoded<'_, FrontendMessage>>> {
        self.stream.compact();
        let total = match self.stream.peek_startup()? {
            Some(total) => total,
            None => return Ok(None),
        };
        let message = frontend::decode_startup_body(&self.stream.window()[4..total])?;
        if matches!(message, FrontendMessage::Startup { .. }) {
            self.started_up = true;
        }
        let raw = self.stream.consume(total);
        Ok(Some(Decoded::new(message, raw)))
    }

    fn next_framed(&mut self) -> Result<Option<Decoded<'_, FrontendMessage>>> {
        self.stream.compact();
        let (code, total) = match self.stream.peek_frame()? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        let message = frontend::decode_body(code, &self.stream.window()[5..total])?;
        let raw = self.stream.consume(total);
        Ok(Some(Decoded::new(message, raw)))
    }
}

impl Default for CommandDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{encode, BindValue, DescribeTarget, ProtocolVersion};
    use std::collections::HashMap;

    fn startup_bytes() -> Vec<u8> {
        let mut params = HashMap::new();
        params.insert("user".to_string(), "u".to_string());
        params.insert("database".to_string(), "d".to_string());
        encode(&FrontendMessage::Startup {
            version: ProtocolVersion { major: 3, minor: 0 },
            params,
        })
        .to_vec()
    }

    fn extended_query_bytes() -> Vec<u8> {
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode(&FrontendMessage::Parse {
            name: "q".into(),
            query: "SELECT $1".into(),
            param_types: vec![23],
        }));
        stream.extend_from_slice(&encode(&FrontendMessage::Bind {
            portal: "".into(),
            statement: "q".into(),
            values: vec![BindValue::Text(Some("42".into()))],
            binary_results: false,
        }));
        stream.extend_from_slice(&encode(&FrontendMessage::Describe {
            target: DescribeTarget::Portal,
            name: None,
        }));
        stream.extend_from_slice(&encode(&FrontendMessage::Execute {
            portal: "".into(),
            max_rows: 0,
        }));
        stream.extend_from_slice(&encode(&FrontendMessage::Sync));
        stream
    }

    fn drain(decoder: &mut CommandDecoder) -> Vec<FrontendMessage> {
        let mut out = Vec::new();
        while let Some(decoded) = decoder.next_command().unwrap() {
            out.push(decoded.into_message());
        }
        out
    }

    #[test]
    fn test_startup_then_query() {
        let mut decoder = CommandDecoder::new();
        decoder.feed(&startup_bytes());
        decoder.feed(&encode(&FrontendMessage::Query("SELECT 1".into())));

        let messages = drain(&mut decoder);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], FrontendMessage::Startup { .. }));
        assert_eq!(messages[1], FrontendMessage::Query("SELECT 1".into()));
        assert!(decoder.startup_complete());
    }

    #[test]
    fn test_extended_query_sequence() {
        let mut decoder = CommandDecoder::new();
        decoder.feed(&startup_bytes());
        let _ = drain(&mut decoder);

        decoder.feed(&extended_query_bytes());
        let messages = drain(&mut decoder);
        let names: Vec<&str> = messages.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["Parse", "Bind", "Describe", "Execute", "Sync"]);
    }

    #[test]
    fn test_one_byte_at_a_time_produces_same_messages() {
        let mut stream = startup_bytes();
        stream.extend_from_slice(&extended_query_bytes());

        let mut whole = CommandDecoder::new();
        whole.feed(&stream);
        let expected = drain(&mut whole);

        let mut fragmented = CommandDecoder::new();
        let mut got = Vec::new();
        for byte in &stream {
            fragmented.feed(&[*byte]);
            got.extend(drain(&mut fragmented));
        }
        assert_eq!(got, expected);
        assert_eq!(fragmented.buffered(), 0);
    }

    #[test]
    fn test_raw_bytes_concatenation_reproduces_stream() {
        let mut stream = startup_bytes();
        stream.extend_from_slice(&extended_query_bytes());

        let mut decoder = CommandDecoder::new();
        let mut replayed = Vec::new();
        for chunk in stream.chunks(3) {
            decoder.feed(chunk);
            while let Some(decoded) = decoder.next_command().unwrap() {
                replayed.extend_from_slice(decoded.raw_bytes());
            }
        }
        assert_eq!(replayed, stream);
    }

    #[test]
    fn test_raw_bytes_include_header() {
        let mut decoder = CommandDecoder::new();
        decoder.feed(&startup_bytes());
        let _ = drain(&mut decoder);

        let frame = encode(&FrontendMessage::Query("SELECT 1".into()));
        decoder.feed(&frame);
        let decoded = decoder.next_command().unwrap().unwrap();
        assert_eq!(decoded.raw_bytes(), &frame[..]);
        assert_eq!(decoded.raw_bytes()[0], b'Q');
    }

    #[test]
    fn test_startup_version_mismatch_is_fatal() {
        let mut packet = Vec::new();
        packet.extend_from_slice(&9i32.to_be_bytes());
        packet.extend_from_slice(&0x0002_0000i32.to_be_bytes());
        packet.push(0);

        let mut decoder = CommandDecoder::new();
        decoder.feed(&packet);
        assert!(matches!(
            decoder.next_command(),
            Err(ProtocolError::UnsupportedVersion { major: 2, .. })
        ));
    }

    #[test]
    fn test_ssl_request_does_not_latch_startup() {
        let mut decoder = CommandDecoder::new();
        decoder.feed(&encode(&FrontendMessage::SslRequest));
        let decoded = decoder.next_command().unwrap().unwrap();
        assert_eq!(decoded.into_message(), FrontendMessage::SslRequest);
        assert!(!decoder.startup_complete());

        decoder.feed(&startup_bytes());
        let decoded = decoder.next_command().unwrap().unwrap();
        assert!(matches!(decoded.message, FrontendMessage::Startup { .. }));
        assert!(decoder.startup_complete());
    }

    #[test]
    fn test_cancel_request_decodes() {
        let mut decoder = CommandDecoder::new();
        decoder.feed(&encode(&FrontendMessage::CancelRequest {
            process_id: 5,
            secret_key: 6,
        }));
        let decoded = decoder.next_command().unwrap().unwrap();
        assert_eq!(
            decoded.into_message(),
            FrontendMessage::CancelRequest {
                process_id: 5,
                secret_key: 6,
            }
        );
    }

    #[test]
    fn test_second_startup_is_rejected() {
        let mut decoder = CommandDecoder::new();
        decoder.feed(&startup_bytes());
        let _ = drain(&mut decoder);

        assert!(matches!(
            decoder.next_startup(),
            Err(ProtocolError::StartupAlreadyComplete)
        ));

        // On the framed stream a startup packet's leading length byte is
        // read as a type code, which is not a valid one.
        decoder.feed(&[0x00, 0, 0, 0, 4]);
        assert!(matches!(
            decoder.next_command(),
            Err(ProtocolError::UnknownMessageType(0x00))
        ));
    }

    #[test]
    fn test_unknown_code_is_fatal_not_a_skip() {
        let mut decoder = CommandDecoder::new();
        decoder.feed(&startup_bytes());
        let _ = drain(&mut decoder);

        decoder.feed(&[b'z', 0, 0, 0, 4]);
        assert!(matches!(
            decoder.next_command(),
            Err(ProtocolError::UnknownMessageType(b'z'))
        ));
    }

    #[test]
    fn test_binary_mode_is_refused_at_construction() {
        assert!(matches!(
            CommandDecoder::with_format(ValueFormat::Binary),
            Err(ProtocolError::BinaryModeUnsupported)
        ));
        assert!(CommandDecoder::with_format(ValueFormat::Text).is_ok());
    }
}
