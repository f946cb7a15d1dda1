//! Error/Notice field set and the single-letter tag map.
//!
//! ErrorResponse and NoticeResponse share the same body: a sequence of
//! `(tag byte, c-string)` pairs closed by a zero byte. The tag table below
//! is the single source of truth used by both the encoder and the decoder.

use crate::error::ProtocolError;
use crate::reader::ByteReader;
use crate::writer::ByteWriter;

macro_rules! notice_fields {
    ($($tag:literal => $field:ident,)*) => {
        /// Named fields of an ErrorResponse / NoticeResponse.
        ///
        /// Unset fields are absent from the wire. Unrecognized tags are
        /// skipped on decode and never produced on encode.
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct NoticeFields {
            $(pub $field: Option<String>,)*
        }

        impl NoticeFields {
            fn slot_mut(&mut self, tag: u8) -> Option<&mut Option<String>> {
                match tag {
                    $($tag => Some(&mut self.$field),)*
                    _ => None,
                }
            }

            /// Present fields in wire order, as `(tag, value)` pairs.
            pub fn entries(&self) -> impl Iterator<Item = (u8, &str)> + '_ {
                [$(($tag, &self.$field)),*]
                    .into_iter()
                    .filter_map(|(tag, v)| v.as_deref().map(|s| (tag, s)))
            }
        }
    };
}

notice_fields! {
    b'S' => severity,
    b'C' => code,
    b'M' => message,
    b'D' => detail,
    b'H' => hint,
    b'P' => position,
    b'p' => internal_position,
    b'q' => internal_query,
    b'W' => where_context,
    b's' => schema,
    b't' => table,
    b'c' => column,
    b'd' => data_type,
    b'n' => constraint,
    b'F' => file,
    b'L' => line,
    b'R' => routine,
}

impl NoticeFields {
    /// A fully-shaped error with severity, SQLSTATE code and message.
    pub fn severe(severity: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Some(severity.to_string()),
            code: Some(code.to_string()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Pretty-print an arbitrary error value into the message field.
    pub fn from_display(err: &dyn std::fmt::Display) -> Self {
        Self::severe("ERROR", "XX000", err.to_string())
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> Result<Self, ProtocolError> {
        let mut fields = NoticeFields::default();
        while reader.has_remaining() {
            let tag = reader.u8()?;
            if tag == 0 {
                break;
            }
            let value = reader.cstr()?;
            if let Some(slot) = fields.slot_mut(tag) {
                *slot = Some(value);
            }
        }
        Ok(fields)
    }

    pub(crate) fn encode(&self, writer: &mut ByteWriter) {
        for (tag, value) in self.entries() {
            writer.put_u8(tag);
            writer.put_cstr(value);
        }
        writer.put_u8(0);
    }
}

impl From<&str> for NoticeFields {
    fn from(message: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            ..Default::default()
        }
    }
}

impl From<String> for NoticeFields {
    fn from(message: String) -> Self {
        Self {
            message: Some(message),
            ..Default::default()
        }
    }
}
