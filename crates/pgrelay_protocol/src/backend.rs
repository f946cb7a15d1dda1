//! Backend (server→client) message types, body parsers, and the encoder.

use bytes::BytesMut;

use crate::error::ProtocolError;
use crate::notice::NoticeFields;
use crate::reader::ByteReader;
use crate::writer::ByteWriter;

type Result<T> = std::result::Result<T, ProtocolError>;

/// Authentication request payload ('R' message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// Int32(0) — authentication successful.
    Ok,
    /// Int32(3) — clear-text password required.
    CleartextPassword,
    /// Int32(5) — MD5 password required, with the 4-byte salt.
    Md5Password { salt: [u8; 4] },
    /// Int32(10) — SASL mechanism list.
    Sasl { mechanisms: Vec<String> },
    /// Int32(11) — SASL server challenge.
    SaslContinue { data: Vec<u8> },
    /// Int32(12) — SASL server proof.
    SaslFinal { data: Vec<u8> },
}

/// Result column transfer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormat {
    Text,
    Binary,
}

/// One column of a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    /// Table OID, or zero if the column is not a simple table reference.
    pub table_oid: u32,
    /// Attribute number within the table, or zero.
    pub column_id: u16,
    pub type_oid: u32,
    pub type_size: u16,
    pub type_modifier: u32,
    pub format: FieldFormat,
}

impl FieldDescription {
    /// A text-format column with no table provenance.
    pub fn text(name: impl Into<String>, type_oid: u32, type_size: u16) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            type_oid,
            type_size,
            type_modifier: u32::MAX,
            format: FieldFormat::Text,
        }
    }
}

/// Raw PG backend (server→client) message types.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// Authentication request ('R').
    Authentication(Authentication),
    /// Parameter status ('S').
    ParameterStatus { name: String, value: String },
    /// Backend key data ('K').
    BackendKeyData { process_id: i32, secret_key: i32 },
    /// Ready for query ('Z'); status is 'I', 'T' or 'E'.
    ReadyForQuery { status: u8 },
    /// Row description ('T').
    RowDescription { fields: Vec<FieldDescription> },
    /// Data row ('D'); None encodes SQL NULL as length -1.
    DataRow { values: Vec<Option<String>> },
    /// Command complete ('C').
    CommandComplete { tag: String },
    /// Error response ('E').
    Error(NoticeFields),
    /// Notice response ('N').
    Notice(NoticeFields),
    /// Asynchronous notification ('A') — from NOTIFY.
    NotificationResponse {
        process_id: i32,
        channel: String,
        payload: String,
    },
    /// CopyInResponse ('G') — server ready to receive COPY data.
    CopyInResponse {
        is_binary: bool,
        column_formats: Vec<u16>,
    },
    /// CopyOutResponse ('H') — server will send COPY data.
    CopyOutResponse {
        is_binary: bool,
        column_formats: Vec<u16>,
    },
    /// CopyData ('d').
    CopyData(Vec<u8>),
    /// CopyDone ('c').
    CopyDone,
    /// Parse complete ('1').
    ParseComplete,
    /// Bind complete ('2').
    BindComplete,
    /// Close complete ('3').
    CloseComplete,
    /// No data ('n').
    NoData,
    /// Portal suspended ('s') — Execute row limit reached.
    PortalSuspended,
    /// Empty query response ('I').
    EmptyQueryResponse,
    /// Replication stream start ('W').
    ReplicationStart,
}

impl BackendMessage {
    pub fn code(&self) -> u8 {
        match self {
            BackendMessage::Authentication(_) => b'R',
            BackendMessage::ParameterStatus { .. } => b'S',
            BackendMessage::BackendKeyData { .. } => b'K',
            BackendMessage::ReadyForQuery { .. } => b'Z',
            BackendMessage::RowDescription { .. } => b'T',
            BackendMessage::DataRow { .. } => b'D',
            BackendMessage::CommandComplete { .. } => b'C',
            BackendMessage::Error(_) => b'E',
            BackendMessage::Notice(_) => b'N',
            BackendMessage::NotificationResponse { .. } => b'A',
            BackendMessage::CopyInResponse { .. } => b'G',
            BackendMessage::CopyOutResponse { .. } => b'H',
            BackendMessage::CopyData(_) => b'd',
            BackendMessage::CopyDone => b'c',
            BackendMessage::ParseComplete => b'1',
            BackendMessage::BindComplete => b'2',
            BackendMessage::CloseComplete => b'3',
            BackendMessage::NoData => b'n',
            BackendMessage::PortalSuspended => b's',
            BackendMessage::EmptyQueryResponse => b'I',
            BackendMessage::ReplicationStart => b'W',
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendMessage::Authentication(_) => "Authentication",
            BackendMessage::ParameterStatus { .. } => "ParameterStatus",
            BackendMessage::BackendKeyData { .. } => "BackendKeyData",
            BackendMessage::ReadyForQuery { .. } => "ReadyForQuery",
            BackendMessage::RowDescription { .. } => "RowDescription",
            BackendMessage::DataRow { .. } => "DataRow",
            BackendMessage::CommandComplete { .. } => "CommandComplete",
            BackendMessage::Error(_) => "ErrorResponse",
            BackendMessage::Notice(_) => "NoticeResponse",
            BackendMessage::NotificationResponse { .. } => "NotificationResponse",
            BackendMessage::CopyInResponse { .. } => "CopyInResponse",
            BackendMessage::CopyOutResponse { .. } => "CopyOutResponse",
            BackendMessage::CopyData(_) => "CopyData",
            BackendMessage::CopyDone => "CopyDone",
            BackendMessage::ParseComplete => "ParseComplete",
            BackendMessage::BindComplete => "BindComplete",
            BackendMessage::CloseComplete => "CloseComplete",
            BackendMessage::NoData => "NoData",
            BackendMessage::PortalSuspended => "PortalSuspended",
            BackendMessage::EmptyQueryResponse => "EmptyQueryResponse",
            BackendMessage::ReplicationStart => "ReplicationStart",
        }
    }
}

/// Parse the body of a framed backend message.
pub(crate) fn decode_body(code: u8, body: &[u8]) -> Result<BackendMessage> {
    let mut r = ByteReader::new(body);
    match code {
        b'R' => decode_authentication(&mut r, body.len()),
        b'S' => Ok(BackendMessage::ParameterStatus {
            name: r.cstr()?,
            value: r.cstr()?,
        }),
        b'K' => Ok(BackendMessage::BackendKeyData {
            process_id: r.i32()?,
            secret_key: r.i32()?,
        }),
        b'Z' => Ok(BackendMessage::ReadyForQuery { status: r.u8()? }),
        b'T' => {
            let count = r.u16()?;
            let mut fields = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = r.cstr()?;
                let table_oid = r.u32()?;
                let column_id = r.u16()?;
                let type_oid = r.u32()?;
                let type_size = r.u16()?;
                let type_modifier = r.u32()?;
                let format = if r.i16()? == 0 {
                    FieldFormat::Text
                } else {
                    FieldFormat::Binary
                };
                fields.push(FieldDescription {
                    name,
                    table_oid,
                    column_id,
                    type_oid,
                    type_size,
                    type_modifier,
                    format,
                });
            }
            Ok(BackendMessage::RowDescription { fields })
        }
        b'D' => {
            let count = r.u16()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let len = r.i32()?;
                if len == -1 {
                    values.push(None);
                } else {
                    values.push(Some(r.string(len as usize)?));
                }
            }
            Ok(BackendMessage::DataRow { values })
        }
        b'C' => Ok(BackendMessage::CommandComplete { tag: r.cstr()? }),
        b'E' => Ok(BackendMessage::Error(NoticeFields::decode(&mut r)?)),
        b'N' => Ok(BackendMessage::Notice(NoticeFields::decode(&mut r)?)),
        b'A' => Ok(BackendMessage::NotificationResponse {
            process_id: r.i32()?,
            channel: r.cstr()?,
            payload: r.cstr()?,
        }),
        b'G' | b'H' => {
            let is_binary = r.u8()? != 0;
            let count = r.u16()?;
            let mut column_formats = Vec::with_capacity(count as usize);
            for _ in 0..count {
                column_formats.push(r.u16()?);
            }
            if code == b'G' {
                Ok(BackendMessage::CopyInResponse {
                    is_binary,
                    column_formats,
                })
            } else {
                Ok(BackendMessage::CopyOutResponse {
                    is_binary,
                    column_formats,
                })
            }
        }
        b'd' => Ok(BackendMessage::CopyData(r.rest().to_vec())),
        b'c' => Ok(BackendMessage::CopyDone),
        b'1' => Ok(BackendMessage::ParseComplete),
        b'2' => Ok(BackendMessage::BindComplete),
        b'3' => Ok(BackendMessage::CloseComplete),
        b'n' => Ok(BackendMessage::NoData),
        b's' => Ok(BackendMessage::PortalSuspended),
        b'I' => Ok(BackendMessage::EmptyQueryResponse),
        b'W' => Ok(BackendMessage::ReplicationStart),
        other => Err(ProtocolError::UnknownMessageType(other)),
    }
}

fn decode_authentication(r: &mut ByteReader<'_>, body_len: usize) -> Result<BackendMessage> {
    let subcode = r.i32()?;
    let auth = match subcode {
        0 => Authentication::Ok,
        // Subcodes 3 and 5 with an unexpected length decode as Ok, a
        // compatibility relaxation for nonstandard servers.
        3 => {
            if body_len == 4 {
                Authentication::CleartextPassword
            } else {
                Authentication::Ok
            }
        }
        5 => {
            if body_len == 8 {
                let mut salt = [0u8; 4];
                salt.copy_from_slice(r.bytes(4)?);
                Authentication::Md5Password { salt }
            } else {
                Authentication::Ok
            }
        }
        10 => {
            let mut mechanisms = Vec::new();
            while r.has_remaining() {
                let mech = r.cstr()?;
                if mech.is_empty() {
                    break;
                }
                mechanisms.push(mech);
            }
            Authentication::Sasl { mechanisms }
        }
        11 => Authentication::SaslContinue {
            data: r.rest().to_vec(),
        },
        12 => Authentication::SaslFinal {
            data: r.rest().to_vec(),
        },
        other => return Err(ProtocolError::UnknownAuthCode(other)),
    };
    Ok(BackendMessage::Authentication(auth))
}

/// Encode a backend message into complete wire bytes.
pub fn encode(msg: &BackendMessage) -> BytesMut {
    let mut w = ByteWriter::new();

    match msg {
        BackendMessage::Authentication(auth) => match auth {
            Authentication::Ok => w.put_i32(0),
            Authentication::CleartextPassword => w.put_i32(3),
            Authentication::Md5Password { salt } => {
                w.put_i32(5);
                w.put_slice(salt);
            }
            Authentication::Sasl { mechanisms } => {
                w.put_i32(10);
                for mech in mechanisms {
                    w.put_cstr(mech);
                }
                w.put_u8(0);
            }
            Authentication::SaslContinue { data } => {
                w.put_i32(11);
                w.put_slice(data);
            }
            Authentication::SaslFinal { data } => {
                w.put_i32(12);
                w.put_slice(data);
            }
        },
        BackendMessage::ParameterStatus { name, value } => {
            w.put_cstr(name);
            w.put_cstr(value);
        }
        BackendMessage::BackendKeyData {
            process_id,
            secret_key,
        } => {
            w.put_i32(*process_id);
            w.put_i32(*secret_key);
        }
        BackendMessage::ReadyForQuery { status } => {
            w.put_u8(*status);
        }
        BackendMessage::RowDescription { fields } => {
            w.put_u16(fields.len() as u16);
            for field in fields {
                w.put_cstr(&field.name);
                w.put_u32(field.table_oid);
                w.put_u16(field.column_id);
                w.put_u32(field.type_oid);
                w.put_u16(field.type_size);
                w.put_u32(field.type_modifier);
                w.put_i16(match field.format {
                    FieldFormat::Text => 0,
                    FieldFormat::Binary => 1,
                });
            }
        }
        BackendMessage::DataRow { values } => {
            w.put_u16(values.len() as u16);
            for value in values {
                match value {
                    Some(s) => {
                        w.put_i32(s.len() as i32);
                        w.put_str(s);
                    }
                    None => w.put_i32(-1),
                }
            }
        }
        BackendMessage::CommandComplete { tag } => {
            w.put_cstr(tag);
        }
        BackendMessage::Error(fields) | BackendMessage::Notice(fields) => {
            fields.encode(&mut w);
        }
        BackendMessage::NotificationResponse {
            process_id,
            channel,
            payload,
        } => {
            w.put_i32(*process_id);
            w.put_cstr(channel);
            w.put_cstr(payload);
        }
        BackendMessage::CopyInResponse {
            is_binary,
            column_formats,
        }
        | BackendMessage::CopyOutResponse {
            is_binary,
            column_formats,
        } => {
            w.put_u8(if *is_binary { 1 } else { 0 });
            w.put_u16(column_formats.len() as u16);
            for format in column_formats {
                w.put_u16(*format);
            }
        }
        BackendMessage::CopyData(data) => {
            w.put_slice(data);
        }
        BackendMessage::CopyDone
        | BackendMessage::ParseComplete
        | BackendMessage::BindComplete
        | BackendMessage::CloseComplete
        | BackendMessage::NoData
        | BackendMessage::PortalSuspended
        | BackendMessage::EmptyQueryResponse
        | BackendMessage::ReplicationStart => {}
    }

    w.frame(msg.code())
}
