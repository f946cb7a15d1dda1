//! Frontend (client→server) message types, body parsers, and the encoder
//! used by the proxy to re-serialize modified commands.

use std::collections::HashMap;

use bytes::BytesMut;

use crate::error::ProtocolError;
use crate::reader::ByteReader;
use crate::writer::ByteWriter;

type Result<T> = std::result::Result<T, ProtocolError>;

/// Special startup "version" announcing an SSL negotiation request.
pub const VERSION_SSL_REQUEST: i32 = 80877103;
/// Special startup "version" announcing a cancel request.
pub const VERSION_CANCEL_REQUEST: i32 = 80877102;

/// Protocol version carried by the startup packet. Only major version 3
/// is accepted by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub fn as_i32(self) -> i32 {
        ((self.major as i32) << 16) | self.minor as i32
    }

    pub fn from_i32(v: i32) -> Self {
        Self {
            major: (v >> 16) as u16,
            minor: v as u16,
        }
    }
}

/// A bound parameter value from a Bind message.
///
/// On the wire each value is an `i16` kind (0 = text, 1 = binary) followed
/// by an `i32` length and the payload; length -1 marks SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindValue {
    Text(Option<String>),
    Binary(Vec<u8>),
}

impl BindValue {
    pub fn is_null(&self) -> bool {
        matches!(self, BindValue::Text(None))
    }
}

/// What a Describe/Close message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeTarget {
    Portal,
    Statement,
}

impl DescribeTarget {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'P' => Ok(DescribeTarget::Portal),
            b'S' => Ok(DescribeTarget::Statement),
            other => Err(ProtocolError::InvalidTarget(other)),
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            DescribeTarget::Portal => b'P',
            DescribeTarget::Statement => b'S',
        }
    }
}

/// Raw PG frontend (client→server) message types.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    /// Initial startup message (no type byte).
    Startup {
        version: ProtocolVersion,
        params: HashMap<String, String>,
    },
    /// SSL request (special startup message).
    SslRequest,
    /// Cancel request (special startup message).
    CancelRequest { process_id: i32, secret_key: i32 },
    /// Password response during auth ('p'), e.g. an MD5 digest.
    PasswordMessage(String),
    /// Simple query ('Q').
    Query(String),
    /// Parse ('P') — extended query.
    Parse {
        name: String,
        query: String,
        param_types: Vec<u32>,
    },
    /// Bind ('B') — extended query.
    Bind {
        portal: String,
        statement: String,
        values: Vec<BindValue>,
        binary_results: bool,
    },
    /// Describe ('D').
    Describe {
        target: DescribeTarget,
        name: Option<String>,
    },
    /// Close ('C').
    Close {
        target: DescribeTarget,
        name: Option<String>,
    },
    /// Execute ('E').
    Execute { portal: String, max_rows: u32 },
    /// Flush ('H').
    Flush,
    /// Sync ('S').
    Sync,
    /// Terminate ('X').
    Terminate,
    /// CopyData ('d') — opaque chunk during COPY FROM STDIN.
    CopyData(Vec<u8>),
    /// CopyDone ('c').
    CopyDone,
    /// CopyFail ('f').
    CopyFail(String),
}

impl FrontendMessage {
    /// Wire type code; 0 for the unframed startup family.
    pub fn code(&self) -> u8 {
        match self {
            FrontendMessage::Startup { .. }
            | FrontendMessage::SslRequest
            | FrontendMessage::CancelRequest { .. } => 0,
            FrontendMessage::PasswordMessage(_) => b'p',
            FrontendMessage::Query(_) => b'Q',
            FrontendMessage::Parse { .. } => b'P',
            FrontendMessage::Bind { .. } => b'B',
            FrontendMessage::Describe { .. } => b'D',
            FrontendMessage::Close { .. } => b'C',
            FrontendMessage::Execute { .. } => b'E',
            FrontendMessage::Flush => b'H',
            FrontendMessage::Sync => b'S',
            FrontendMessage::Terminate => b'X',
            FrontendMessage::CopyData(_) => b'd',
            FrontendMessage::CopyDone => b'c',
            FrontendMessage::CopyFail(_) => b'f',
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrontendMessage::Startup { .. } => "Startup",
            FrontendMessage::SslRequest => "SSLRequest",
            FrontendMessage::CancelRequest { .. } => "CancelRequest",
            FrontendMessage::PasswordMessage(_) => "PasswordMessage",
            FrontendMessage::Query(_) => "Query",
            FrontendMessage::Parse { .. } => "Parse",
            FrontendMessage::Bind { .. } => "Bind",
            FrontendMessage::Describe { .. } => "Describe",
            FrontendMessage::Close { .. } => "Close",
            FrontendMessage::Execute { .. } => "Execute",
            FrontendMessage::Flush => "Flush",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Terminate => "Terminate",
            FrontendMessage::CopyData(_) => "CopyData",
            FrontendMessage::CopyDone => "CopyDone",
            FrontendMessage::CopyFail(_) => "CopyFail",
        }
    }

    /// The SQL text carried by Query and Parse, if any. This is what a
    /// query interceptor inspects and rewrites.
    pub fn sql(&self) -> Option<&str> {
        match self {
            FrontendMessage::Query(sql) => Some(sql),
            FrontendMessage::Parse { query, .. } => Some(query),
            _ => None,
        }
    }
}

/// Parse the body of a framed frontend message (everything after the
/// 5-byte `[code][length]` header).
pub(crate) fn decode_body(code: u8, body: &[u8]) -> Result<FrontendMessage> {
    let mut r = ByteReader::new(body);
    match code {
        b'Q' => Ok(FrontendMessage::Query(r.cstr()?)),
        b'p' => Ok(FrontendMessage::PasswordMessage(r.cstr()?)),
        b'P' => {
            let name = r.cstr()?;
            let query = r.cstr()?;
            let count = r.u16()?;
            let mut param_types = Vec::with_capacity(count as usize);
            for _ in 0..count {
                param_types.push(r.u32()?);
            }
            Ok(FrontendMessage::Parse {
                name,
                query,
                param_types,
            })
        }
        b'B' => {
            let portal = r.cstr()?;
            let statement = r.cstr()?;
            // Format-code count: read and discarded, the per-value kind
            // that follows is authoritative.
            let _format_codes = r.u16()?;
            let count = r.u16()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let kind = r.i16()?;
                if kind != 0 && kind != 1 {
                    return Err(ProtocolError::InvalidValueFormat(kind));
                }
                let len = r.i32()?;
                if len == -1 {
                    values.push(BindValue::Text(None));
                } else if kind == 0 {
                    values.push(BindValue::Text(Some(r.string(len as usize)?)));
                } else {
                    values.push(BindValue::Binary(r.bytes(len as usize)?.to_vec()));
                }
            }
            let result_format = r.i16()?;
            if result_format != 0 && result_format != 1 {
                return Err(ProtocolError::InvalidValueFormat(result_format));
            }
            Ok(FrontendMessage::Bind {
                portal,
                statement,
                values,
                binary_results: result_format == 1,
            })
        }
        b'D' | b'C' => {
            let target = DescribeTarget::from_byte(r.u8()?)?;
            let name = r.cstr()?;
            let name = if name.is_empty() { None } else { Some(name) };
            if code == b'D' {
                Ok(FrontendMessage::Describe { target, name })
            } else {
                Ok(FrontendMessage::Close { target, name })
            }
        }
        b'E' => {
            let portal = r.cstr()?;
            let max_rows = r.u32()?;
            Ok(FrontendMessage::Execute { portal, max_rows })
        }
        b'H' => Ok(FrontendMessage::Flush),
        b'S' => Ok(FrontendMessage::Sync),
        b'X' => Ok(FrontendMessage::Terminate),
        b'c' => Ok(FrontendMessage::CopyDone),
        b'd' => Ok(FrontendMessage::CopyData(r.rest().to_vec())),
        b'f' => Ok(FrontendMessage::CopyFail(r.cstr()?)),
        other => Err(ProtocolError::UnknownMessageType(other)),
    }
}

/// Parse a startup packet body (everything after the 4-byte length).
pub(crate) fn decode_startup_body(body: &[u8]) -> Result<FrontendMessage> {
    let mut r = ByteReader::new(body);
    let raw_version = r.i32()?;

    if raw_version == VERSION_SSL_REQUEST {
        return Ok(FrontendMessage::SslRequest);
    }
    if raw_version == VERSION_CANCEL_REQUEST {
        let process_id = r.i32()?;
        let secret_key = r.i32()?;
        return Ok(FrontendMessage::CancelRequest {
            process_id,
            secret_key,
        });
    }

    let version = ProtocolVersion::from_i32(raw_version);
    if version.major != 3 {
        return Err(ProtocolError::UnsupportedVersion {
            major: version.major,
            minor: version.minor,
        });
    }

    let mut params = HashMap::new();
    while r.has_remaining() {
        let key = r.cstr()?;
        if key.is_empty() {
            break;
        }
        let value = r.cstr()?;
        params.insert(key, value);
    }

    Ok(FrontendMessage::Startup { version, params })
}

/// Encode a frontend message into complete wire bytes. The startup family
/// produces the unframed form; everything else gets a `[code][length]`
/// header.
pub fn encode(msg: &FrontendMessage) -> BytesMut {
    let mut w = ByteWriter::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            w.put_i32(version.as_i32());
            for (key, value) in params {
                w.put_cstr(key);
                w.put_cstr(value);
            }
            w.put_u8(0);
            return w.startup();
        }
        FrontendMessage::SslRequest => {
            w.put_i32(VERSION_SSL_REQUEST);
            return w.startup();
        }
        FrontendMessage::CancelRequest {
            process_id,
            secret_key,
        } => {
            w.put_i32(VERSION_CANCEL_REQUEST);
            w.put_i32(*process_id);
            w.put_i32(*secret_key);
            return w.startup();
        }
        FrontendMessage::PasswordMessage(password) => {
            w.put_cstr(password);
        }
        FrontendMessage::Query(sql) => {
            w.put_cstr(sql);
        }
        FrontendMessage::Parse {
            name,
            query,
            param_types,
        } => {
            w.put_cstr(name);
            w.put_cstr(query);
            w.put_u16(param_types.len() as u16);
            for oid in param_types {
                w.put_u32(*oid);
            }
        }
        FrontendMessage::Bind {
            portal,
            statement,
            values,
            binary_results,
        } => {
            w.put_cstr(portal);
            w.put_cstr(statement);
            w.put_u16(0);
            w.put_u16(values.len() as u16);
            for value in values {
                match value {
                    BindValue::Text(Some(s)) => {
                        w.put_i16(0);
                        w.put_i32(s.len() as i32);
                        w.put_str(s);
                    }
                    BindValue::Text(None) => {
                        w.put_i16(0);
                        w.put_i32(-1);
                    }
                    BindValue::Binary(b) => {
                        w.put_i16(1);
                        w.put_i32(b.len() as i32);
                        w.put_slice(b);
                    }
                }
            }
            w.put_i16(if *binary_results { 1 } else { 0 });
        }
        FrontendMessage::Describe { target, name } | FrontendMessage::Close { target, name } => {
            w.put_u8(target.as_byte());
            w.put_cstr(name.as_deref().unwrap_or(""));
        }
        FrontendMessage::Execute { portal, max_rows } => {
            w.put_cstr(portal);
            w.put_u32(*max_rows);
        }
        FrontendMessage::Flush
        | FrontendMessage::Sync
        | FrontendMessage::Terminate
        | FrontendMessage::CopyDone => {}
        FrontendMessage::CopyData(data) => {
            w.put_slice(data);
        }
        FrontendMessage::CopyFail(reason) => {
            w.put_cstr(reason);
        }
    }

    w.frame(msg.code())
}
