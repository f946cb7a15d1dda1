//! Backend side of the PostgreSQL frontend/backend wire protocol (v3).
//!
//! The crate is a pair of streaming codecs between raw TCP byte streams
//! and typed protocol messages:
//!
//! - [`CommandDecoder`] reassembles frontend (client→server) messages,
//!   including the one-time unframed startup packet.
//! - [`backend::encode`] serializes backend (server→client) messages.
//! - [`ResponseDecoder`] and [`frontend::encode`] are the mirrors used by
//!   a proxy to follow and re-emit traffic in the other direction.
//!
//! Every decoded message carries a zero-copy accessor for the exact wire
//! bytes that produced it, so intercepted traffic can be forwarded
//! unchanged; the borrow is scoped to the decoder, which makes the
//! "realize before you await" rule a compile-time property.

pub mod backend;
pub mod command_decoder;
pub mod error;
pub mod frontend;
pub mod notice;
pub mod reader;
pub mod response_decoder;
pub mod stream;
pub mod writer;

pub use backend::{Authentication, BackendMessage, FieldDescription, FieldFormat};
pub use backend::encode as encode_response;
pub use command_decoder::CommandDecoder;
pub use error::ProtocolError;
pub use frontend::{BindValue, DescribeTarget, FrontendMessage, ProtocolVersion};
pub use frontend::encode as encode_command;
pub use notice::NoticeFields;
pub use reader::ByteReader;
pub use response_decoder::ResponseDecoder;
pub use stream::{Decoded, ValueFormat};
pub use writer::ByteWriter;
