//! Session binding and server emulation over the PG wire codecs.
//!
//! [`bind_socket`] is the primitive: it couples an accepted socket to a
//! [`pgrelay_protocol::CommandDecoder`] and a [`ResponseWriter`] and
//! dispatches every decoded command to a [`SessionHandler`]. [`WireServer`]
//! is the accept loop on top, suitable for server emulators and honeypots.

pub mod server;
pub mod session;
pub mod writer;

pub use server::WireServer;
pub use session::{bind_socket, Command, SessionBinding, SessionHandler, SessionInfo};
pub use writer::ResponseWriter;

pub use pgrelay_common::config::ServerConfig;
