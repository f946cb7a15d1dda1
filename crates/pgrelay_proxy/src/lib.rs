//! Proxying and query interception over the PG wire codecs.
//!
//! [`ProxyServer`] accepts client connections, opens one upstream
//! connection per session, and pumps both directions through a
//! [`ProxyPolicy`]. [`ForwardAll`] makes it a transparent byte-for-byte
//! relay; [`QueryInterceptor`] rewrites or rejects SQL on the fly.

pub mod command_writer;
pub mod connect;
pub mod intercept;
pub mod proxy;

pub use command_writer::CommandWriter;
pub use connect::{TcpConnector, UpstreamConnector};
pub use intercept::{QueryDecision, QueryHook, QueryInterceptor};
pub use proxy::{CommandAction, ForwardAll, ProxyPolicy, ProxyServer, Response, ResponseAction};

pub use pgrelay_common::config::ProxyConfig;
