//! Upstream connection establishment.

use async_trait::async_trait;
use tokio::net::TcpStream;

/// Opens the upstream socket for a new client session. The default
/// implementation dials a fixed address; embedders can supply their own
/// (unix sockets, TLS-wrapped dialers, test fakes).
#[async_trait]
pub trait UpstreamConnector: Send + Sync + 'static {
    async fn connect(&self) -> std::io::Result<TcpStream>;
}

/// Connects to a fixed TCP address.
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl UpstreamConnector for TcpConnector {
    async fn connect(&self) -> std::io::Result<TcpStream> {
        TcpStream::connect(&self.addr).await
    }
}
