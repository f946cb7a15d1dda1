//! Configuration for the server and proxy frontends.

use serde::{Deserialize, Serialize};

/// Configuration for the emulated PG server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on, e.g. "127.0.0.1:5432".
    pub listen_addr: String,
    /// Maximum allowed concurrent connections (0 = unlimited).
    #[serde(default)]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:5432".into(),
            max_connections: 0,
        }
    }
}

/// Configuration for the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address to listen on for client connections.
    pub listen_addr: String,
    /// Address of the real PG server to connect to per session.
    pub upstream_addr: String,
    /// Maximum allowed concurrent client connections (0 = unlimited).
    #[serde(default)]
    pub max_connections: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:6432".into(),
            upstream_addr: "127.0.0.1:5432".into(),
            max_connections: 0,
        }
    }
}
