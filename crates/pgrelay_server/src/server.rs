//! PG-compatible TCP server: accept loop, connection limits, graceful
//! shutdown. The per-session protocol work happens in `session`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use pgrelay_common::config::ServerConfig;
use pgrelay_protocol::{encode_response, BackendMessage, NoticeFields};

use crate::session::{bind_socket, SessionHandler};

/// PostgreSQL-compatible TCP server over a user-supplied handler.
pub struct WireServer<H: SessionHandler> {
    config: ServerConfig,
    handler: Arc<H>,
    /// Number of currently active connections.
    active_connections: Arc<AtomicUsize>,
}

impl<H: SessionHandler> WireServer<H> {
    pub fn new(config: ServerConfig, handler: Arc<H>) -> Self {
        Self {
            config,
            handler,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of currently active connections.
    pub fn active_connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Start the server and listen for connections.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        tracing::info!("pgrelay server listening on {}", self.config.listen_addr);
        self.run_on(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn run_on(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            tracing::info!("New connection from {}", addr);
            self.spawn_connection(stream);
        }
    }

    /// Start the server with graceful shutdown support.
    ///
    /// The server stops accepting new connections when `shutdown` resolves,
    /// then waits up to `drain_timeout` for active connections to finish.
    pub async fn run_with_shutdown(
        &self,
        shutdown: impl std::future::Future<Output = ()>,
        drain_timeout: std::time::Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        tracing::info!("pgrelay server listening on {}", self.config.listen_addr);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, addr) = result?;
                    tracing::info!("New connection from {}", addr);
                    self.spawn_connection(stream);
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, stopping new connections");
                    break;
                }
            }
        }

        let active = self.active_connections.load(Ordering::Relaxed);
        if active > 0 {
            tracing::info!(
                "Draining {} active connection(s) (timeout: {:?})",
                active,
                drain_timeout
            );
            let deadline = tokio::time::Instant::now() + drain_timeout;
            loop {
                let remaining = self.active_connections.load(Ordering::Relaxed);
                if remaining == 0 {
                    tracing::info!("All connections drained");
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!(
                        "Drain timeout reached with {} connection(s) still active",
                        remaining
                    );
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream) {
        let active = self.active_connections.clone();
        let max_connections = self.config.max_connections;
        let handler = self.handler.clone();
        let current = active.fetch_add(1, Ordering::Relaxed) + 1;

        tokio::spawn(async move {
            if max_connections > 0 && current > max_connections {
                // Framed FATAL error so the client has something to display.
                let msg = BackendMessage::Error(NoticeFields::severe(
                    "FATAL",
                    "53300",
                    format!(
                        "sorry, too many clients already ({current} of {max_connections} connections used)"
                    ),
                ));
                let mut stream = stream;
                let _ = stream.write_all(&encode_response(&msg)).await;
                let _ = stream.flush().await;
            } else {
                match bind_socket(stream, handler) {
                    Ok(binding) => {
                        let id = binding.writer.session_id();
                        if let Err(e) = binding.closed().await {
                            tracing::error!("Connection error (session {}): {}", id, e);
                        }
                        tracing::info!("Connection closed (session {})", id);
                    }
                    Err(e) => tracing::error!("Failed to bind session: {}", e),
                }
            }
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Command, SessionInfo};
    use crate::writer::ResponseWriter;
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl SessionHandler for NoopHandler {
        async fn on_command(
            &self,
            _session: &SessionInfo,
            _command: Command,
            _writer: &ResponseWriter,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_new_server_has_no_active_connections() {
        let server = WireServer::new(ServerConfig::default(), Arc::new(NoopHandler));
        assert_eq!(server.active_connection_count(), 0);
    }

    #[test]
    fn test_config_carries_connection_limit() {
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".into(),
            max_connections: 50,
        };
        let server = WireServer::new(config, Arc::new(NoopHandler));
        assert_eq!(server.config.max_connections, 50);
    }
}
