//! Typed async writer for frontend commands, used on the upstream side of
//! the proxy to re-serialize modified commands.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use pgrelay_common::trace;
use pgrelay_protocol::frontend::encode;
use pgrelay_protocol::FrontendMessage;

/// Serializes frontend messages onto the upstream write half. Writes are
/// ordered by the internal lock, so forwarded raw bytes and re-encoded
/// replacements interleave exactly as submitted.
#[derive(Clone)]
pub struct CommandWriter {
    session_id: i32,
    inner: Arc<Mutex<OwnedWriteHalf>>,
}

impl CommandWriter {
    pub fn new(session_id: i32, half: OwnedWriteHalf) -> Self {
        Self {
            session_id,
            inner: Arc::new(Mutex::new(half)),
        }
    }

    /// Encode and write one command.
    pub async fn send(&self, msg: &FrontendMessage) -> std::io::Result<()> {
        trace::log_message("→upstream", self.session_id, msg.name(), msg);
        let buf = encode(msg);
        let mut guard = self.inner.lock().await;
        guard.write_all(&buf).await?;
        guard.flush().await
    }

    /// Write pre-encoded bytes untouched (transparent forwarding path).
    pub async fn send_raw(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut guard = self.inner.lock().await;
        guard.write_all(bytes).await?;
        guard.flush().await
    }
}
