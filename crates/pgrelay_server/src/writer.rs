//! Typed async writer for backend responses.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use pgrelay_common::trace;
use pgrelay_protocol::backend::{encode, Authentication, BackendMessage, FieldDescription};
use pgrelay_protocol::notice::NoticeFields;

/// Serializes backend messages onto the session's write half.
///
/// Cloneable so unsolicited responses (notifications, async notices) can be
/// pushed from outside the session task; the internal lock keeps writes in
/// submission order. Every method returns once the bytes have been handed
/// to the socket.
#[derive(Clone)]
pub struct ResponseWriter {
    session_id: i32,
    inner: Arc<Mutex<OwnedWriteHalf>>,
}

impl ResponseWriter {
    pub fn new(session_id: i32, half: OwnedWriteHalf) -> Self {
        Self {
            session_id,
            inner: Arc::new(Mutex::new(half)),
        }
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Encode and write one message.
    pub async fn send(&self, msg: &BackendMessage) -> std::io::Result<()> {
        trace::log_message("→client", self.session_id, msg.name(), msg);
        let buf = encode(msg);
        let mut guard = self.inner.lock().await;
        guard.write_all(&buf).await?;
        guard.flush().await
    }

    /// Write several messages as one submission, preserving order.
    pub async fn send_all(&self, msgs: &[BackendMessage]) -> std::io::Result<()> {
        let mut buf = Vec::new();
        for msg in msgs {
            trace::log_message("→client", self.session_id, msg.name(), msg);
            buf.extend_from_slice(&encode(msg));
        }
        let mut guard = self.inner.lock().await;
        guard.write_all(&buf).await?;
        guard.flush().await
    }

    /// Write pre-encoded bytes untouched (proxy forwarding path).
    pub async fn send_raw(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut guard = self.inner.lock().await;
        guard.write_all(bytes).await?;
        guard.flush().await
    }

    pub async fn authentication(&self, auth: Authentication) -> std::io::Result<()> {
        self.send(&BackendMessage::Authentication(auth)).await
    }

    pub async fn ready_for_query(&self, status: u8) -> std::io::Result<()> {
        self.send(&BackendMessage::ReadyForQuery { status }).await
    }

    pub async fn parameter_status(&self, name: &str, value: &str) -> std::io::Result<()> {
        self.send(&BackendMessage::ParameterStatus {
            name: name.into(),
            value: value.into(),
        })
        .await
    }

    pub async fn backend_key_data(&self, process_id: i32, secret_key: i32) -> std::io::Result<()> {
        self.send(&BackendMessage::BackendKeyData {
            process_id,
            secret_key,
        })
        .await
    }

    pub async fn row_description(&self, fields: Vec<FieldDescription>) -> std::io::Result<()> {
        self.send(&BackendMessage::RowDescription { fields }).await
    }

    pub async fn data_row(&self, values: Vec<Option<String>>) -> std::io::Result<()> {
        self.send(&BackendMessage::DataRow { values }).await
    }

    pub async fn command_complete(&self, tag: &str) -> std::io::Result<()> {
        self.send(&BackendMessage::CommandComplete { tag: tag.into() })
            .await
    }

    pub async fn notification(
        &self,
        process_id: i32,
        channel: &str,
        payload: &str,
    ) -> std::io::Result<()> {
        self.send(&BackendMessage::NotificationResponse {
            process_id,
            channel: channel.into(),
            payload: payload.into(),
        })
        .await
    }

    pub async fn error(&self, fields: impl Into<NoticeFields>) -> std::io::Result<()> {
        self.send(&BackendMessage::Error(fields.into())).await
    }

    pub async fn notice(&self, fields: impl Into<NoticeFields>) -> std::io::Result<()> {
        self.send(&BackendMessage::Notice(fields.into())).await
    }
}
