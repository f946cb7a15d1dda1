//! Session binding: couples a socket to the codecs and dispatches typed
//! commands to a user-supplied handler.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use pgrelay_common::trace;
use pgrelay_protocol::{
    BackendMessage, CommandDecoder, FrontendMessage, NoticeFields, ProtocolError,
};

use crate::writer::ResponseWriter;

static NEXT_SESSION_ID: AtomicI32 = AtomicI32::new(1);

/// A decoded command plus the exact wire bytes it was decoded from,
/// already copied out of the decoder buffer so the handler may hold them
/// across awaits.
#[derive(Debug, Clone)]
pub struct Command {
    pub message: FrontendMessage,
    pub raw: Bytes,
}

/// Identity of one bound session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session ID; doubles as the PG backend process ID.
    pub id: i32,
    pub peer_addr: SocketAddr,
}

/// Per-session capability set. All invocations for one session are
/// serialized: the k-th call completes before the (k+1)-th begins.
///
/// `on_command` receives every decoded command, the startup included; the
/// binder performs no handshake logic of its own. Errors returned from
/// `on_command` are reported to the client as an ErrorResponse followed by
/// ReadyForQuery('I') and the session continues.
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    async fn on_connect(
        &self,
        _session: &SessionInfo,
        _writer: &ResponseWriter,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_command(
        &self,
        session: &SessionInfo,
        command: Command,
        writer: &ResponseWriter,
    ) -> anyhow::Result<()>;
}

/// A bound session: the writer for unsolicited responses plus the handle
/// of the read task.
pub struct SessionBinding {
    pub writer: ResponseWriter,
    task: JoinHandle<Result<(), ProtocolError>>,
}

impl SessionBinding {
    /// Wait for the session to end. Protocol violations surface here;
    /// a clean client close is `Ok`.
    pub async fn closed(self) -> Result<(), ProtocolError> {
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(ProtocolError::Io(std::io::Error::other(join_err))),
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Couple a client socket to a command decoder and a response writer and
/// start dispatching to `handler`. Disables Nagle coalescing so responses
/// leave with low latency.
pub fn bind_socket<H: SessionHandler>(
    stream: TcpStream,
    handler: Arc<H>,
) -> std::io::Result<SessionBinding> {
    stream.set_nodelay(true)?;
    let peer_addr = stream.peer_addr()?;
    let id = NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst);
    let (read_half, write_half) = stream.into_split();
    let writer = ResponseWriter::new(id, write_half);
    let info = SessionInfo { id, peer_addr };
    let task = tokio::spawn(run_session(read_half, writer.clone(), handler, info));
    Ok(SessionBinding { writer, task })
}

async fn run_session<H: SessionHandler>(
    mut read_half: OwnedReadHalf,
    writer: ResponseWriter,
    handler: Arc<H>,
    info: SessionInfo,
) -> Result<(), ProtocolError> {
    if let Err(e) = handler.on_connect(&info, &writer).await {
        tracing::warn!("on_connect rejected session {}: {:#}", info.id, e);
        let _ = writer
            .error(NoticeFields::severe("FATAL", "08004", format!("{e:#}")))
            .await;
        return Ok(());
    }

    let mut decoder = CommandDecoder::new();
    let mut chunk = BytesMut::with_capacity(8192);

    loop {
        chunk.clear();
        let n = read_half.read_buf(&mut chunk).await?;
        if n == 0 {
            tracing::debug!("client closed session {}", info.id);
            return Ok(());
        }
        decoder.feed(&chunk);

        loop {
            let decoded = match decoder.next_command() {
                Ok(Some(decoded)) => decoded,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("protocol error on session {}: {}", info.id, e);
                    let _ = writer
                        .error(NoticeFields::severe("FATAL", "08P01", e.to_string()))
                        .await;
                    return Err(e);
                }
            };

            // Realize the raw bytes before anything awaits; the decoder
            // buffer may be overwritten by the next inbound chunk.
            let raw = decoded.raw_owned();
            let message = decoded.into_message();
            trace::log_message("client→", info.id, message.name(), &message);

            if matches!(message, FrontendMessage::SslRequest) {
                writer.send_raw(b"N").await?;
                continue;
            }

            let terminate = matches!(message, FrontendMessage::Terminate);
            let command = Command { message, raw };
            if let Err(e) = handler.on_command(&info, command, &writer).await {
                tracing::debug!("handler error on session {}: {:#}", info.id, e);
                writer
                    .send_all(&[
                        BackendMessage::Error(NoticeFields::severe(
                            "ERROR",
                            "XX000",
                            format!("{e:#}"),
                        )),
                        BackendMessage::ReadyForQuery { status: b'I' },
                    ])
                    .await?;
            }
            if terminate {
                tracing::debug!("client terminated session {}", info.id);
                return Ok(());
            }
        }
    }
}
