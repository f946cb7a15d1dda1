//! Proxy orchestrator: cross-wires a client session with an upstream
//! server connection and applies the user policy in both directions.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};

use pgrelay_common::config::ProxyConfig;
use pgrelay_common::trace;
use pgrelay_protocol::{
    encode_response, BackendMessage, CommandDecoder, FrontendMessage, NoticeFields,
    ProtocolError, ResponseDecoder,
};
use pgrelay_server::{Command, ResponseWriter, SessionInfo};

use crate::command_writer::CommandWriter;
use crate::connect::{TcpConnector, UpstreamConnector};

/// What to do with one inbound client command.
#[derive(Debug)]
pub enum CommandAction {
    /// Forward the original raw bytes upstream, unchanged.
    Forward,
    /// Re-serialize a replacement command and send that instead.
    Replace(FrontendMessage),
    /// Answer the client directly; nothing reaches the upstream.
    Respond(Vec<BackendMessage>),
}

/// What to do with one inbound upstream response.
#[derive(Debug)]
pub enum ResponseAction {
    /// Forward the original raw bytes to the client, unchanged.
    Forward,
    /// Send replacement responses instead.
    Replace(Vec<BackendMessage>),
    /// Swallow the response.
    Drop,
}

/// A decoded upstream response plus its exact wire bytes, already copied
/// out of the decoder buffer.
#[derive(Debug, Clone)]
pub struct Response {
    pub message: BackendMessage,
    pub raw: Bytes,
}

/// Per-session proxy policy. Invocations are serialized per direction;
/// the defaults make the proxy fully transparent.
#[async_trait]
pub trait ProxyPolicy: Send + Sync + 'static {
    async fn on_connect(&self, _session: &SessionInfo) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_command(&self, _command: &Command) -> anyhow::Result<CommandAction> {
        Ok(CommandAction::Forward)
    }

    async fn on_result(&self, _response: &Response) -> anyhow::Result<ResponseAction> {
        Ok(ResponseAction::Forward)
    }
}

/// The transparent policy: every byte is forwarded untouched.
pub struct ForwardAll;

#[async_trait]
impl ProxyPolicy for ForwardAll {}

/// TCP proxy between PG clients and a real PG server.
pub struct ProxyServer<P: ProxyPolicy, C: UpstreamConnector = TcpConnector> {
    config: ProxyConfig,
    policy: Arc<P>,
    connector: Arc<C>,
    next_session_id: AtomicI32,
    active_connections: Arc<AtomicUsize>,
}

impl<P: ProxyPolicy> ProxyServer<P, TcpConnector> {
    pub fn new(config: ProxyConfig, policy: P) -> Self {
        let connector = TcpConnector::new(config.upstream_addr.clone());
        Self::with_connector(config, policy, connector)
    }
}

impl<P: ProxyPolicy, C: UpstreamConnector> ProxyServer<P, C> {
    pub fn with_connector(config: ProxyConfig, policy: P, connector: C) -> Self {
        Self {
            config,
            policy: Arc::new(policy),
            connector: Arc::new(connector),
            next_session_id: AtomicI32::new(1),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Start the proxy and listen for client connections.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        tracing::info!(
            "pgrelay proxy listening on {} (upstream {})",
            self.config.listen_addr,
            self.config.upstream_addr
        );
        self.run_on(listener).await
    }

    /// Serve client connections from an already-bound listener.
    pub async fn run_on(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            tracing::info!("New client connection from {}", addr);
            self.spawn_session(stream);
        }
    }

    fn spawn_session(&self, stream: TcpStream) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let policy = self.policy.clone();
        let connector = self.connector.clone();
        let active = self.active_connections.clone();
        let max_connections = self.config.max_connections;
        let current = active.fetch_add(1, Ordering::Relaxed) + 1;

        tokio::spawn(async move {
            if max_connections > 0 && current > max_connections {
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
            } else if let Err(e) = handle_session(stream, policy, connector, session_id).await {
                tracing::error!("Proxy session error (session {}): {}", session_id, e);
            }
            active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!("Proxy session closed (session {})", session_id);
        });
    }
}

async fn handle_session<P: ProxyPolicy, C: UpstreamConnector>(
    client: TcpStream,
    policy: Arc<P>,
    connector: Arc<C>,
    session_id: i32,
) -> Result<(), ProtocolError> {
    client.set_nodelay(true)?;
    let peer_addr = client.peer_addr()?;
    let info = SessionInfo {
        id: session_id,
        peer_addr,
    };

    let (mut client_read, client_write) = client.into_split();
    let client_writer = ResponseWriter::new(session_id, client_write);
    let mut decoder = CommandDecoder::new();
    let mut chunk = BytesMut::with_capacity(8192);

    // Phase 1: read the client's startup packet. SSL requests are declined
    // with 'N' and cancel requests are relayed on a throwaway connection,
    // both without entering the session proper.
    let startup_raw: Bytes = 'startup: loop {
        chunk.clear();
        let n = client_read.read_buf(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        decoder.feed(&chunk);

        loop {
            let decoded = match decoder.next_command()? {
                Some(decoded) => decoded,
                None => break,
            };
            let raw = decoded.raw_owned();
            let message = decoded.into_message();
            trace::log_message("client→", session_id, message.name(), &message);
            match message {
                FrontendMessage::SslRequest => client_writer.send_raw(b"N").await?,
                FrontendMessage::CancelRequest { .. } => {
                    if let Ok(mut upstream) = connector.connect().await {
                        let _ = upstream.write_all(&raw).await;
                        let _ = upstream.flush().await;
                    }
                    return Ok(());
                }
                FrontendMessage::Startup { .. } => break 'startup raw,
                other => {
                    return Err(ProtocolError::InvalidFrame(format!(
                        "unexpected {} during startup",
                        other.name()
                    )));
                }
            }
        }
    };

    if let Err(e) = policy.on_connect(&info).await {
        tracing::warn!("policy rejected session {}: {:#}", session_id, e);
        let _ = client_writer
            .error(NoticeFields::severe("FATAL", "08004", format!("{e:#}")))
            .await;
        return Ok(());
    }

    // Phase 2: open the upstream and replay the startup bytes verbatim.
    let upstream = match connector.connect().await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!("upstream connect failed (session {}): {}", session_id, e);
            let _ = client_writer
                .error(NoticeFields::severe(
                    "FATAL",
                    "08006",
                    format!("could not connect to upstream: {e}"),
                ))
                .await;
            return Ok(());
        }
    };
    upstream.set_nodelay(true)?;
    let (upstream_read, upstream_write) = upstream.into_split();
    let upstream_writer = CommandWriter::new(session_id, upstream_write);
    upstream_writer.send_raw(&startup_raw).await?;

    // Phase 3: pump both directions until either side closes. Closing one
    // side tears down the other: both halves drop when this frame returns.
    let mut downstream = tokio::spawn(run_downstream(
        upstream_read,
        client_writer.clone(),
        policy.clone(),
        session_id,
    ));
    let client_loop = run_client_loop(
        client_read,
        decoder,
        client_writer,
        upstream_writer,
        policy,
        info,
    );
    tokio::pin!(client_loop);

    let result = tokio::select! {
        res = &mut downstream => match res {
            Ok(inner) => inner,
            Err(join_err) => Err(ProtocolError::Io(std::io::Error::other(join_err))),
        },
        res = &mut client_loop => res,
    };
    downstream.abort();
    result
}

async fn run_client_loop<P: ProxyPolicy>(
    mut client_read: OwnedReadHalf,
    mut decoder: CommandDecoder,
    client_writer: ResponseWriter,
    upstream_writer: CommandWriter,
    policy: Arc<P>,
    info: SessionInfo,
) -> Result<(), ProtocolError> {
    let mut chunk = BytesMut::with_capacity(8192);

    loop {
        // Drain everything buffered (the startup read may have pipelined
        // commands behind it) before touching the socket again.
        loop {
            let decoded = match decoder.next_command() {
                Ok(Some(decoded)) => decoded,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("protocol error on session {}: {}", info.id, e);
                    let _ = client_writer
                        .error(NoticeFields::severe("FATAL", "08P01", e.to_string()))
                        .await;
                    return Err(e);
                }
            };

            // Realize the raw bytes before the policy awaits; the decoder
            // buffer may be overwritten by the next inbound chunk.
            let raw = decoded.raw_owned();
            let message = decoded.into_message();
            trace::log_message("client→", info.id, message.name(), &message);

            let terminate = matches!(message, FrontendMessage::Terminate);
            let command = Command { message, raw };
            match policy.on_command(&command).await {
                Ok(CommandAction::Forward) => upstream_writer.send_raw(&command.raw).await?,
                Ok(CommandAction::Replace(replacement)) => {
                    upstream_writer.send(&replacement).await?
                }
                Ok(CommandAction::Respond(responses)) => {
                    client_writer.send_all(&responses).await?
                }
                Err(e) => {
                    tracing::debug!("policy error on session {}: {:#}", info.id, e);
                    client_writer
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
            }
            if terminate {
                tracing::debug!("client terminated session {}", info.id);
                return Ok(());
            }
        }

        chunk.clear();
        let n = client_read.read_buf(&mut chunk).await?;
        if n == 0 {
            tracing::debug!("client closed session {}", info.id);
            return Ok(());
        }
        decoder.feed(&chunk);
    }
}

async fn run_downstream<P: ProxyPolicy>(
    mut upstream_read: OwnedReadHalf,
    client_writer: ResponseWriter,
    policy: Arc<P>,
    session_id: i32,
) -> Result<(), ProtocolError> {
    let mut decoder = ResponseDecoder::new();
    let mut chunk = BytesMut::with_capacity(8192);

    loop {
        chunk.clear();
        let n = match upstream_read.read_buf(&mut chunk).await {
            Ok(n) => n,
            Err(e) => {
                let _ = client_writer
                    .error(NoticeFields::severe(
                        "FATAL",
                        "08006",
                        format!("upstream connection error: {e}"),
                    ))
                    .await;
                return Err(e.into());
            }
        };
        if n == 0 {
            tracing::debug!("upstream closed session {}", session_id);
            return Ok(());
        }
        decoder.feed(&chunk);

        loop {
            let decoded = match decoder.next_response() {
                Ok(Some(decoded)) => decoded,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("upstream protocol error on session {}: {}", session_id, e);
                    let _ = client_writer
                        .error(NoticeFields::severe("FATAL", "08P01", e.to_string()))
                        .await;
                    return Err(e);
                }
            };

            let raw = decoded.raw_owned();
            let message = decoded.into_message();
            trace::log_message("upstream→", session_id, message.name(), &message);

            let response = Response { message, raw };
            match policy.on_result(&response).await {
                Ok(ResponseAction::Forward) => client_writer.send_raw(&response.raw).await?,
                Ok(ResponseAction::Replace(responses)) => {
                    client_writer.send_all(&responses).await?
                }
                Ok(ResponseAction::Drop) => {}
                Err(e) => {
                    tracing::warn!(
                        "result policy error on session {}, forwarding unchanged: {:#}",
                        session_id,
                        e
                    );
                    client_writer.send_raw(&response.raw).await?;
                }
            }
        }
    }
}
