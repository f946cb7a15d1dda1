//! End-to-end session tests over real sockets: startup handshake, simple
//! query round-trip, handler error recovery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pgrelay_protocol::{
    encode_command, Authentication, BackendMessage, FieldDescription, FrontendMessage,
    ProtocolVersion, ResponseDecoder,
};
use pgrelay_server::{bind_socket, Command, ResponseWriter, SessionHandler, SessionInfo};

/// Serves a canned simple-query exchange: auth-ok on startup, one text
/// row for "SELECT 1", an error for anything else.
struct OneRowHandler;

#[async_trait]
impl SessionHandler for OneRowHandler {
    async fn on_command(
        &self,
        _session: &SessionInfo,
        command: Command,
        writer: &ResponseWriter,
    ) -> anyhow::Result<()> {
        match command.message {
            FrontendMessage::Startup { .. } => {
                writer.authentication(Authentication::Ok).await?;
                writer.ready_for_query(b'I').await?;
            }
            FrontendMessage::Query(sql) if sql == "SELECT 1" => {
                writer
                    .row_description(vec![FieldDescription::text("?column?", 23, 4)])
                    .await?;
                writer.data_row(vec![Some("1".into())]).await?;
                writer.command_complete("SELECT 1").await?;
                writer.ready_for_query(b'I').await?;
            }
            FrontendMessage::Query(sql) => {
                anyhow::bail!("no such table in {sql:?}");
            }
            FrontendMessage::Terminate => {}
            other => anyhow::bail!("unexpected {}", other.name()),
        }
        Ok(())
    }
}

fn startup_frame() -> Vec<u8> {
    let mut params = HashMap::new();
    params.insert("user".to_string(), "u".to_string());
    params.insert("database".to_string(), "d".to_string());
    encode_command(&FrontendMessage::Startup {
        version: ProtocolVersion { major: 3, minor: 0 },
        params,
    })
    .to_vec()
}

async fn spawn_server<H: SessionHandler>(handler: H) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let binding = bind_socket(stream, handler.clone()).unwrap();
            tokio::spawn(async move {
                let _ = binding.closed().await;
            });
        }
    });
    addr
}

async fn read_responses(
    stream: &mut TcpStream,
    decoder: &mut ResponseDecoder,
    count: usize,
) -> Vec<BackendMessage> {
    let mut out = Vec::new();
    let mut buf = BytesMut::with_capacity(4096);
    while out.len() < count {
        buf.clear();
        let n = stream.read_buf(&mut buf).await.unwrap();
        assert!(n > 0, "server closed after {} message(s)", out.len());
        decoder.feed(&buf);
        while let Some(decoded) = decoder.next_response().unwrap() {
            out.push(decoded.into_message());
        }
    }
    out
}

#[tokio::test]
async fn test_simple_query_round_trip() {
    let addr = spawn_server(OneRowHandler).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut decoder = ResponseDecoder::new();

    client.write_all(&startup_frame()).await.unwrap();
    let handshake = read_responses(&mut client, &mut decoder, 2).await;
    assert_eq!(
        handshake,
        vec![
            BackendMessage::Authentication(Authentication::Ok),
            BackendMessage::ReadyForQuery { status: b'I' },
        ]
    );

    client
        .write_all(&encode_command(&FrontendMessage::Query("SELECT 1".into())))
        .await
        .unwrap();
    let result = read_responses(&mut client, &mut decoder, 4).await;
    assert_eq!(
        result,
        vec![
            BackendMessage::RowDescription {
                fields: vec![FieldDescription::text("?column?", 23, 4)],
            },
            BackendMessage::DataRow {
                values: vec![Some("1".into())],
            },
            BackendMessage::CommandComplete {
                tag: "SELECT 1".into(),
            },
            BackendMessage::ReadyForQuery { status: b'I' },
        ]
    );
}

#[tokio::test]
async fn test_handler_error_keeps_session_alive() {
    let addr = spawn_server(OneRowHandler).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut decoder = ResponseDecoder::new();

    client.write_all(&startup_frame()).await.unwrap();
    let _ = read_responses(&mut client, &mut decoder, 2).await;

    client
        .write_all(&encode_command(&FrontendMessage::Query(
            "SELECT * FROM missing".into(),
        )))
        .await
        .unwrap();
    let responses = read_responses(&mut client, &mut decoder, 2).await;
    match &responses[0] {
        BackendMessage::Error(fields) => {
            assert!(fields.message.as_deref().unwrap().contains("missing"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(responses[1], BackendMessage::ReadyForQuery { status: b'I' });

    // The session survives the failed statement.
    client
        .write_all(&encode_command(&FrontendMessage::Query("SELECT 1".into())))
        .await
        .unwrap();
    let result = read_responses(&mut client, &mut decoder, 4).await;
    assert_eq!(
        result[2],
        BackendMessage::CommandComplete {
            tag: "SELECT 1".into(),
        }
    );
}

#[tokio::test]
async fn test_ssl_request_is_declined_before_startup() {
    let addr = spawn_server(OneRowHandler).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client
        .write_all(&encode_command(&FrontendMessage::SslRequest))
        .await
        .unwrap();
    let mut answer = [0u8; 1];
    client.read_exact(&mut answer).await.unwrap();
    assert_eq!(&answer, b"N");

    // The real startup still goes through afterwards.
    let mut decoder = ResponseDecoder::new();
    client.write_all(&startup_frame()).await.unwrap();
    let handshake = read_responses(&mut client, &mut decoder, 2).await;
    assert_eq!(
        handshake[0],
        BackendMessage::Authentication(Authentication::Ok)
    );
}

/// Checks that at most one `on_command` runs at a time per session, even
/// when the client pipelines commands.
struct SerializingHandler {
    in_flight: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl SessionHandler for SerializingHandler {
    async fn on_command(
        &self,
        _session: &SessionInfo,
        command: Command,
        writer: &ResponseWriter,
    ) -> anyhow::Result<()> {
        use std::sync::atomic::Ordering;
        match command.message {
            FrontendMessage::Startup { .. } => {
                writer.authentication(Authentication::Ok).await?;
                writer.ready_for_query(b'I').await?;
            }
            FrontendMessage::Query(_) => {
                let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst);
                anyhow::ensure!(concurrent == 0, "handler invocations overlapped");
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                writer.command_complete("SELECT 0").await?;
                writer.ready_for_query(b'I').await?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_handler_invocations_are_serialized() {
    let addr = spawn_server(SerializingHandler {
        in_flight: std::sync::atomic::AtomicUsize::new(0),
    })
    .await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut decoder = ResponseDecoder::new();

    client.write_all(&startup_frame()).await.unwrap();
    let _ = read_responses(&mut client, &mut decoder, 2).await;

    // Pipeline several queries in one write; each must complete before
    // the next handler call starts.
    let mut pipelined = Vec::new();
    for _ in 0..5 {
        pipelined.extend_from_slice(&encode_command(&FrontendMessage::Query(
            "SELECT 1".into(),
        )));
    }
    client.write_all(&pipelined).await.unwrap();

    let responses = read_responses(&mut client, &mut decoder, 10).await;
    let completes = responses
        .iter()
        .filter(|m| matches!(m, BackendMessage::CommandComplete { .. }))
        .count();
    assert_eq!(completes, 5);
}

#[tokio::test]
async fn test_protocol_violation_tears_down_session() {
    let addr = spawn_server(OneRowHandler).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut decoder = ResponseDecoder::new();

    client.write_all(&startup_frame()).await.unwrap();
    let _ = read_responses(&mut client, &mut decoder, 2).await;

    // An unknown type code is fatal: the server reports it and hangs up.
    client.write_all(&[b'z', 0, 0, 0, 4]).await.unwrap();
    let responses = read_responses(&mut client, &mut decoder, 1).await;
    match &responses[0] {
        BackendMessage::Error(fields) => {
            assert_eq!(fields.severity.as_deref(), Some("FATAL"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}
