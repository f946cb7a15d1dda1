//! `pgrelay` binary: PG wire protocol server emulator and proxy.

use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pgrelay_common::config::{ProxyConfig, ServerConfig};
use pgrelay_protocol::{Authentication, FrontendMessage};
use pgrelay_proxy::{ForwardAll, ProxyServer, QueryDecision, QueryHook};
use pgrelay_server::{Command, ResponseWriter, SessionHandler, SessionInfo, WireServer};

#[derive(Parser)]
#[command(name = "pgrelay", about = "PostgreSQL wire protocol proxy and emulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept PG connections and emulate an empty server (honeypot mode).
    Serve {
        #[arg(long, default_value = "127.0.0.1:5432")]
        listen: String,
        /// Maximum concurrent connections (0 = unlimited).
        #[arg(long, default_value_t = 0)]
        max_connections: usize,
    },
    /// Relay client sessions to a real server, optionally rejecting queries.
    Proxy {
        #[arg(long, default_value = "127.0.0.1:6432")]
        listen: String,
        #[arg(long, default_value = "127.0.0.1:5432")]
        upstream: String,
        /// Reject any query containing one of these substrings.
        #[arg(long)]
        deny: Vec<String>,
    },
}

/// Emulated server: trust auth, every statement succeeds with an empty
/// result. Enough protocol to keep psql and drivers talking, which is all
/// a honeypot needs.
struct EmulatorHandler;

impl EmulatorHandler {
    fn secret_key() -> i32 {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};
        let s = RandomState::new();
        s.build_hasher().finish() as i32
    }

    fn command_tag(sql: &str) -> String {
        let keyword = sql
            .split_whitespace()
            .next()
            .unwrap_or("SELECT")
            .to_uppercase();
        match keyword.as_str() {
            "SELECT" => "SELECT 0".into(),
            "INSERT" => "INSERT 0 0".into(),
            "UPDATE" => "UPDATE 0".into(),
            "DELETE" => "DELETE 0".into(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
impl SessionHandler for EmulatorHandler {
    async fn on_command(
        &self,
        session: &SessionInfo,
        command: Command,
        writer: &ResponseWriter,
    ) -> anyhow::Result<()> {
        match command.message {
            FrontendMessage::Startup { params, .. } => {
                tracing::info!(
                    "session {} startup: user={:?} database={:?}",
                    session.id,
                    params.get("user"),
                    params.get("database"),
                );
                writer.authentication(Authentication::Ok).await?;
                writer.parameter_status("server_version", "15.0 (pgrelay)").await?;
                writer.parameter_status("server_encoding", "UTF8").await?;
                writer.parameter_status("client_encoding", "UTF8").await?;
                writer.parameter_status("DateStyle", "ISO, MDY").await?;
                writer.parameter_status("integer_datetimes", "on").await?;
                writer
                    .parameter_status("standard_conforming_strings", "on")
                    .await?;
                writer
                    .backend_key_data(session.id, Self::secret_key())
                    .await?;
                writer.ready_for_query(b'I').await?;
            }
            FrontendMessage::Query(sql) => {
                tracing::info!("session {} query: {}", session.id, sql);
                if sql.trim().is_empty() {
                    writer
                        .send(&pgrelay_protocol::BackendMessage::EmptyQueryResponse)
                        .await?;
                } else {
                    writer.command_complete(&Self::command_tag(&sql)).await?;
                }
                writer.ready_for_query(b'I').await?;
            }
            FrontendMessage::Parse { query, .. } => {
                tracing::info!("session {} parse: {}", session.id, query);
                writer
                    .send(&pgrelay_protocol::BackendMessage::ParseComplete)
                    .await?;
            }
            FrontendMessage::Bind { .. } => {
                writer
                    .send(&pgrelay_protocol::BackendMessage::BindComplete)
                    .await?;
            }
            FrontendMessage::Describe { .. } => {
                writer.send(&pgrelay_protocol::BackendMessage::NoData).await?;
            }
            FrontendMessage::Close { .. } => {
                writer
                    .send(&pgrelay_protocol::BackendMessage::CloseComplete)
                    .await?;
            }
            FrontendMessage::Execute { .. } => {
                writer.command_complete("SELECT 0").await?;
            }
            FrontendMessage::Sync => {
                writer.ready_for_query(b'I').await?;
            }
            other => {
                tracing::debug!("session {} ignoring {}", session.id, other.name());
            }
        }
        Ok(())
    }
}

/// Rejects queries mentioning any of the configured substrings.
struct DenyList {
    patterns: Vec<String>,
}

#[async_trait]
impl QueryHook for DenyList {
    async fn on_query(&self, sql: &str) -> QueryDecision {
        let lowered = sql.to_lowercase();
        for pattern in &self.patterns {
            if lowered.contains(&pattern.to_lowercase()) {
                return QueryDecision::Reject(format!(
                    "statement rejected by policy (matched {:?})",
                    pattern
                ));
            }
        }
        QueryDecision::Pass
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            listen,
            max_connections,
        } => {
            let config = ServerConfig {
                listen_addr: listen,
                max_connections,
            };
            WireServer::new(config, Arc::new(EmulatorHandler)).run().await
        }
        Commands::Proxy {
            listen,
            upstream,
            deny,
        } => {
            let config = ProxyConfig {
                listen_addr: listen,
                upstream_addr: upstream,
                max_connections: 0,
            };
            if deny.is_empty() {
                ProxyServer::new(config, ForwardAll).run().await
            } else {
                ProxyServer::intercepting(config, DenyList { patterns: deny })
                    .run()
                    .await
            }
        }
    }
}
