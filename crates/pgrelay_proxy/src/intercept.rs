//! Simple-query interception: inspect, rewrite, or reject the SQL carried
//! by Query and Parse without terminating the session.

use async_trait::async_trait;

use pgrelay_protocol::{BackendMessage, FrontendMessage, NoticeFields};
use pgrelay_server::Command;

use crate::proxy::{CommandAction, ProxyPolicy};

/// Outcome of inspecting one SQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryDecision {
    /// Forward the original bytes unchanged.
    Pass,
    /// Replace the SQL text and re-serialize the command.
    Rewrite(String),
    /// Refuse the statement; the client gets this error text followed by
    /// ReadyForQuery('I'), the upstream sees nothing.
    Reject(String),
}

/// User hook invoked with the SQL of every Query/Parse command.
#[async_trait]
pub trait QueryHook: Send + Sync + 'static {
    async fn on_query(&self, sql: &str) -> QueryDecision;
}

#[async_trait]
impl<F> QueryHook for F
where
    F: Fn(&str) -> QueryDecision + Send + Sync + 'static,
{
    async fn on_query(&self, sql: &str) -> QueryDecision {
        self(sql)
    }
}

/// Proxy policy that applies a [`QueryHook`] to Query and Parse commands
/// and forwards everything else untouched.
pub struct QueryInterceptor<H: QueryHook> {
    hook: H,
}

impl<H: QueryHook> QueryInterceptor<H> {
    pub fn new(hook: H) -> Self {
        Self { hook }
    }

    async fn apply(
        &self,
        sql: &str,
        rebuild: impl FnOnce(String) -> FrontendMessage + Send,
    ) -> CommandAction {
        match self.hook.on_query(sql).await {
            QueryDecision::Pass => CommandAction::Forward,
            QueryDecision::Rewrite(new_sql) => {
                if new_sql == sql {
                    CommandAction::Forward
                } else {
                    CommandAction::Replace(rebuild(new_sql))
                }
            }
            QueryDecision::Reject(message) => CommandAction::Respond(vec![
                BackendMessage::Error(NoticeFields::from(message)),
                BackendMessage::ReadyForQuery { status: b'I' },
            ]),
        }
    }
}

#[async_trait]
impl<H: QueryHook> ProxyPolicy for QueryInterceptor<H> {
    async fn on_command(&self, command: &Command) -> anyhow::Result<CommandAction> {
        match &command.message {
            FrontendMessage::Query(sql) => Ok(self.apply(sql, FrontendMessage::Query).await),
            FrontendMessage::Parse {
                name,
                query,
                param_types,
            } => {
                let name = name.clone();
                let param_types = param_types.clone();
                Ok(self
                    .apply(query, move |new_sql| FrontendMessage::Parse {
                        name,
                        query: new_sql,
                        param_types,
                    })
                    .await)
            }
            _ => Ok(CommandAction::Forward),
        }
    }
}

impl<H: QueryHook> crate::proxy::ProxyServer<QueryInterceptor<H>> {
    /// A proxy whose only policy is a query hook: the simple-query
    /// interceptor.
    pub fn intercepting(config: pgrelay_common::config::ProxyConfig, hook: H) -> Self {
        Self::new(config, QueryInterceptor::new(hook))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pgrelay_protocol::encode_command;

    fn command(message: FrontendMessage) -> Command {
        let raw = Bytes::copy_from_slice(&encode_command(&message));
        Command { message, raw }
    }

    fn hook(sql: &str) -> QueryDecision {
        if sql.contains("forbidden_table") {
            QueryDecision::Reject("forbidden".into())
        } else if sql == "SELECT * FROM a" {
            QueryDecision::Rewrite("SELECT * FROM b".into())
        } else {
            QueryDecision::Pass
        }
    }

    #[tokio::test]
    async fn test_pass_forwards_original() {
        let interceptor = QueryInterceptor::new(hook);
        let action = interceptor
            .on_command(&command(FrontendMessage::Query("SELECT 1".into())))
            .await
            .unwrap();
        assert!(matches!(action, CommandAction::Forward));
    }

    #[tokio::test]
    async fn test_rewrite_replaces_query_text() {
        let interceptor = QueryInterceptor::new(hook);
        let action = interceptor
            .on_command(&command(FrontendMessage::Query("SELECT * FROM a".into())))
            .await
            .unwrap();
        match action {
            CommandAction::Replace(FrontendMessage::Query(sql)) => {
                assert_eq!(sql, "SELECT * FROM b");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rewrite_to_identity_forwards_raw() {
        let interceptor = QueryInterceptor::new(|_: &str| {
            QueryDecision::Rewrite("SELECT 1".into())
        });
        let action = interceptor
            .on_command(&command(FrontendMessage::Query("SELECT 1".into())))
            .await
            .unwrap();
        assert!(matches!(action, CommandAction::Forward));
    }

    #[tokio::test]
    async fn test_reject_answers_client_directly() {
        let interceptor = QueryInterceptor::new(hook);
        let action = interceptor
            .on_command(&command(FrontendMessage::Query(
                "SELECT * FROM forbidden_table".into(),
            )))
            .await
            .unwrap();
        match action {
            CommandAction::Respond(responses) => {
                assert_eq!(responses.len(), 2);
                match &responses[0] {
                    BackendMessage::Error(fields) => {
                        assert_eq!(fields.message.as_deref(), Some("forbidden"));
                    }
                    other => panic!("unexpected: {other:?}"),
                }
                assert_eq!(
                    responses[1],
                    BackendMessage::ReadyForQuery { status: b'I' }
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parse_is_intercepted_too() {
        let interceptor = QueryInterceptor::new(hook);
        let action = interceptor
            .on_command(&command(FrontendMessage::Parse {
                name: "q".into(),
                query: "SELECT * FROM a".into(),
                param_types: vec![23],
            }))
            .await
            .unwrap();
        match action {
            CommandAction::Replace(FrontendMessage::Parse {
                name,
                query,
                param_types,
            }) => {
                assert_eq!(name, "q");
                assert_eq!(query, "SELECT * FROM b");
                assert_eq!(param_types, vec![23]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_query_commands_forward() {
        let interceptor = QueryInterceptor::new(hook);
        let action = interceptor
            .on_command(&command(FrontendMessage::Sync))
            .await
            .unwrap();
        assert!(matches!(action, CommandAction::Forward));
    }
}
