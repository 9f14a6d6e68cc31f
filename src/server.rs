//! HTTP server for legal research queries

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::agent::SharedResearchAgent;
use crate::config::ServerConfig;
use crate::error::AgentError;
use crate::types::{AgentResponse, ContextHints, HealthStatus, Query, Strategy};

/// Wire form of a research query
#[derive(Debug, Deserialize)]
pub struct QueryRequestHttp {
    pub query: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub hints: ContextHints,
}

impl From<QueryRequestHttp> for Query {
    fn from(req: QueryRequestHttp) -> Self {
        Query {
            text: req.query,
            user_id: req.user_id,
            conversation_id: req.conversation_id,
            explicit_strategy: req.strategy,
            hints: req.hints,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    #[serde(flatten)]
    pub detail: HealthStatus,
}

/// Cancels the run if the client disconnects and axum drops the handler
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn query_handler(
    State(agent): State<SharedResearchAgent>,
    Json(req): Json<QueryRequestHttp>,
) -> Result<Json<AgentResponse>, (StatusCode, Json<ErrorResponse>)> {
    info!("Received query: user_id={:?}, strategy={:?}", req.user_id, req.strategy);

    let token = CancellationToken::new();
    let _guard = CancelOnDrop(token.clone());

    match agent.answer_with_cancellation(req.into(), token.clone()).await {
        Ok(response) => Ok(Json(response)),
        Err(AgentError::EmptyQuery) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Query text must not be empty".to_string(),
                details: None,
            }),
        )),
        Err(e) => {
            error!("Query failed: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Query failed".to_string(),
                    details: Some(e.to_string()),
                }),
            ))
        }
    }
}

async fn health_handler(State(agent): State<SharedResearchAgent>) -> Json<HealthResponse> {
    let detail = agent.status().await;
    let status = if detail.pipeline_available { "healthy" } else { "degraded" };
    Json(HealthResponse {
        status: status.to_string(),
        service: "lexagent".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        detail,
    })
}

pub fn create_router(agent: SharedResearchAgent) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/query", post(query_handler))
        .with_state(agent)
}

/// Run the HTTP server until the process is stopped
pub async fn run_server(agent: SharedResearchAgent, config: &ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting lexagent server on {}", addr);

    let app = create_router(agent);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_maps_to_query() {
        let req: QueryRequestHttp = serde_json::from_str(
            r#"{"query":"Can I break my lease?","user_id":"u1","strategy":"quick","hints":{"urgency":"high"}}"#,
        )
        .unwrap();
        let query: Query = req.into();
        assert_eq!(query.text, "Can I break my lease?");
        assert_eq!(query.user_id.as_deref(), Some("u1"));
        assert_eq!(query.explicit_strategy, Some(Strategy::Quick));
        assert_eq!(query.hints.urgency, Some(crate::types::Urgency::High));
    }
}
