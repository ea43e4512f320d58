//! HTTP surface for the stock analysis service.
//!
//! Thin axum layer over the orchestrator: parses query parameters, maps
//! domain errors to status codes, and bridges the staged event channel into
//! an NDJSON response body.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use ai_analyzer::OpenAiAnalyzer;
use analysis_core::AnalysisError;
use analysis_orchestrator::StockAnalyzer;
use market_data::AkToolsClient;

pub mod routes;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<StockAnalyzer>,
}

/// Handler-level error: a domain error plus its HTTP mapping.
#[derive(Debug)]
pub struct AppError(pub AnalysisError);

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        Self(err)
    }
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            AnalysisError::NotFound(_) | AnalysisError::NoResult(_) => StatusCode::NOT_FOUND,
            AnalysisError::DataUnavailable(_) => StatusCode::BAD_REQUEST,
            AnalysisError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

/// Assemble the full route table with CORS and request tracing.
pub fn router(state: AppState) -> axum::Router {
    routes::routes()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire up real collaborators from the environment and serve forever.
pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let provider = Arc::new(AkToolsClient::from_env());
    let narrative = Arc::new(OpenAiAnalyzer::from_env());
    let state = AppState {
        analyzer: Arc::new(StockAnalyzer::new(provider, narrative)),
    };

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
