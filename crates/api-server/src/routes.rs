//! Analysis API routes.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use analysis_core::{
    AggregatedAnalysis, AnalysisError, AnalysisRequest, MarketType, StageEvent,
};
use technical_analysis::{classify_row, score_series};

use crate::{AppError, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stock_analyzer", get(stock_analyzer))
        .route("/stock_price", get(stock_price))
        .route("/stock_technical_analysis", get(stock_technical_analysis))
        .route("/stock_score", get(stock_score))
        .route("/stock_ai_analysis", get(stock_ai_analysis))
        .route("/health", get(health))
}

#[derive(Debug, Deserialize)]
pub struct AnalysisQuery {
    pub stock_code: String,
    #[serde(default = "default_market")]
    pub market_type: String,
}

fn default_market() -> String {
    "A".to_string()
}

impl AnalysisQuery {
    fn into_request(self) -> AnalysisRequest {
        let market = MarketType::from_code(&self.market_type);
        AnalysisRequest::new(self.stock_code, market)
    }
}

/// Turn the staged event channel into an NDJSON body, one event per line.
fn ndjson_body(rx: mpsc::Receiver<StageEvent>) -> Body {
    Body::from_stream(stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let mut line = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        line.push('\n');
        Some((Ok::<_, Infallible>(Bytes::from(line)), rx))
    }))
}

/// Full incremental analysis: basic summary, narrative chunks, completion.
/// Failures surface as a terminal error line, not as an HTTP status.
async fn stock_analyzer(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> impl IntoResponse {
    let rx = state.analyzer.analyze_stream(query.into_request());
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        ndjson_body(rx),
    )
}

#[derive(Debug, Serialize)]
struct PriceResponse {
    stock_code: String,
    market_type: String,
    date: String,
    price: f64,
    open: f64,
    high: f64,
    low: f64,
    volume: f64,
    price_change_value: f64,
    change_percent: Option<f64>,
}

async fn stock_price(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Json<PriceResponse>, AppError> {
    let request = query.into_request();
    let bars = state.analyzer.fetch_bars(&request).await?;

    let latest = bars.last().ok_or_else(|| {
        AnalysisError::NotFound(format!("no data for {}", request.stock_code))
    })?;
    let prev_close = match bars.len() {
        0 | 1 => latest.close,
        n => bars[n - 2].close,
    };
    let change_percent = latest.change_percent.or_else(|| {
        (prev_close != 0.0).then(|| (latest.close - prev_close) / prev_close * 100.0)
    });

    Ok(Json(PriceResponse {
        stock_code: request.stock_code.clone(),
        market_type: request.market_type.as_code().to_string(),
        date: latest.date.format("%Y-%m-%d").to_string(),
        price: latest.close,
        open: latest.open,
        high: latest.high,
        low: latest.low,
        volume: latest.volume,
        price_change_value: latest.close - prev_close,
        change_percent,
    }))
}

#[derive(Debug, Serialize)]
struct TechnicalResponse {
    stock_code: String,
    market_type: String,
    date: String,
    ma5: Option<f64>,
    ma20: Option<f64>,
    ma60: Option<f64>,
    ma_trend: String,
    rsi: Option<f64>,
    macd: Option<f64>,
    macd_signal: String,
    volume_status: String,
    bollinger_upper: Option<f64>,
    bollinger_middle: Option<f64>,
    bollinger_lower: Option<f64>,
}

async fn stock_technical_analysis(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Json<TechnicalResponse>, AppError> {
    let request = query.into_request();
    let series = state.analyzer.fetch_series(&request).await?;
    let row = series.latest().ok_or_else(|| {
        AnalysisError::NoResult(format!("no indicators for {}", request.stock_code))
    })?;
    let (ma_trend, macd_signal, volume_status) = classify_row(row);

    Ok(Json(TechnicalResponse {
        stock_code: request.stock_code.clone(),
        market_type: request.market_type.as_code().to_string(),
        date: row.date.format("%Y-%m-%d").to_string(),
        ma5: row.ma5,
        ma20: row.ma20,
        ma60: row.ma60,
        ma_trend: ma_trend.as_str().to_string(),
        rsi: row.rsi,
        macd: row.macd,
        macd_signal: macd_signal.as_str().to_string(),
        volume_status: volume_status.as_str().to_string(),
        bollinger_upper: row.bb_upper,
        bollinger_middle: row.bb_middle,
        bollinger_lower: row.bb_lower,
    }))
}

#[derive(Debug, Serialize)]
struct ScoreResponse {
    stock_code: String,
    market_type: String,
    score: u32,
    recommendation: String,
}

async fn stock_score(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Json<ScoreResponse>, AppError> {
    let request = query.into_request();
    let series = state.analyzer.fetch_series(&request).await?;
    let score = score_series(&series);

    Ok(Json(ScoreResponse {
        stock_code: request.stock_code.clone(),
        market_type: request.market_type.as_code().to_string(),
        score: score.score,
        recommendation: score.recommendation,
    }))
}

/// Non-streaming mode: drain the pipeline and return one aggregate.
async fn stock_ai_analysis(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Json<AggregatedAnalysis>, AppError> {
    let request = query.into_request();
    let result = state.analyzer.analyze_collect(&request).await?;
    Ok(Json(result))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
