//! HTTP client for an AKTools-style market data gateway.
//!
//! The gateway exposes akshare query functions as REST endpoints under
//! `/api/public/<function>`, returning JSON arrays of per-day records.
//! Column names are Chinese for mainland data (A-shares, ETF, LOF) and
//! lowercase English for Hong Kong and US data.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use analysis_core::{AnalysisError, Bar, MarketDataProvider, MarketType};

mod rate_limit;

use rate_limit::RateLimiter;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
const HISTORY_DAYS: i64 = 365;

/// Client for the AKTools REST gateway.
#[derive(Clone)]
pub struct AkToolsClient {
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl AkToolsClient {
    /// Build a client from `AKTOOLS_BASE_URL` / `AKTOOLS_RATE_LIMIT` env
    /// vars, falling back to a local gateway and 120 requests per minute.
    pub fn from_env() -> Self {
        let base_url = std::env::var("AKTOOLS_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let rate_limit: usize = std::env::var("AKTOOLS_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);
        Self::new(base_url, rate_limit)
    }

    pub fn new(base_url: impl Into<String>, requests_per_minute: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            rate_limiter: RateLimiter::new(requests_per_minute, Duration::from_secs(60)),
        }
    }

    /// GET one gateway function with rate limiting and a bounded 429 retry.
    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        function: &str,
        params: &[(&str, &str)],
    ) -> Result<T, AnalysisError> {
        let url = format!("{}/api/public/{}", self.base_url, function);

        for attempt in 0..3u32 {
            self.rate_limiter.acquire().await;
            let response = self
                .client
                .get(&url)
                .query(params)
                .send()
                .await
                .map_err(|e| AnalysisError::DataUnavailable(e.to_string()))?;

            match response.status() {
                StatusCode::NOT_FOUND => {
                    return Err(AnalysisError::NotFound(format!(
                        "gateway has no data for {function} {params:?}"
                    )));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    tracing::warn!("gateway rate limited, retry {}/3", attempt + 1);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
                status if !status.is_success() => {
                    return Err(AnalysisError::DataUnavailable(format!(
                        "gateway returned {status} for {function}"
                    )));
                }
                _ => {}
            }

            return response
                .json::<T>()
                .await
                .map_err(|e| AnalysisError::DataUnavailable(format!("bad gateway payload: {e}")));
        }

        Err(AnalysisError::DataUnavailable(
            "gateway rate limited after 3 retries".to_string(),
        ))
    }
}

#[async_trait]
impl MarketDataProvider for AkToolsClient {
    async fn daily_bars(
        &self,
        symbol: &str,
        market: &MarketType,
    ) -> Result<Vec<Bar>, AnalysisError> {
        let end = Utc::now().date_naive();
        let start = end - chrono::Duration::days(HISTORY_DAYS);
        let start_param = start.format("%Y%m%d").to_string();
        let end_param = end.format("%Y%m%d").to_string();

        let mut bars = match market {
            MarketType::A => {
                let rows: Vec<CnHistRow> = self
                    .fetch_json(
                        "stock_zh_a_hist",
                        &[
                            ("symbol", symbol),
                            ("period", "daily"),
                            ("start_date", &start_param),
                            ("end_date", &end_param),
                            ("adjust", "qfq"),
                        ],
                    )
                    .await?;
                cn_rows_to_bars(rows)?
            }
            MarketType::Hk => {
                let rows: Vec<EnHistRow> = self
                    .fetch_json("stock_hk_daily", &[("symbol", symbol), ("adjust", "qfq")])
                    .await?;
                // The HK endpoint has no server-side window; trim here.
                filter_window(en_rows_to_bars(rows)?, start, end)
            }
            MarketType::Us => {
                let rows: Vec<EnHistRow> = self
                    .fetch_json("stock_us_daily", &[("symbol", symbol), ("adjust", "qfq")])
                    .await?;
                filter_window(en_rows_to_bars(rows)?, start, end)
            }
            MarketType::Etf => {
                let rows: Vec<CnHistRow> = self
                    .fetch_json(
                        "fund_etf_hist_em",
                        &[
                            ("symbol", symbol),
                            ("start_date", &start_param),
                            ("end_date", &end_param),
                        ],
                    )
                    .await?;
                cn_rows_to_bars(rows)?
            }
            MarketType::Lof => {
                let rows: Vec<CnHistRow> = self
                    .fetch_json(
                        "fund_lof_hist_em",
                        &[
                            ("symbol", symbol),
                            ("start_date", &start_param),
                            ("end_date", &end_param),
                        ],
                    )
                    .await?;
                cn_rows_to_bars(rows)?
            }
            MarketType::Other(code) => {
                return Err(AnalysisError::DataUnavailable(format!(
                    "unsupported market type: {code}"
                )));
            }
        };

        bars.sort_by_key(|b| b.date);

        if bars.is_empty() {
            return Err(AnalysisError::NotFound(format!(
                "no data for {symbol} ({market})"
            )));
        }

        tracing::info!(symbol, %market, rows = bars.len(), "fetched daily bars");
        Ok(bars)
    }
}

/// Record shape for mainland endpoints (A-shares, ETF, LOF).
#[derive(Debug, Deserialize)]
struct CnHistRow {
    #[serde(rename = "日期")]
    date: String,
    #[serde(rename = "开盘")]
    open: f64,
    #[serde(rename = "收盘")]
    close: f64,
    #[serde(rename = "最高")]
    high: f64,
    #[serde(rename = "最低")]
    low: f64,
    #[serde(rename = "成交量")]
    volume: f64,
    #[serde(rename = "涨跌幅", default)]
    change_percent: Option<f64>,
}

/// Record shape for the HK/US endpoints.
#[derive(Debug, Deserialize)]
struct EnHistRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

fn parse_date(raw: &str) -> Result<NaiveDate, AnalysisError> {
    // Dates arrive either bare ("2024-01-02") or with a time suffix.
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| AnalysisError::DataUnavailable(format!("unparseable date: {raw}")))
}

fn cn_rows_to_bars(rows: Vec<CnHistRow>) -> Result<Vec<Bar>, AnalysisError> {
    rows.into_iter()
        .map(|r| {
            Ok(Bar {
                date: parse_date(&r.date)?,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
                change_percent: r.change_percent,
            })
        })
        .collect()
}

fn en_rows_to_bars(rows: Vec<EnHistRow>) -> Result<Vec<Bar>, AnalysisError> {
    rows.into_iter()
        .map(|r| {
            Ok(Bar {
                date: parse_date(&r.date)?,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
                change_percent: None,
            })
        })
        .collect()
}

fn filter_window(bars: Vec<Bar>, start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
    bars.into_iter()
        .filter(|b| b.date >= start && b.date <= end)
        .collect()
}
