use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::normalize::normalize_symbol;

/// Market venue designator.
///
/// Unknown designators are carried through as `Other` so the data provider
/// can reject them itself instead of the HTTP layer guessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketType {
    /// Domestic A-shares (Shanghai/Shenzhen)
    A,
    Hk,
    Us,
    Etf,
    Lof,
    Other(String),
}

impl MarketType {
    pub fn from_code(code: &str) -> Self {
        match code {
            "A" => MarketType::A,
            "HK" => MarketType::Hk,
            "US" => MarketType::Us,
            "ETF" => MarketType::Etf,
            "LOF" => MarketType::Lof,
            other => MarketType::Other(other.to_string()),
        }
    }

    pub fn as_code(&self) -> &str {
        match self {
            MarketType::A => "A",
            MarketType::Hk => "HK",
            MarketType::Us => "US",
            MarketType::Etf => "ETF",
            MarketType::Lof => "LOF",
            MarketType::Other(code) => code,
        }
    }
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// One analysis request, immutable once constructed.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub stock_code: String,
    pub market_type: MarketType,
}

impl AnalysisRequest {
    pub fn new(stock_code: impl Into<String>, market_type: MarketType) -> Self {
        Self {
            stock_code: stock_code.into(),
            market_type,
        }
    }

    /// Exchange-prefix-stripped form used for all retrieval calls.
    /// The original `stock_code` is kept for echoing back in responses.
    pub fn normalized_code(&self) -> &str {
        normalize_symbol(&self.stock_code, &self.market_type)
    }
}

/// One OHLCV bar, daily granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Change percent precomputed by some data sources; derived from the
    /// previous close when absent.
    #[serde(default)]
    pub change_percent: Option<f64>,
}

/// A bar extended with derived indicator columns.
///
/// Derived fields are `None` during the warm-up period where the rolling
/// window does not yet have enough history; consumers treat absent values
/// as numeric zero.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub change_percent: Option<f64>,
    pub ma5: Option<f64>,
    pub ma20: Option<f64>,
    pub ma60: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub volume_ma: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub atr: Option<f64>,
    pub volatility: Option<f64>,
}

/// Price series with derived columns. Same row count and ordering as the
/// source bars, oldest first.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSeries {
    rows: Vec<IndicatorRow>,
}

impl IndicatorSeries {
    pub fn new(rows: Vec<IndicatorRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[IndicatorRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn latest(&self) -> Option<&IndicatorRow> {
        self.rows.last()
    }

    /// Row before the latest; falls back to the latest for a one-row series.
    pub fn previous(&self) -> Option<&IndicatorRow> {
        match self.rows.len() {
            0 => None,
            1 => self.rows.last(),
            n => self.rows.get(n - 2),
        }
    }

    /// Most recent `n` rows, oldest first.
    pub fn tail(&self, n: usize) -> &[IndicatorRow] {
        let start = self.rows.len().saturating_sub(n);
        &self.rows[start..]
    }
}

/// Composite score and its recommendation label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: u32,
    pub recommendation: String,
}

/// One unit of incrementally produced narrative.
///
/// The terminal payload is a typed variant rather than a string-encoded
/// JSON blob, so the emitter can merge text and completion in fixed order.
#[derive(Debug, Clone, PartialEq)]
pub enum NarrativeFragment {
    Chunk(String),
    Completed {
        score: Option<u32>,
        recommendation: Option<String>,
    },
}

/// Flattened, classifier-applied view of the latest indicator row plus the
/// score result. Wire shape of the streamed `Basic` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub stock_code: String,
    pub market_type: String,
    pub analysis_date: String,
    pub score: u32,
    pub price: f64,
    pub price_change_value: f64,
    pub change_percent: Option<f64>,
    pub ma_trend: String,
    pub rsi: f64,
    pub macd_signal: String,
    pub volume_status: String,
    pub recommendation: String,
    /// Always empty in the Basic event; the narrative arrives later.
    pub ai_analysis: String,
}

/// Wire shape of one incremental narrative text event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeChunkEvent {
    pub stock_code: String,
    pub ai_analysis_chunk: String,
    pub status: String,
}

impl NarrativeChunkEvent {
    pub fn new(stock_code: impl Into<String>, chunk: impl Into<String>) -> Self {
        Self {
            stock_code: stock_code.into(),
            ai_analysis_chunk: chunk.into(),
            status: "analyzing".to_string(),
        }
    }
}

/// Wire shape of the structured completion marker ending a narrative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeCompleteEvent {
    pub stock_code: String,
    pub status: String,
    pub score: Option<u32>,
    pub recommendation: Option<String>,
}

impl NarrativeCompleteEvent {
    pub fn new(
        stock_code: impl Into<String>,
        score: Option<u32>,
        recommendation: Option<String>,
    ) -> Self {
        Self {
            stock_code: stock_code.into(),
            status: "completed".to_string(),
            score,
            recommendation,
        }
    }
}

/// Wire shape of the single terminal error event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: String,
    pub stock_code: String,
    pub status: String,
    pub kind: String,
}

impl ErrorEvent {
    pub fn new(stock_code: impl Into<String>, err: &crate::AnalysisError) -> Self {
        Self {
            error: err.to_string(),
            stock_code: stock_code.into(),
            status: "error".to_string(),
            kind: err.kind_str().to_string(),
        }
    }
}

/// One emitted unit of the incremental analysis stream.
///
/// Serializes untagged: each variant is already a complete flat wire object,
/// one per NDJSON line.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StageEvent {
    Basic(AnalysisSummary),
    NarrativeChunk(NarrativeChunkEvent),
    NarrativeComplete(NarrativeCompleteEvent),
    Error(ErrorEvent),
}

impl StageEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, StageEvent::Error(_))
    }
}

/// Fully drained, folded view of one analysis stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedAnalysis {
    pub stock_code: String,
    pub market_type: String,
    pub ai_analysis: String,
    pub score: Option<u32>,
    pub recommendation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_type_round_trips_known_codes() {
        for code in ["A", "HK", "US", "ETF", "LOF"] {
            assert_eq!(MarketType::from_code(code).as_code(), code);
        }
    }

    #[test]
    fn market_type_passes_unknown_codes_through() {
        let mt = MarketType::from_code("NASDAQ100");
        assert_eq!(mt, MarketType::Other("NASDAQ100".to_string()));
        assert_eq!(mt.as_code(), "NASDAQ100");
    }

    #[test]
    fn previous_falls_back_to_latest_for_single_row() {
        let row = IndicatorRow {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            change_percent: None,
            ma5: None,
            ma20: None,
            ma60: None,
            rsi: None,
            macd: None,
            macd_signal: None,
            macd_hist: None,
            bb_upper: None,
            bb_middle: None,
            bb_lower: None,
            volume_ma: None,
            volume_ratio: None,
            atr: None,
            volatility: None,
        };
        let series = IndicatorSeries::new(vec![row]);
        assert_eq!(series.previous().unwrap().date, series.latest().unwrap().date);
    }

    #[test]
    fn stage_events_serialize_flat() {
        let err = crate::AnalysisError::NotFound("no data".to_string());
        let event = StageEvent::Error(ErrorEvent::new("600795", &err));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["kind"], "not_found");
        assert_eq!(value["stock_code"], "600795");
        assert!(value.get("Error").is_none());
    }
}
