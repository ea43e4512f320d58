//! Staged analysis pipeline.
//!
//! Sequences data retrieval, indicator computation, scoring and narrative
//! generation, emitting each stage's result as soon as it is ready. The
//! stream form yields `StageEvent`s through a channel; the collected form
//! drains the same pipeline into one aggregate value.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use analysis_core::{
    AggregatedAnalysis, AnalysisError, AnalysisRequest, AnalysisSummary, ErrorEvent,
    IndicatorSeries, MarketDataProvider, NarrativeChunkEvent, NarrativeCompleteEvent,
    NarrativeFragment, NarrativeGenerator, ScoreResult, StageEvent,
};
use technical_analysis::{
    classify_row, compute_indicators, score_series, MaTrend, MacdSignal, VolumeStatus,
};

const EVENT_BUFFER: usize = 32;

/// Orchestrates one analysis run over injected collaborators.
#[derive(Clone)]
pub struct StockAnalyzer {
    provider: Arc<dyn MarketDataProvider>,
    narrative: Arc<dyn NarrativeGenerator>,
}

impl StockAnalyzer {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        narrative: Arc<dyn NarrativeGenerator>,
    ) -> Self {
        Self {
            provider,
            narrative,
        }
    }

    /// Stage 1: fetch daily bars for the normalized symbol.
    pub async fn fetch_bars(
        &self,
        request: &AnalysisRequest,
    ) -> Result<Vec<analysis_core::Bar>, AnalysisError> {
        self.provider
            .daily_bars(request.normalized_code(), &request.market_type)
            .await
    }

    /// Stages 1–2: fetch bars and derive the indicator columns.
    pub async fn fetch_series(
        &self,
        request: &AnalysisRequest,
    ) -> Result<IndicatorSeries, AnalysisError> {
        let bars = self.fetch_bars(request).await?;
        let series = compute_indicators(&bars);
        if series.is_empty() {
            return Err(AnalysisError::NotFound(format!(
                "no data for {}",
                request.stock_code
            )));
        }
        Ok(series)
    }

    /// Run the full pipeline, emitting incrementally.
    ///
    /// Event order is fixed: one `Basic`, then narrative chunks, then exactly
    /// one `NarrativeComplete`. On failure at any stage the stream ends with
    /// exactly one `Error` event instead. Dropping the receiver cancels the
    /// run at the next stage boundary.
    pub fn analyze_stream(&self, request: AnalysisRequest) -> mpsc::Receiver<StageEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let analyzer = self.clone();

        tokio::spawn(async move {
            if let Err(err) = analyzer.run_pipeline(&request, &tx).await {
                tracing::warn!(stock_code = %request.stock_code, error = %err, "analysis failed");
                let _ = tx
                    .send(StageEvent::Error(ErrorEvent::new(
                        request.stock_code.clone(),
                        &err,
                    )))
                    .await;
            }
        });

        rx
    }

    async fn run_pipeline(
        &self,
        request: &AnalysisRequest,
        tx: &mpsc::Sender<StageEvent>,
    ) -> Result<(), AnalysisError> {
        let series = self.fetch_series(request).await?;
        let score = score_series(&series);
        let summary = build_summary(request, &series, &score);

        if tx.send(StageEvent::Basic(summary)).await.is_err() {
            return Ok(());
        }

        let mut fragments = self
            .narrative
            .generate(
                &series,
                request.normalized_code(),
                &request.market_type,
                true,
            )
            .await?;

        while let Some(fragment) = fragments.recv().await {
            match fragment? {
                NarrativeFragment::Chunk(text) => {
                    let event = StageEvent::NarrativeChunk(NarrativeChunkEvent::new(
                        request.stock_code.clone(),
                        text,
                    ));
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                NarrativeFragment::Completed {
                    score,
                    recommendation,
                } => {
                    let event = StageEvent::NarrativeComplete(NarrativeCompleteEvent::new(
                        request.stock_code.clone(),
                        score,
                        recommendation,
                    ));
                    let _ = tx.send(event).await;
                    return Ok(());
                }
            }
        }

        Err(AnalysisError::NoResult(
            "narrative ended without completing".to_string(),
        ))
    }

    /// Run the pipeline to completion and fold it into one value.
    pub async fn analyze_collect(
        &self,
        request: &AnalysisRequest,
    ) -> Result<AggregatedAnalysis, AnalysisError> {
        let series = self.fetch_series(request).await?;

        let mut fragments = self
            .narrative
            .generate(
                &series,
                request.normalized_code(),
                &request.market_type,
                false,
            )
            .await?;

        let mut text = String::new();
        let mut completion: Option<(Option<u32>, Option<String>)> = None;

        while let Some(fragment) = fragments.recv().await {
            match fragment? {
                NarrativeFragment::Chunk(chunk) => text.push_str(&chunk),
                NarrativeFragment::Completed {
                    score,
                    recommendation,
                } => {
                    completion = Some((score, recommendation));
                    break;
                }
            }
        }

        if text.is_empty() && completion.is_none() {
            return Err(AnalysisError::NoResult(format!(
                "no analysis produced for {}",
                request.stock_code
            )));
        }

        let (score, recommendation) = completion.unwrap_or((None, None));
        Ok(AggregatedAnalysis {
            stock_code: request.stock_code.clone(),
            market_type: request.market_type.as_code().to_string(),
            ai_analysis: text,
            score,
            recommendation,
        })
    }
}

/// Flatten the latest row, classifiers and score into the Basic wire shape.
///
/// Echoes the request's original (unstripped) symbol. The change value is
/// derived from the previous close; the change percent prefers the source's
/// precomputed figure.
pub fn build_summary(
    request: &AnalysisRequest,
    series: &IndicatorSeries,
    score: &ScoreResult,
) -> AnalysisSummary {
    let latest = series.latest();
    let previous = series.previous();

    let price = latest.map(|r| r.close).unwrap_or(0.0);
    let prev_close = previous.map(|r| r.close).unwrap_or(price);
    let price_change_value = price - prev_close;

    let change_percent = latest.and_then(|r| r.change_percent).or_else(|| {
        (prev_close != 0.0).then(|| (price - prev_close) / prev_close * 100.0)
    });

    let (ma_trend, macd_signal, volume_status) = match latest {
        Some(row) => classify_row(row),
        None => (MaTrend::Flat, MacdSignal::Hold, VolumeStatus::Normal),
    };

    AnalysisSummary {
        stock_code: request.stock_code.clone(),
        market_type: request.market_type.as_code().to_string(),
        analysis_date: Utc::now().format("%Y-%m-%d").to_string(),
        score: score.score,
        price,
        price_change_value,
        change_percent,
        ma_trend: ma_trend.as_str().to_string(),
        rsi: latest.and_then(|r| r.rsi).unwrap_or(0.0),
        macd_signal: macd_signal.as_str().to_string(),
        volume_status: volume_status.as_str().to_string(),
        recommendation: score.recommendation.clone(),
        ai_analysis: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{Bar, IndicatorRow, MarketType};
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct StaticProvider(Vec<Bar>);

    #[async_trait]
    impl MarketDataProvider for StaticProvider {
        async fn daily_bars(
            &self,
            _symbol: &str,
            _market: &MarketType,
        ) -> Result<Vec<Bar>, AnalysisError> {
            if self.0.is_empty() {
                return Err(AnalysisError::NotFound("no data".to_string()));
            }
            Ok(self.0.clone())
        }
    }

    struct ScriptedNarrative(Vec<Result<NarrativeFragment, AnalysisError>>);

    #[async_trait]
    impl NarrativeGenerator for ScriptedNarrative {
        async fn generate(
            &self,
            _series: &IndicatorSeries,
            _symbol: &str,
            _market: &MarketType,
            _streaming: bool,
        ) -> Result<mpsc::Receiver<Result<NarrativeFragment, AnalysisError>>, AnalysisError>
        {
            let (tx, rx) = mpsc::channel(16);
            let fragments = self.0.clone();
            tokio::spawn(async move {
                for fragment in fragments {
                    if tx.send(fragment).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 10.0 + i as f64 * 0.1;
                Bar {
                    date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                        + chrono::Duration::days(i as i64),
                    open: close - 0.05,
                    high: close + 0.1,
                    low: close - 0.1,
                    close,
                    volume: 1000.0 + i as f64 * 10.0,
                    change_percent: None,
                }
            })
            .collect()
    }

    fn analyzer(
        provider_bars: Vec<Bar>,
        fragments: Vec<Result<NarrativeFragment, AnalysisError>>,
    ) -> StockAnalyzer {
        StockAnalyzer::new(
            Arc::new(StaticProvider(provider_bars)),
            Arc::new(ScriptedNarrative(fragments)),
        )
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::new("sh600795", MarketType::A)
    }

    async fn drain(mut rx: mpsc::Receiver<StageEvent>) -> Vec<StageEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn stream_emits_basic_then_chunks_then_completion() {
        let fragments = vec![
            Ok(NarrativeFragment::Chunk("Momentum is ".to_string())),
            Ok(NarrativeFragment::Chunk("improving.".to_string())),
            Ok(NarrativeFragment::Completed {
                score: Some(80),
                recommendation: Some("Buy".to_string()),
            }),
        ];
        let events = drain(analyzer(bars(70), fragments).analyze_stream(request())).await;

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], StageEvent::Basic(_)));
        assert!(matches!(events[1], StageEvent::NarrativeChunk(_)));
        assert!(matches!(events[2], StageEvent::NarrativeChunk(_)));
        match &events[3] {
            StageEvent::NarrativeComplete(done) => {
                assert_eq!(done.score, Some(80));
                assert_eq!(done.recommendation.as_deref(), Some("Buy"));
                assert_eq!(done.status, "completed");
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn basic_event_echoes_the_original_symbol() {
        let fragments = vec![Ok(NarrativeFragment::Completed {
            score: None,
            recommendation: None,
        })];
        let events = drain(analyzer(bars(70), fragments).analyze_stream(request())).await;
        match &events[0] {
            StageEvent::Basic(summary) => {
                assert_eq!(summary.stock_code, "sh600795");
                assert_eq!(summary.market_type, "A");
                assert!(summary.ai_analysis.is_empty());
            }
            other => panic!("expected basic event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_failure_yields_exactly_one_error_event() {
        let events = drain(analyzer(vec![], vec![]).analyze_stream(request())).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            StageEvent::Error(err) => {
                assert_eq!(err.status, "error");
                assert_eq!(err.kind, "not_found");
                assert_eq!(err.stock_code, "sh600795");
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn narrative_failure_ends_the_stream_with_one_error() {
        let fragments = vec![
            Ok(NarrativeFragment::Chunk("partial".to_string())),
            Err(AnalysisError::Internal("backend died".to_string())),
        ];
        let events = drain(analyzer(bars(70), fragments).analyze_stream(request())).await;

        assert!(matches!(events[0], StageEvent::Basic(_)));
        assert!(matches!(events[1], StageEvent::NarrativeChunk(_)));
        let errors: Vec<_> = events.iter().filter(|e| e.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert!(events.last().map(|e| e.is_error()).unwrap_or(false));
    }

    #[tokio::test]
    async fn narrative_ending_without_completion_is_no_result() {
        let fragments = vec![Ok(NarrativeFragment::Chunk("text".to_string()))];
        let events = drain(analyzer(bars(70), fragments).analyze_stream(request())).await;
        match events.last() {
            Some(StageEvent::Error(err)) => assert_eq!(err.kind, "no_result"),
            other => panic!("expected trailing error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn collect_folds_chunks_and_completion() {
        let fragments = vec![
            Ok(NarrativeFragment::Chunk("Trend up. ".to_string())),
            Ok(NarrativeFragment::Chunk("Volume strong.".to_string())),
            Ok(NarrativeFragment::Completed {
                score: Some(77),
                recommendation: Some("Buy".to_string()),
            }),
        ];
        let result = analyzer(bars(70), fragments)
            .analyze_collect(&request())
            .await
            .unwrap();

        assert_eq!(result.ai_analysis, "Trend up. Volume strong.");
        assert_eq!(result.score, Some(77));
        assert_eq!(result.recommendation.as_deref(), Some("Buy"));
        assert_eq!(result.stock_code, "sh600795");
    }

    #[tokio::test]
    async fn collect_with_no_fragments_is_no_result() {
        let err = analyzer(bars(70), vec![])
            .analyze_collect(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::NoResult(_)));
    }

    #[tokio::test]
    async fn collect_propagates_fetch_errors() {
        let err = analyzer(vec![], vec![])
            .analyze_collect(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::NotFound(_)));
    }

    fn row(close: f64) -> IndicatorRow {
        IndicatorRow {
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
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
        }
    }

    #[test]
    fn summary_flattens_the_latest_row() {
        let mut latest = row(10.50);
        latest.ma5 = Some(10.4);
        latest.ma20 = Some(10.2);
        latest.ma60 = Some(10.0);
        latest.rsi = Some(65.0);
        latest.macd = Some(0.5);
        latest.macd_signal = Some(0.3);
        latest.volume = 200.0;
        latest.volume_ma = Some(100.0);
        latest.volume_ratio = Some(2.0);

        let series = IndicatorSeries::new(vec![row(10.0), latest]);
        let score = score_series(&series);
        let summary = build_summary(&request(), &series, &score);

        assert_eq!(summary.price, 10.50);
        assert!((summary.price_change_value - 0.50).abs() < 1e-9);
        assert!((summary.change_percent.unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(summary.ma_trend, "UP");
        assert_eq!(summary.macd_signal, "BUY");
        assert_eq!(summary.volume_status, "HIGH");
        assert_eq!(summary.rsi, 65.0);
        assert_eq!(summary.stock_code, "sh600795");
    }

    #[test]
    fn summary_prefers_source_change_percent() {
        let mut latest = row(10.50);
        latest.change_percent = Some(4.2);
        let series = IndicatorSeries::new(vec![row(10.0), latest]);
        let score = score_series(&series);
        let summary = build_summary(&request(), &series, &score);
        assert_eq!(summary.change_percent, Some(4.2));
    }
}
