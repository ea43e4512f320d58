use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{AnalysisError, Bar, IndicatorSeries, MarketType, NarrativeFragment};

/// Source of historical OHLCV data.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch daily bars for a normalized symbol, oldest first.
    ///
    /// An empty result is reported as `NotFound`; explicit source errors as
    /// `DataUnavailable`.
    async fn daily_bars(
        &self,
        symbol: &str,
        market: &MarketType,
    ) -> Result<Vec<Bar>, AnalysisError>;
}

/// Incremental narrative-generation backend.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    /// Start generating narrative for the series and return the fragment
    /// channel. Text chunks arrive in order, followed by exactly one
    /// `Completed` fragment. Dropping the receiver cancels generation after
    /// the in-flight fragment.
    async fn generate(
        &self,
        series: &IndicatorSeries,
        symbol: &str,
        market: &MarketType,
        streaming: bool,
    ) -> Result<mpsc::Receiver<Result<NarrativeFragment, AnalysisError>>, AnalysisError>;
}
