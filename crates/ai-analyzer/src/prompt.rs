//! Prompt assembly for the narrative backend.

use analysis_core::{IndicatorSeries, MarketType};

/// How many recent rows of indicator data go into the prompt.
const PROMPT_ROWS: usize = 14;

/// Condensed read of the latest indicator row, used both in the prompt and
/// in the fallback score calculation.
#[derive(Debug, Clone)]
pub(crate) struct TechnicalSnapshot {
    pub close: f64,
    pub trend_up: bool,
    pub volume_rising: bool,
    pub rsi: f64,
}

impl TechnicalSnapshot {
    pub(crate) fn from_series(series: &IndicatorSeries) -> Self {
        let latest = series.latest();
        let close = latest.map(|r| r.close).unwrap_or(0.0);
        let ma20 = latest.and_then(|r| r.ma20).unwrap_or(0.0);
        let volume_ratio = latest.and_then(|r| r.volume_ratio).unwrap_or(0.0);
        let rsi = latest.and_then(|r| r.rsi).unwrap_or(50.0);

        Self {
            close,
            trend_up: close > ma20,
            volume_rising: volume_ratio > 1.0,
            rsi,
        }
    }

    fn trend_label(&self) -> &'static str {
        if self.trend_up {
            "upward"
        } else {
            "downward"
        }
    }

    fn volume_label(&self) -> &'static str {
        if self.volume_rising {
            "above average"
        } else {
            "at or below average"
        }
    }
}

fn instrument_label(market: &MarketType) -> &'static str {
    match market {
        MarketType::A => "China A-share stock",
        MarketType::Hk => "Hong Kong listed stock",
        MarketType::Us => "US listed stock",
        MarketType::Etf => "exchange-traded fund",
        MarketType::Lof => "listed open-ended fund",
        MarketType::Other(_) => "financial instrument",
    }
}

pub(crate) const SYSTEM_PROMPT: &str = "You are a seasoned equity analyst. \
Write clear, structured analysis in English. Base every claim on the data \
provided and finish with a section titled 'Investment Advice'.";

/// Build the user prompt from the series tail and the snapshot.
pub(crate) fn build_prompt(
    series: &IndicatorSeries,
    snapshot: &TechnicalSnapshot,
    symbol: &str,
    market: &MarketType,
) -> String {
    let recent = serde_json::to_string(series.tail(PROMPT_ROWS)).unwrap_or_default();

    format!(
        "Analyze the {kind} {symbol}.\n\
         Latest close: {close:.2}. Price trend relative to MA20: {trend}. \
         Volume is {volume}. RSI(14) is {rsi:.1}.\n\
         Recent daily data with indicators (oldest first):\n{recent}\n\n\
         Cover: trend analysis, momentum, volume behavior, key risks. \
         End with an 'Investment Advice' section containing a one-line \
         buy/hold/sell stance.",
        kind = instrument_label(market),
        symbol = symbol,
        close = snapshot.close,
        trend = snapshot.trend_label(),
        volume = snapshot.volume_label(),
        rsi = snapshot.rsi,
        recent = recent,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::IndicatorRow;
    use chrono::NaiveDate;

    fn row(close: f64, ma20: Option<f64>, rsi: Option<f64>) -> IndicatorRow {
        IndicatorRow {
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
            change_percent: None,
            ma5: None,
            ma20,
            ma60: None,
            rsi,
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
    fn snapshot_reads_latest_row() {
        let series = IndicatorSeries::new(vec![
            row(9.0, Some(9.5), Some(40.0)),
            row(10.0, Some(9.5), Some(61.0)),
        ]);
        let snap = TechnicalSnapshot::from_series(&series);
        assert!(snap.trend_up);
        assert_eq!(snap.rsi, 61.0);
    }

    #[test]
    fn snapshot_defaults_for_missing_columns() {
        let series = IndicatorSeries::new(vec![row(10.0, None, None)]);
        let snap = TechnicalSnapshot::from_series(&series);
        assert!(snap.trend_up); // close > absent ma20 treated as zero
        assert_eq!(snap.rsi, 50.0);
        assert!(!snap.volume_rising);
    }

    #[test]
    fn prompt_names_the_market_and_symbol() {
        let series = IndicatorSeries::new(vec![row(10.0, Some(9.0), Some(55.0))]);
        let snap = TechnicalSnapshot::from_series(&series);
        let prompt = build_prompt(&series, &snap, "00700", &MarketType::Hk);
        assert!(prompt.contains("Hong Kong"));
        assert!(prompt.contains("00700"));
        assert!(prompt.contains("Investment Advice"));
    }
}
