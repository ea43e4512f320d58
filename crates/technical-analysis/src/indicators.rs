use analysis_core::{Bar, IndicatorRow, IndicatorSeries};

/// Indicator window parameters.
///
/// Defaults match the service contract: MA 5/20/60, RSI 14, Bollinger 20/2,
/// volume MA 20, ATR 14.
#[derive(Debug, Clone)]
pub struct IndicatorParams {
    pub ma_short: usize,
    pub ma_medium: usize,
    pub ma_long: usize,
    pub rsi_period: usize,
    pub bollinger_period: usize,
    pub bollinger_std: f64,
    pub volume_ma_period: usize,
    pub atr_period: usize,
    pub volatility_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ma_short: 5,
            ma_medium: 20,
            ma_long: 60,
            rsi_period: 14,
            bollinger_period: 20,
            bollinger_std: 2.0,
            volume_ma_period: 20,
            atr_period: 14,
            volatility_period: 20,
        }
    }
}

/// Simple Moving Average, aligned to the input: `None` until the window has
/// enough history.
pub fn sma(data: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }
    let mut sum: f64 = data[..period].iter().sum();
    result[period - 1] = Some(sum / period as f64);
    for i in period..data.len() {
        sum += data[i] - data[i - period];
        result[i] = Some(sum / period as f64);
    }
    result
}

/// Exponential Moving Average seeded with the first value, defined for every
/// index (pandas `ewm(adjust=False)` semantics).
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len());
    result.push(data[0]);
    for i in 1..data.len() {
        let prev = result[i - 1];
        result.push((data[i] - prev) * multiplier + prev);
    }
    result
}

/// Relative Strength Index over a rolling simple mean of gains and losses.
///
/// A window that saw no movement at all yields `None`; a window with gains
/// and no losses saturates at 100.
pub fn rsi(data: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period + 1 {
        return result;
    }

    let mut gains = vec![0.0; data.len()];
    let mut losses = vec![0.0; data.len()];
    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains[i] = change;
        } else {
            losses[i] = -change;
        }
    }

    for i in period..data.len() {
        let window = (i + 1 - period)..=i;
        let avg_gain: f64 = gains[window.clone()].iter().sum::<f64>() / period as f64;
        let avg_loss: f64 = losses[window].iter().sum::<f64>() / period as f64;

        result[i] = if avg_loss == 0.0 && avg_gain == 0.0 {
            None
        } else if avg_loss == 0.0 {
            Some(100.0)
        } else {
            let rs = avg_gain / avg_loss;
            Some(100.0 - 100.0 / (1.0 + rs))
        };
    }
    result
}

/// MACD line, signal line and histogram, all aligned to the input.
pub struct MacdResult {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(data: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdResult {
    if data.is_empty() {
        return MacdResult {
            macd: vec![],
            signal: vec![],
            histogram: vec![],
        };
    }
    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&macd_line, signal_period);
    let histogram: Vec<f64> = macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| m - s)
        .collect();
    MacdResult {
        macd: macd_line,
        signal: signal_line,
        histogram,
    }
}

/// Bollinger Bands with sample standard deviation, aligned to the input.
pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

pub fn bollinger_bands(data: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    let middle = sma(data, period);
    let mut upper = vec![None; data.len()];
    let mut lower = vec![None; data.len()];

    if period >= 2 && data.len() >= period {
        for i in period - 1..data.len() {
            let window = &data[i + 1 - period..=i];
            let mean = match middle[i] {
                Some(m) => m,
                None => continue,
            };
            let variance: f64 = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>()
                / (period - 1) as f64;
            let std = variance.sqrt();
            upper[i] = Some(mean + std_dev * std);
            lower[i] = Some(mean - std_dev * std);
        }
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

/// Average True Range over a rolling mean of true ranges.
pub fn atr(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return result;
    }

    let mut true_ranges = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let tr = if i == 0 {
            bar.high - bar.low
        } else {
            let prev_close = bars[i - 1].close;
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        };
        true_ranges.push(tr);
    }

    for i in period - 1..bars.len() {
        let window = &true_ranges[i + 1 - period..=i];
        result[i] = Some(window.iter().sum::<f64>() / period as f64);
    }
    result
}

/// Rolling volatility: window std / window mean, as a percentage.
pub fn volatility(data: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    if period < 2 || data.len() < period {
        return result;
    }
    for i in period - 1..data.len() {
        let window = &data[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        if mean == 0.0 {
            continue;
        }
        let variance: f64 =
            window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
        result[i] = Some(variance.sqrt() / mean * 100.0);
    }
    result
}

/// Extend a price series with every derived column.
///
/// Total for any input; warm-up rows simply carry `None` in the columns
/// whose window is not yet filled. Output has the same row count and
/// ordering as the input.
pub fn compute_indicators(bars: &[Bar]) -> IndicatorSeries {
    compute_indicators_with(bars, &IndicatorParams::default())
}

pub fn compute_indicators_with(bars: &[Bar], params: &IndicatorParams) -> IndicatorSeries {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let ma5 = sma(&closes, params.ma_short);
    let ma20 = sma(&closes, params.ma_medium);
    let ma60 = sma(&closes, params.ma_long);
    let rsi_values = rsi(&closes, params.rsi_period);
    let macd_result = macd(&closes, 12, 26, 9);
    let bb = bollinger_bands(&closes, params.bollinger_period, params.bollinger_std);
    let volume_ma = sma(&volumes, params.volume_ma_period);
    let atr_values = atr(bars, params.atr_period);
    let volatility_values = volatility(&closes, params.volatility_period);

    let rows = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| IndicatorRow {
            date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            change_percent: bar.change_percent,
            ma5: ma5[i],
            ma20: ma20[i],
            ma60: ma60[i],
            rsi: rsi_values[i],
            macd: macd_result.macd.get(i).copied(),
            macd_signal: macd_result.signal.get(i).copied(),
            macd_hist: macd_result.histogram.get(i).copied(),
            bb_upper: bb.upper[i],
            bb_middle: bb.middle[i],
            bb_lower: bb.lower[i],
            volume_ma: volume_ma[i],
            volume_ratio: match volume_ma[i] {
                Some(ma) if ma != 0.0 => Some(bar.volume / ma),
                _ => None,
            },
            atr: atr_values[i],
            volatility: volatility_values[i],
        })
        .collect();

    IndicatorSeries::new(rows)
}
