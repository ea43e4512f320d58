use analysis_core::IndicatorRow;

/// Moving-average trend direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaTrend {
    Up,
    Down,
    Flat,
}

impl MaTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaTrend::Up => "UP",
            MaTrend::Down => "DOWN",
            MaTrend::Flat => "FLAT",
        }
    }
}

/// MACD crossover signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdSignal {
    Buy,
    Sell,
    Hold,
}

impl MacdSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            MacdSignal::Buy => "BUY",
            MacdSignal::Sell => "SELL",
            MacdSignal::Hold => "HOLD",
        }
    }
}

/// Volume regime relative to its moving average.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStatus {
    High,
    Low,
    Normal,
}

impl VolumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeStatus::High => "HIGH",
            VolumeStatus::Low => "LOW",
            VolumeStatus::Normal => "NORMAL",
        }
    }
}

/// Trend from the strict MA ordering. Equality anywhere in the chain, or a
/// mixed ordering, is FLAT — missing averages participate as zero rather
/// than becoming a fourth label.
pub fn classify_ma_trend(ma5: Option<f64>, ma20: Option<f64>, ma60: Option<f64>) -> MaTrend {
    let (short, medium, long) = (
        ma5.unwrap_or(0.0),
        ma20.unwrap_or(0.0),
        ma60.unwrap_or(0.0),
    );
    if short > medium && medium > long {
        MaTrend::Up
    } else if short < medium && medium < long {
        MaTrend::Down
    } else {
        MaTrend::Flat
    }
}

pub fn classify_macd(macd: Option<f64>, signal: Option<f64>) -> MacdSignal {
    let (macd, signal) = (macd.unwrap_or(0.0), signal.unwrap_or(0.0));
    if macd > signal {
        MacdSignal::Buy
    } else if macd < signal {
        MacdSignal::Sell
    } else {
        MacdSignal::Hold
    }
}

/// Volume regime: strictly above 1.5x the average is HIGH, strictly below
/// 0.5x is LOW. Both boundaries fall in NORMAL.
pub fn classify_volume(volume: f64, volume_ma: Option<f64>) -> VolumeStatus {
    let ma = volume_ma.unwrap_or(0.0);
    if volume > ma * 1.5 {
        VolumeStatus::High
    } else if volume < ma * 0.5 {
        VolumeStatus::Low
    } else {
        VolumeStatus::Normal
    }
}

/// All three labels for one indicator row.
pub fn classify_row(row: &IndicatorRow) -> (MaTrend, MacdSignal, VolumeStatus) {
    (
        classify_ma_trend(row.ma5, row.ma20, row.ma60),
        classify_macd(row.macd, row.macd_signal),
        classify_volume(row.volume, row.volume_ma),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_ascending_chain_is_up() {
        assert_eq!(
            classify_ma_trend(Some(10.4), Some(10.2), Some(10.0)),
            MaTrend::Up
        );
    }

    #[test]
    fn strict_descending_chain_is_down() {
        assert_eq!(
            classify_ma_trend(Some(9.0), Some(9.5), Some(10.0)),
            MaTrend::Down
        );
    }

    #[test]
    fn equal_averages_are_flat() {
        // Equality never satisfies a strict-inequality chain.
        assert_eq!(
            classify_ma_trend(Some(10.0), Some(10.0), Some(10.0)),
            MaTrend::Flat
        );
    }

    #[test]
    fn mixed_ordering_is_flat() {
        assert_eq!(
            classify_ma_trend(Some(10.5), Some(10.0), Some(10.2)),
            MaTrend::Flat
        );
    }

    #[test]
    fn missing_averages_compare_as_zero() {
        // ma5 present, others absent: 10 > 0 but 0 > 0 fails, so FLAT.
        assert_eq!(classify_ma_trend(Some(10.0), None, None), MaTrend::Flat);
        assert_eq!(classify_ma_trend(None, None, None), MaTrend::Flat);
    }

    #[test]
    fn macd_crossover_labels() {
        assert_eq!(classify_macd(Some(0.5), Some(0.3)), MacdSignal::Buy);
        assert_eq!(classify_macd(Some(0.1), Some(0.3)), MacdSignal::Sell);
        assert_eq!(classify_macd(Some(0.3), Some(0.3)), MacdSignal::Hold);
        assert_eq!(classify_macd(None, None), MacdSignal::Hold);
    }

    #[test]
    fn volume_boundaries_are_normal() {
        assert_eq!(classify_volume(150.0, Some(100.0)), VolumeStatus::Normal);
        assert_eq!(classify_volume(50.0, Some(100.0)), VolumeStatus::Normal);
        assert_eq!(classify_volume(150.1, Some(100.0)), VolumeStatus::High);
        assert_eq!(classify_volume(49.9, Some(100.0)), VolumeStatus::Low);
    }

    #[test]
    fn missing_volume_ma_reads_as_zero() {
        // Any positive volume beats 1.5 * 0.
        assert_eq!(classify_volume(1.0, None), VolumeStatus::High);
        // Zero volume against zero average is the NORMAL boundary case.
        assert_eq!(classify_volume(0.0, None), VolumeStatus::Normal);
    }
}
