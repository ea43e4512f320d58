use analysis_core::{IndicatorSeries, ScoreResult};

/// Composite 0-100 score from the latest indicator row.
///
/// Weights: MA alignment up to 25, RSI banding up to 25, MACD crossover 20,
/// volume ratio up to 30. Absent columns read as zero.
pub fn calculate_score(series: &IndicatorSeries) -> u32 {
    let latest = match series.latest() {
        Some(row) => row,
        None => return 0,
    };

    let mut score = 0u32;

    let ma5 = latest.ma5.unwrap_or(0.0);
    let ma20 = latest.ma20.unwrap_or(0.0);
    let ma60 = latest.ma60.unwrap_or(0.0);
    if ma5 > ma20 && ma20 > ma60 {
        score += 25;
    } else if ma5 > ma20 {
        score += 15;
    } else if latest.close > ma20 {
        score += 10;
    }

    let rsi = latest.rsi.unwrap_or(0.0);
    if (45.0..=55.0).contains(&rsi) {
        score += 15;
    } else if rsi > 55.0 && rsi < 70.0 {
        score += 25;
    } else if rsi > 30.0 && rsi < 45.0 {
        score += 10;
    } else if rsi >= 70.0 {
        score += 5;
    } else {
        // rsi <= 30: oversold, potential rebound
        score += 15;
    }

    if latest.macd.unwrap_or(0.0) > latest.macd_signal.unwrap_or(0.0) {
        score += 20;
    }

    let volume_ratio = latest.volume_ratio.unwrap_or(0.0);
    if volume_ratio > 1.5 {
        score += 30;
    } else if volume_ratio > 1.0 {
        score += 15;
    }

    score
}

/// Map a composite score to its recommendation label.
pub fn recommendation(score: u32) -> &'static str {
    match score {
        80.. => "Strong Buy",
        70..=79 => "Buy",
        60..=69 => "Cautious Buy",
        40..=59 => "Hold",
        20..=39 => "Sell",
        _ => "Strong Sell",
    }
}

/// Score the series and attach the recommendation label.
pub fn score_series(series: &IndicatorSeries) -> ScoreResult {
    let score = calculate_score(series);
    ScoreResult {
        score,
        recommendation: recommendation(score).to_string(),
    }
}
