//! Parsing of the backend's SSE stream and of the finished narrative text.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::prompt::TechnicalSnapshot;

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum StreamLine {
    Content(String),
    Done,
    Skip,
}

/// Interpret one line of an OpenAI-style SSE body.
///
/// Unparseable payloads are skipped rather than failing the whole stream;
/// some backends interleave keep-alive comments and non-JSON frames.
pub(crate) fn parse_stream_line(line: &str) -> StreamLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return StreamLine::Skip;
    }
    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
        return StreamLine::Skip;
    };
    if payload == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|s| !s.is_empty())
            .map_or(StreamLine::Skip, StreamLine::Content),
        Err(_) => StreamLine::Skip,
    }
}

/// Reassembles SSE lines from arbitrarily split byte chunks.
///
/// `finish` drains whatever is left when the stream closes without a final
/// newline, so a trailing delta on an abruptly closed connection is not lost.
pub(crate) struct SseLineBuffer {
    pending: String,
}

impl SseLineBuffer {
    pub(crate) fn new() -> Self {
        Self {
            pending: String::new(),
        }
    }

    /// Feed raw bytes, returning the stream lines they completed.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<StreamLine> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            lines.push(parse_stream_line(&line));
        }
        lines
    }

    /// Parse the unterminated remainder, if any.
    pub(crate) fn finish(self) -> StreamLine {
        parse_stream_line(&self.pending)
    }
}

fn advice_section() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)investment advice[:\s]*(.*?)(?:\n#|\z)").unwrap()
    })
}

/// Pull a one-word stance out of the narrative's Investment Advice section.
pub(crate) fn extract_recommendation(text: &str) -> String {
    let section = advice_section()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default();

    if section.contains("buy") || section.contains("accumulate") {
        "Buy".to_string()
    } else if section.contains("sell") || section.contains("reduce") {
        "Sell".to_string()
    } else if section.contains("hold") {
        "Hold".to_string()
    } else {
        "Neutral".to_string()
    }
}

/// Score derived from the technical snapshot plus narrative sentiment.
///
/// Starts at a neutral 50 and shifts on trend, volume, RSI extremes and the
/// stance keywords found in the text. Clamped to 0..=100.
pub(crate) fn analysis_score(text: &str, snapshot: &TechnicalSnapshot) -> u32 {
    let mut score: i32 = 50;

    score += if snapshot.trend_up { 10 } else { -10 };
    score += if snapshot.volume_rising { 5 } else { -5 };
    if snapshot.rsi < 30.0 {
        score += 15;
    } else if snapshot.rsi > 70.0 {
        score -= 15;
    }

    let lower = text.to_lowercase();
    if lower.contains("strong buy") || lower.contains("significant upside") {
        score += 20;
    } else if lower.contains("buy") || lower.contains("bullish") {
        score += 10;
    }
    if lower.contains("strong sell") || lower.contains("significant downside") {
        score -= 20;
    } else if lower.contains("sell") || lower.contains("bearish") {
        score -= 10;
    }

    score.clamp(0, 100) as u32
}
