//! Streaming client for an OpenAI-compatible chat completion backend.
//!
//! Generates the analysis narrative for an indicator series, emitting text
//! incrementally through a channel and closing with a structured completion
//! carrying the extracted stance and score.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use analysis_core::{
    AnalysisError, IndicatorSeries, MarketType, NarrativeFragment, NarrativeGenerator,
};

mod parse;
mod prompt;

use parse::{analysis_score, extract_recommendation, SseLineBuffer, StreamLine};
use prompt::{build_prompt, TechnicalSnapshot, SYSTEM_PROMPT};

const FRAGMENT_BUFFER: usize = 32;

/// Connection settings for the narrative backend.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl AiConfig {
    /// Read `API_URL` / `API_KEY` / `API_MODEL` / `API_TIMEOUT` from the
    /// environment, with OpenAI-shaped defaults.
    pub fn from_env() -> Self {
        let api_url =
            std::env::var("API_URL").unwrap_or_else(|_| "https://api.openai.com".to_string());
        let api_key = std::env::var("API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!("API_KEY is not set; narrative requests will be unauthenticated");
        }
        let model = std::env::var("API_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let timeout_secs: u64 = std::env::var("API_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        Self {
            api_url,
            api_key,
            model,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

/// Normalize a configured endpoint into a chat-completions URL.
///
/// A trailing `/` means "append the path without the /v1 segment"; a
/// trailing `#` means "use the URL exactly as given".
pub fn format_api_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(exact) = trimmed.strip_suffix('#') {
        exact.to_string()
    } else if trimmed.ends_with('/') {
        format!("{trimmed}chat/completions")
    } else {
        format!("{trimmed}/v1/chat/completions")
    }
}

/// Narrative generator backed by an OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenAiAnalyzer {
    config: AiConfig,
    client: Client,
}

impl OpenAiAnalyzer {
    pub fn new(config: AiConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, client }
    }

    pub fn from_env() -> Self {
        Self::new(AiConfig::from_env())
    }

    fn request_body(&self, prompt: &str, streaming: bool) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.7,
            "stream": streaming,
        })
    }

    async fn send_request(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, AnalysisError> {
        let url = format_api_url(&self.config.api_url);
        let mut request = self.client.post(&url).json(body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AnalysisError::Internal(format!("narrative backend unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .ok()
                .and_then(|body| backend_error_message(&body))
                .unwrap_or_default();
            return Err(AnalysisError::Internal(format!(
                "narrative backend returned {status}: {detail}"
            )));
        }
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: String,
}

fn backend_error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .ok()
        .or_else(|| (!body.is_empty()).then(|| body.chars().take(200).collect()))
}

#[async_trait]
impl NarrativeGenerator for OpenAiAnalyzer {
    async fn generate(
        &self,
        series: &IndicatorSeries,
        symbol: &str,
        market: &MarketType,
        streaming: bool,
    ) -> Result<mpsc::Receiver<Result<NarrativeFragment, AnalysisError>>, AnalysisError> {
        let snapshot = TechnicalSnapshot::from_series(series);
        let prompt = build_prompt(series, &snapshot, symbol, market);
        let body = self.request_body(&prompt, streaming);

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let this = self.clone();
        let symbol = symbol.to_string();

        tokio::spawn(async move {
            let result = if streaming {
                this.run_streaming(&body, &snapshot, &tx).await
            } else {
                this.run_blocking(&body, &snapshot, &tx).await
            };
            if let Err(err) = result {
                tracing::warn!(symbol, error = %err, "narrative generation failed");
                let _ = tx.send(Err(err)).await;
            }
        });

        Ok(rx)
    }
}

impl OpenAiAnalyzer {
    async fn run_streaming(
        &self,
        body: &serde_json::Value,
        snapshot: &TechnicalSnapshot,
        tx: &mpsc::Sender<Result<NarrativeFragment, AnalysisError>>,
    ) -> Result<(), AnalysisError> {
        let response = self.send_request(body).await?;
        let mut byte_stream = response.bytes_stream();

        let mut buffer = SseLineBuffer::new();
        let mut full_text = String::new();
        let mut saw_done = false;

        'outer: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk
                .map_err(|e| AnalysisError::Internal(format!("narrative stream broke: {e}")))?;

            for line in buffer.push(&chunk) {
                match line {
                    StreamLine::Content(text) => {
                        full_text.push_str(&text);
                        if tx
                            .send(Ok(NarrativeFragment::Chunk(text)))
                            .await
                            .is_err()
                        {
                            // Receiver gone: the caller cancelled.
                            return Ok(());
                        }
                    }
                    StreamLine::Done => {
                        saw_done = true;
                        break 'outer;
                    }
                    StreamLine::Skip => {}
                }
            }
        }

        // A backend that closes without [DONE] may leave the last delta on
        // an unterminated line.
        if !saw_done {
            if let StreamLine::Content(text) = buffer.finish() {
                full_text.push_str(&text);
                if tx
                    .send(Ok(NarrativeFragment::Chunk(text)))
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }
        }

        if full_text.is_empty() {
            return Err(AnalysisError::NoResult(
                "narrative backend produced no content".to_string(),
            ));
        }

        // Terminate the text block so the completion line starts clean.
        if !full_text.ends_with('\n') {
            if tx
                .send(Ok(NarrativeFragment::Chunk("\n".to_string())))
                .await
                .is_err()
            {
                return Ok(());
            }
        }

        self.finish(&full_text, snapshot, tx).await
    }

    async fn run_blocking(
        &self,
        body: &serde_json::Value,
        snapshot: &TechnicalSnapshot,
        tx: &mpsc::Sender<Result<NarrativeFragment, AnalysisError>>,
    ) -> Result<(), AnalysisError> {
        let response = self.send_request(body).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Internal(format!("bad narrative payload: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(AnalysisError::NoResult(
                "narrative backend produced no content".to_string(),
            ));
        }

        if tx
            .send(Ok(NarrativeFragment::Chunk(text.clone())))
            .await
            .is_err()
        {
            return Ok(());
        }
        self.finish(&text, snapshot, tx).await
    }

    async fn finish(
        &self,
        text: &str,
        snapshot: &TechnicalSnapshot,
        tx: &mpsc::Sender<Result<NarrativeFragment, AnalysisError>>,
    ) -> Result<(), AnalysisError> {
        let recommendation = extract_recommendation(text);
        let score = analysis_score(text, snapshot);
        let _ = tx
            .send(Ok(NarrativeFragment::Completed {
                score: Some(score),
                recommendation: Some(recommendation),
            }))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_url_gets_v1_path() {
        assert_eq!(
            format_api_url("https://api.openai.com"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn trailing_slash_skips_v1() {
        assert_eq!(
            format_api_url("https://gateway.local/openai/"),
            "https://gateway.local/openai/chat/completions"
        );
    }

    #[test]
    fn trailing_hash_is_used_verbatim() {
        assert_eq!(
            format_api_url("https://gateway.local/custom/chat#"),
            "https://gateway.local/custom/chat"
        );
    }

    #[test]
    fn backend_error_prefers_structured_message() {
        let body = r#"{"error": {"message": "model overloaded"}}"#;
        assert_eq!(
            backend_error_message(body),
            Some("model overloaded".to_string())
        );
        assert_eq!(backend_error_message("plain text"), Some("plain text".to_string()));
        assert_eq!(backend_error_message(""), None);
    }
}
