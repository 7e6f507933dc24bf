//! Ollama-based embedding client implementation.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Blocking embeddings client that talks to an Ollama-compatible endpoint.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: usize,
}

impl OllamaEmbedder {
    /// Builds a new Ollama embeddings client.
    pub fn new(base_url: String, model: String, timeout: Duration, max_retries: usize) -> Result<Self> {
        anyhow::ensure!(!base_url.trim().is_empty(), "missing Ollama base URL");
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Ollama HTTP client")?;
        let endpoint = format!("{}/api/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            max_retries: max_retries.max(1),
        })
    }

    /// Model identifier sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends one text to Ollama and returns its embedding vector.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        anyhow::ensure!(!text.trim().is_empty(), "cannot embed empty text");

        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                prompt: text,
            };
            let response = self.client.post(&self.endpoint).json(&request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp
                            .json()
                            .context("failed to parse Ollama embedding response")?;
                        anyhow::ensure!(
                            !parsed.embedding.is_empty(),
                            "Ollama returned an empty embedding vector"
                        );
                        return Ok(parsed.embedding);
                    }

                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("Ollama embeddings request failed ({}): {}", status, body);
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() || err.is_decode()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_inputs() {
        let embedder = OllamaEmbedder::new(
            "http://localhost:11434".to_string(),
            "mxbai-embed-large".to_string(),
            Duration::from_secs(5),
            1,
        )
        .expect("build embedder");
        assert!(embedder.embed("   ").is_err());
    }

    #[test]
    fn rejects_blank_configuration() {
        assert!(OllamaEmbedder::new(
            String::new(),
            "mxbai-embed-large".to_string(),
            Duration::from_secs(5),
            1,
        )
        .is_err());
        assert!(OllamaEmbedder::new(
            "http://localhost:11434".to_string(),
            "  ".to_string(),
            Duration::from_secs(5),
            1,
        )
        .is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert!(retry_backoff(2) > retry_backoff(1));
        assert_eq!(retry_backoff(5), retry_backoff(9));
    }
}
