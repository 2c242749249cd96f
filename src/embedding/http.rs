//! OpenAI-compatible embedding service client.
//!
//! Blocking on purpose: a batch runs synchronously end to end, and the
//! binary drives it from `spawn_blocking`.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EmbeddingProvider, EmbeddingVector, check_batch_len};
use crate::error::EmbeddingError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Embedding provider backed by a `POST {endpoint}/embeddings` API.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<SecretString>,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::InitFailed(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}/embeddings", endpoint.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        })
    }
}

impl EmbeddingProvider for HttpEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut request = self.client.post(&self.url).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::RequestFailed(format!(
                "{status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let body = response
            .text()
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        let vectors = parse_response(&body, texts.len())?;
        debug!(count = vectors.len(), model = %self.model, "Embedded batch");
        Ok(vectors)
    }
}

/// Parse an embeddings response body into vectors ordered like the input.
pub fn parse_response(body: &str, expected: usize) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
    let mut parsed: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
    check_batch_len(expected, parsed.data.len())?;

    // Services may answer out of order; `index` is authoritative when present.
    if parsed.data.iter().all(|d| d.index.is_some()) {
        parsed.data.sort_by_key(|d| d.index);
    }

    let dimension = parsed.data.first().map_or(0, |d| d.embedding.len());
    parsed
        .data
        .into_iter()
        .map(|d| {
            if d.embedding.len() == dimension {
                Ok(EmbeddingVector::normalized(d.embedding))
            } else {
                Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    got: d.embedding.len(),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes() {
        let body = r#"{"data": [{"index": 0, "embedding": [3.0, 4.0]}]}"#;
        let vectors = parse_response(body, 1).unwrap();
        assert_eq!(vectors[0].as_slice(), &[0.6, 0.8]);
    }

    #[test]
    fn reorders_by_index() {
        let body = r#"{"data": [
            {"index": 1, "embedding": [0.0, 1.0]},
            {"index": 0, "embedding": [1.0, 0.0]}
        ]}"#;
        let vectors = parse_response(body, 2).unwrap();
        assert_eq!(vectors[0].as_slice(), &[1.0, 0.0]);
        assert_eq!(vectors[1].as_slice(), &[0.0, 1.0]);
    }

    #[test]
    fn rejects_wrong_count() {
        let body = r#"{"data": [{"embedding": [1.0]}]}"#;
        assert!(matches!(
            parse_response(body, 2),
            Err(EmbeddingError::LengthMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let body = r#"{"data": [{"embedding": [1.0, 0.0]}, {"embedding": [1.0]}]}"#;
        assert!(matches!(
            parse_response(body, 2),
            Err(EmbeddingError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_response("not json", 1),
            Err(EmbeddingError::InvalidResponse(_))
        ));
    }

    #[test]
    fn url_has_single_slash() {
        let embedder = HttpEmbedder::new("http://localhost:8080/v1/", "m", None).unwrap();
        assert_eq!(embedder.url, "http://localhost:8080/v1/embeddings");
        assert_eq!(embedder.name(), "m");
    }
}
