use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::config::GenerationConfig;

/// Seam for the model-assisted rewrite backend
///
/// Both methods may block on the network and are always called from the
/// blocking pool.
#[cfg_attr(test, mockall::automock)]
pub trait GenerationEngine: Send + Sync {
    /// Whether the backend is reachable and has a model available
    fn is_ready(&self) -> bool;

    /// Run one generation round trip
    ///
    /// # Errors
    /// Returns error if the backend is unreachable or responds with a failure
    fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Generation backend over a local Ollama-style HTTP endpoint
pub struct OllamaGenerator {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
}

impl OllamaGenerator {
    /// # Errors
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build generation HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }

    fn version_url(&self) -> String {
        let root = self
            .endpoint
            .split("/api/")
            .next()
            .unwrap_or(&self.endpoint);
        format!("{root}/api/version")
    }
}

impl GenerationEngine for OllamaGenerator {
    fn is_ready(&self) -> bool {
        match self.client.get(self.version_url()).send() {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(error = %err, "generation endpoint not reachable");
                false
            }
        }
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let start = std::time::Instant::now();
        let response: GenerateResponse = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .context("generation request failed")?
            .error_for_status()
            .context("generation endpoint returned an error")?
            .json()
            .context("failed to parse generation response")?;

        tracing::info!(
            model = %self.model,
            output_len = response.response.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "generation completed"
        );

        Ok(response.response)
    }
}
