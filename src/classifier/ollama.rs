// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ollama API oracle for local AI inference

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::Oracle;
use crate::{Result, TriageError};

/// Oracle backed by a local Ollama server
pub struct OllamaOracle {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaOracle {
    /// Create a new Ollama oracle
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: normalize_url(base_url),
            model: model.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                TriageError::OracleUnavailable(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Check if the configured model is available
    pub async fn model_available(&self) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| {
            m.starts_with(&self.model) || m == &format!("{}:latest", self.model)
        }))
    }

    /// Generate text completion
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        debug!("Sending request to Ollama: model={}", self.model);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    TriageError::OracleUnavailable(format!("{}: {}", self.base_url, e))
                } else {
                    TriageError::Api(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(TriageError::OracleFailed(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let result: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| TriageError::OracleResponse(format!("unexpected Ollama payload: {}", e)))?;
        Ok(result.response)
    }
}

#[async_trait]
impl Oracle for OllamaOracle {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn ask(&self, prompt: &str) -> Result<String> {
        self.generate(prompt).await
    }

    async fn health_check(&self) -> Result<()> {
        if self.model_available().await? {
            Ok(())
        } else {
            Err(TriageError::OracleUnavailable(format!(
                "model '{}' not found at {} (try: ollama pull {})",
                self.model, self.base_url, self.model
            )))
        }
    }
}

fn normalize_url(base_url: &str) -> String {
    base_url
        .trim_end_matches('/')
        .replace("/api/generate", "")
        .replace("/api/chat", "")
}
