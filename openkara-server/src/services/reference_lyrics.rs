//! Reference lyrics client
//!
//! Primary source is a free plain-lyrics search endpoint. When it comes up
//! empty the generative fallback asks a multimodal chat model for the lyrics,
//! first "hybrid" (prompt plus base64 audio attachment), then text-only.

use base64::Engine;
use openkara_common::{Error, Result};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const GENERATIVE_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for the plain-lyrics provider and the generative fallback.
pub struct ReferenceLyricsClient {
    http: reqwest::Client,
    search_url: String,
    generative_url: String,
    generative_token: Option<String>,
    generative_model: String,
}

impl ReferenceLyricsClient {
    pub fn new(
        search_url: &str,
        generative_url: &str,
        generative_token: Option<String>,
        generative_model: &str,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            search_url: search_url.trim_end_matches('/').to_string(),
            generative_url: generative_url.trim_end_matches('/').to_string(),
            generative_token,
            generative_model: generative_model.to_string(),
        }
    }

    /// Search the plain-lyrics provider. Returns the first hit with
    /// non-empty plain lyrics, split into trimmed lines, or `None`.
    pub async fn fetch(&self, title: &str, artist: &str) -> Option<Vec<String>> {
        let url = format!("{}/search", self.search_url);
        let query = format!("{} {}", title, artist);

        let response = match self
            .http
            .get(&url)
            .query(&[("q", query.as_str())])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("lyrics search failed for '{}' by '{}': {}", title, artist, e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!("lyrics search returned HTTP {}", response.status());
            return None;
        }

        let results: Vec<Value> = match response.json().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("lyrics search response invalid: {}", e);
                return None;
            }
        };

        for result in results {
            if let Some(plain) = result.get("plainLyrics").and_then(Value::as_str) {
                let lines = clean_lines(plain);
                if !lines.is_empty() {
                    return Some(lines);
                }
            }
        }
        None
    }

    /// Generative fallback. Tries a hybrid request with the vocal stem
    /// attached; any failure retries text-only. Returns `None` when both
    /// attempts fail or no token is configured.
    pub async fn fetch_generative(
        &self,
        title: &str,
        artist: &str,
        raw_text: Option<&str>,
        vocals_path: Option<&Path>,
    ) -> Option<Vec<String>> {
        self.generative_token.as_ref()?;

        if let Some(path) = vocals_path {
            match self.generative_attempt(title, artist, raw_text, Some(path)).await {
                Ok(lines) if !lines.is_empty() => return Some(lines),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("hybrid generative lyrics failed: {}; retrying text-only", e);
                }
            }
        }

        match self.generative_attempt(title, artist, raw_text, None).await {
            Ok(lines) if !lines.is_empty() => Some(lines),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("generative lyrics failed: {}", e);
                None
            }
        }
    }

    async fn generative_attempt(
        &self,
        title: &str,
        artist: &str,
        raw_text: Option<&str>,
        vocals_path: Option<&Path>,
    ) -> Result<Vec<String>> {
        let mut prompt = format!(
            "Provide the complete lyrics of the song \"{}\" by {}. \
             Reply with the lyric lines only, one sung line per text line. \
             No section headers, no commentary.",
            title, artist
        );
        if let Some(text) = raw_text {
            prompt.push_str("\n\nA rough automatic transcription for reference:\n");
            prompt.push_str(text);
        }

        let content = match vocals_path {
            Some(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| Error::Model(format!("read {}: {}", path.display(), e)))?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                json!([
                    { "type": "text", "text": prompt },
                    {
                        "type": "input_audio",
                        "input_audio": { "data": encoded, "format": "mp3" }
                    }
                ])
            }
            None => Value::String(prompt),
        };

        let body = json!({
            "model": self.generative_model,
            "messages": [{ "role": "user", "content": content }],
        });

        let url = format!("{}/chat/completions", self.generative_url);
        let mut request = self.http.post(&url).json(&body).timeout(GENERATIVE_TIMEOUT);
        if let Some(token) = &self.generative_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Model(format!("generative request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Model(format!(
                "generative endpoint returned HTTP {}",
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::Model(format!("generative response invalid: {}", e)))?;

        let text = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Model("generative response carried no content".to_string()))?;

        Ok(clean_lines(text))
    }

    /// Lightweight reachability probe of the plain-lyrics provider.
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/search", self.search_url);
        let response = self
            .http
            .get(&url)
            .query(&[("q", "test")])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Model(format!("unreachable: {}", e)))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Model(format!("HTTP {}", response.status())))
        }
    }

    /// Reachability probe of the generative fallback endpoint.
    pub async fn ping_generative(&self) -> Result<()> {
        let Some(token) = &self.generative_token else {
            return Err(Error::Model("API token not set".to_string()));
        };
        let url = format!("{}/models", self.generative_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Model(format!("unreachable: {}", e)))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Model(format!("HTTP {}", response.status())))
        }
    }
}

/// Split a lyrics blob into clean lines: trimmed, non-empty, section headers
/// (`[Chorus]`, `[Verse 1]`) and known provider noise removed.
fn clean_lines(text: &str) -> Vec<String> {
    text.replace("You might also like", "")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !(line.starts_with('[') && line.ends_with(']')))
        .map(str::to_string)
        .collect()
}
