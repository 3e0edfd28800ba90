//! Model host client
//!
//! Generic remote function executor: upload a file, invoke a versioned model,
//! get JSON back. Used for the vocal separator and the word-level ASR
//! aligner. The separator's return shape varies between model versions, so it
//! is parsed into a tagged sum instead of probed dynamically.

use crate::models::RawLyrics;
use openkara_common::{Error, Result};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const SEPARATOR_TIMEOUT: Duration = Duration::from_secs(600);
const ALIGNER_TIMEOUT: Duration = Duration::from_secs(600);

/// The separator's polymorphic output, normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum SeparatorOutput {
    /// Mapping with named stems. `no_vocals` may be absent.
    Stems {
        vocals: String,
        no_vocals: Option<String>,
    },
    /// Ordered pair (or longer list) of URLs: vocals first.
    Pair {
        vocals: String,
        no_vocals: Option<String>,
    },
    /// A single URL: the vocal stem only.
    Single { vocals: String },
}

impl SeparatorOutput {
    /// Parse the raw model payload.
    ///
    /// Accepted shapes: an object with stem keys (`vocals` plus one of
    /// `no_vocals` / `other` / `accompaniment`), an object with a `url`
    /// field, an array of URLs, or a bare string.
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                if let Some(vocals) = map.get("vocals").and_then(Value::as_str) {
                    let no_vocals = ["no_vocals", "other", "accompaniment"]
                        .iter()
                        .find_map(|key| map.get(*key).and_then(Value::as_str))
                        .filter(|s| !s.is_empty())
                        .map(str::to_string);
                    return Ok(SeparatorOutput::Stems {
                        vocals: vocals.to_string(),
                        no_vocals,
                    });
                }
                if let Some(url) = map.get("url").and_then(Value::as_str) {
                    return Ok(SeparatorOutput::Single {
                        vocals: url.to_string(),
                    });
                }
                Err(Error::Model(format!(
                    "separator output object missing stem urls: {}",
                    value
                )))
            }
            Value::Array(items) => {
                let urls: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                match urls.as_slice() {
                    [] => Err(Error::Model("separator output array is empty".to_string())),
                    [vocals] => Ok(SeparatorOutput::Single {
                        vocals: vocals.to_string(),
                    }),
                    [vocals, no_vocals, ..] => Ok(SeparatorOutput::Pair {
                        vocals: vocals.to_string(),
                        no_vocals: Some(no_vocals.to_string()),
                    }),
                }
            }
            Value::String(url) => Ok(SeparatorOutput::Single {
                vocals: url.clone(),
            }),
            other => Err(Error::Model(format!(
                "unexpected separator output shape: {}",
                other
            ))),
        }
    }

    pub fn vocals_url(&self) -> &str {
        match self {
            SeparatorOutput::Stems { vocals, .. }
            | SeparatorOutput::Pair { vocals, .. }
            | SeparatorOutput::Single { vocals } => vocals,
        }
    }

    pub fn no_vocals_url(&self) -> Option<&str> {
        match self {
            SeparatorOutput::Stems { no_vocals, .. } | SeparatorOutput::Pair { no_vocals, .. } => {
                no_vocals.as_deref()
            }
            SeparatorOutput::Single { .. } => None,
        }
    }
}

/// Options for the word-level ASR aligner.
#[derive(Debug, Clone, Default)]
pub struct AlignerOptions {
    /// Request speaker diarization. On model failure the call retries once
    /// with diarization off.
    pub diarize: bool,
    /// Reference lyric lines passed as a text prior when the model supports
    /// one.
    pub initial_prompt: Option<String>,
}

/// Client for the remote model host.
pub struct ModelHost {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    separator_model: String,
    aligner_model: String,
}

impl ModelHost {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        separator_model: &str,
        aligner_model: &str,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            separator_model: separator_model.to_string(),
            aligner_model: aligner_model.to_string(),
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Upload a local file; returns a URL the host can read back.
    pub async fn upload(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Model(format!("read {}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")
            .map_err(|e| Error::Model(format!("multipart: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("content", part);

        let url = format!("{}/files", self.base_url);
        let response = self
            .authorize(self.http.post(&url).multipart(form).timeout(UPLOAD_TIMEOUT))
            .send()
            .await
            .map_err(|e| Error::Model(format!("upload failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Model(format!("upload returned HTTP {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Model(format!("upload response invalid: {}", e)))?;

        body.get("url")
            .and_then(Value::as_str)
            .or_else(|| body.pointer("/urls/get").and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| Error::Model("upload response carried no url".to_string()))
    }

    /// Invoke a versioned model synchronously and return its output payload.
    async fn run(&self, model: &str, input: Value, timeout: Duration) -> Result<Value> {
        let url = format!("{}/run/{}", self.base_url, model);
        let response = self
            .authorize(self.http.post(&url).json(&json!({ "input": input })).timeout(timeout))
            .send()
            .await
            .map_err(|e| Error::Model(format!("{} failed: {}", model, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!(
                "{} returned HTTP {}: {}",
                model,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Model(format!("{} response invalid: {}", model, e)))?;
        Ok(body.get("output").cloned().unwrap_or(body))
    }

    /// Separate vocals from the instrumental.
    pub async fn run_separator(&self, audio_url: &str) -> Result<SeparatorOutput> {
        let input = json!({
            "audio": audio_url,
            "stem": "vocals",
        });
        let output = self
            .run(&self.separator_model, input, SEPARATOR_TIMEOUT)
            .await?;
        SeparatorOutput::parse(&output)
    }

    /// Run word-level ASR over the vocal stem.
    ///
    /// With `diarize` set, a model failure is retried once without
    /// diarization before giving up, since diarization pipelines reject some
    /// inputs the plain transcription path handles fine.
    pub async fn run_aligner(&self, audio_url: &str, options: &AlignerOptions) -> Result<RawLyrics> {
        match self.run_aligner_once(audio_url, options.diarize, options).await {
            Ok(raw) => Ok(raw),
            Err(e) if options.diarize => {
                tracing::warn!("aligner failed with diarization: {}; retrying without", e);
                self.run_aligner_once(audio_url, false, options).await
            }
            Err(e) => Err(e),
        }
    }

    async fn run_aligner_once(
        &self,
        audio_url: &str,
        diarize: bool,
        options: &AlignerOptions,
    ) -> Result<RawLyrics> {
        let mut input = json!({
            "audio_file": audio_url,
            "align_output": true,
            "diarization": diarize,
        });
        if let Some(prompt) = &options.initial_prompt {
            input["initial_prompt"] = Value::String(prompt.clone());
        }

        let output = self.run(&self.aligner_model, input, ALIGNER_TIMEOUT).await?;
        serde_json::from_value(normalize_aligner_output(output))
            .map_err(|e| Error::Model(format!("aligner output invalid: {}", e)))
    }

    /// Download a model output URL into the artifact store.
    pub async fn download_output(
        &self,
        url: &str,
        store: &crate::store::ArtifactStore,
        track_id: &str,
        file: crate::store::TrackFile,
    ) -> Result<u64> {
        let response = self
            .http
            .get(url)
            .timeout(SEPARATOR_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Model(format!("stem download failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Model(format!(
                "stem download returned HTTP {}",
                response.status()
            )));
        }
        store.save_binary(track_id, file, response.bytes_stream()).await
    }

    /// Lightweight reachability probe for the health view.
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorize(self.http.get(&url).timeout(Duration::from_secs(10)))
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

/// Some aligner versions return a bare segment array instead of the wrapped
/// object form.
fn normalize_aligner_output(output: Value) -> Value {
    match output {
        Value::Array(segments) => json!({ "segments": segments }),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stems_mapping() {
        let value = json!({
            "vocals": "https://host.example/v.mp3",
            "no_vocals": "https://host.example/nv.mp3"
        });
        let output = SeparatorOutput::parse(&value).unwrap();
        assert_eq!(output.vocals_url(), "https://host.example/v.mp3");
        assert_eq!(output.no_vocals_url(), Some("https://host.example/nv.mp3"));
    }

    #[test]
    fn test_parse_mapping_with_other_key() {
        let value = json!({
            "vocals": "https://host.example/v.mp3",
            "other": "https://host.example/o.mp3"
        });
        let output = SeparatorOutput::parse(&value).unwrap();
        assert_eq!(output.no_vocals_url(), Some("https://host.example/o.mp3"));
    }

    #[test]
    fn test_parse_mapping_without_instrumental() {
        let value = json!({ "vocals": "https://host.example/v.mp3" });
        let output = SeparatorOutput::parse(&value).unwrap();
        assert_eq!(output.no_vocals_url(), None);
    }

    #[test]
    fn test_parse_url_array() {
        let value = json!(["https://host.example/v.mp3", "https://host.example/nv.mp3"]);
        let output = SeparatorOutput::parse(&value).unwrap();
        assert_eq!(output.vocals_url(), "https://host.example/v.mp3");
        assert_eq!(output.no_vocals_url(), Some("https://host.example/nv.mp3"));
    }

    #[test]
    fn test_parse_single_string_and_url_object() {
        let output = SeparatorOutput::parse(&json!("https://host.example/v.mp3")).unwrap();
        assert_eq!(output.vocals_url(), "https://host.example/v.mp3");
        assert_eq!(output.no_vocals_url(), None);

        let output = SeparatorOutput::parse(&json!({"url": "https://host.example/v.mp3"})).unwrap();
        assert_eq!(output.vocals_url(), "https://host.example/v.mp3");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SeparatorOutput::parse(&json!(42)).is_err());
        assert!(SeparatorOutput::parse(&json!([])).is_err());
        assert!(SeparatorOutput::parse(&json!({"weird": true})).is_err());
    }

    #[test]
    fn test_normalize_aligner_output_wraps_arrays() {
        let normalized = normalize_aligner_output(json!([{"start": 0.0, "end": 1.0, "words": []}]));
        assert!(normalized.get("segments").is_some());

        let passthrough = normalize_aligner_output(json!({"segments": []}));
        assert_eq!(passthrough, json!({"segments": []}));
    }
}
