use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::Rng;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::args::ApiEngine;
use crate::error::TranscribeError;
use crate::normalize::normalize;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECS: f64 = 2.0;

const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const GOOGLE_SPEECH_URL: &str = "https://speech.googleapis.com/v1/speech:recognize";

/// Boundary to the ASR engine.
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transcribe a 16 kHz mono PCM WAV segment.
    async fn transcribe(&self, wav: &Path) -> Result<String, TranscribeError>;
}

pub fn create(engine: ApiEngine, api_key: String) -> Arc<dyn Transcriber> {
    match engine {
        ApiEngine::Whisper => Arc::new(WhisperApi::new(api_key)),
        ApiEngine::Google => Arc::new(GoogleSpeech::new(api_key)),
    }
}

/// Run the engine with up to three attempts, exponential backoff and jitter.
/// Auth and quota failures abort immediately. Output is canonicalized.
pub async fn transcribe_with_retry(
    engine: &dyn Transcriber,
    wav: &Path,
) -> Result<String, TranscribeError> {
    let mut attempt = 0;
    loop {
        match engine.transcribe(wav).await {
            Ok(text) => {
                let cleaned = normalize(&text);
                debug!("{} transcript: {:.80}", engine.name(), cleaned);
                return Ok(cleaned);
            }
            Err(TranscribeError::Retryable(message)) if attempt + 1 < MAX_ATTEMPTS => {
                let backoff = BACKOFF_BASE_SECS * 2f64.powi(attempt as i32);
                let jitter = rand::thread_rng().gen_range(0.0..1.0);
                warn!(
                    "{} attempt {} failed, retrying in {:.1}s: {message}",
                    engine.name(),
                    attempt + 1,
                    backoff + jitter
                );
                sleep(Duration::from_secs_f64(backoff + jitter)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn classify_http_failure(status: StatusCode, body: &str) -> TranscribeError {
    let summary: String = body.chars().take(200).collect();
    match status.as_u16() {
        401 | 403 => TranscribeError::Auth(format!("HTTP {status}: {summary}")),
        429 if summary.contains("insufficient_quota") => {
            TranscribeError::Quota(format!("HTTP {status}: {summary}"))
        }
        _ => TranscribeError::Retryable(format!("HTTP {status}: {summary}")),
    }
}

async fn read_wav(wav: &Path) -> Result<Vec<u8>, TranscribeError> {
    tokio::fs::read(wav)
        .await
        .map_err(|e| TranscribeError::Retryable(format!("reading {}: {e}", wav.display())))
}

/// OpenAI Whisper API engine (default).
pub struct WhisperApi {
    client: reqwest::Client,
    api_key: String,
}

impl WhisperApi {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl Transcriber for WhisperApi {
    fn name(&self) -> &'static str {
        "whisper"
    }

    async fn transcribe(&self, wav: &Path) -> Result<String, TranscribeError> {
        let bytes = read_wav(wav).await?;
        let file_name = wav
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sample.wav".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::Retryable(format!("building upload: {e}")))?;
        let form = Form::new()
            .part("file", part)
            .text("model", "whisper-1")
            .text("response_format", "text")
            .text(
                "prompt",
                "Return only the spoken words without any formatting, timestamps, or descriptions.",
            );

        let resp = self
            .client
            .post(WHISPER_URL)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscribeError::Retryable(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &body));
        }
        resp.text()
            .await
            .map_err(|e| TranscribeError::Retryable(format!("reading response: {e}")))
    }
}

/// Google Cloud Speech-to-Text engine.
pub struct GoogleSpeech {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleSpeech {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognizeResult>,
}

#[derive(Deserialize)]
struct RecognizeResult {
    #[serde(default)]
    alternatives: Vec<RecognizeAlternative>,
}

#[derive(Deserialize)]
struct RecognizeAlternative {
    #[serde(default)]
    transcript: String,
}

#[async_trait]
impl Transcriber for GoogleSpeech {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn transcribe(&self, wav: &Path) -> Result<String, TranscribeError> {
        let bytes = read_wav(wav).await?;
        let request = json!({
            "config": {
                "encoding": "LINEAR16",
                "sampleRateHertz": 16000,
                "languageCode": "en-US",
                "enableAutomaticPunctuation": true,
                "model": "latest_long",
            },
            "audio": { "content": BASE64.encode(&bytes) },
        });

        let resp = self
            .client
            .post(GOOGLE_SPEECH_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| TranscribeError::Retryable(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &body));
        }

        let parsed: RecognizeResponse = resp
            .json()
            .await
            .map_err(|e| TranscribeError::Retryable(format!("decoding response: {e}")))?;
        let transcript: Vec<String> = parsed
            .results
            .into_iter()
            .filter_map(|r| r.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .collect();
        Ok(transcript.join(" "))
    }
}
