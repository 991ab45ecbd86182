use anyhow::{Context, Result};
use reqwest::{multipart, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::types::{
    ConvertRequest, DemoResponse, ErrorBody, GenerateRequest, HealthResponse, MelodyResponse,
    Profile, SequenceResponse, WorkflowResponse,
};

const DEFAULT_BASE_URL: &str = "http://localhost:5000/api/";

/// Budget for quick calls (upload/extract, convert, demo, fetches).
const SHORT_TIMEOUT: Duration = Duration::from_secs(30);
/// Server-side recording runs for a fixed few seconds plus pitch analysis.
const RECORD_TIMEOUT: Duration = Duration::from_secs(60);
/// Melody generation runs a model inference and can take minutes.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(300);

/// How a pipeline call failed. Timeouts are deliberately distinct from
/// connectivity failures and from errors the worker itself reported.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,
    #[error("{message}")]
    Remote { message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response from worker: {0}")]
    Decode(String),
}

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl Client {
    pub fn new(base_url: Option<&str>, auth_token: Option<&str>) -> Result<Self> {
        let url = normalize_base_url(base_url.unwrap_or(DEFAULT_BASE_URL))
            .context("invalid worker base URL")?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url: url, auth_token: auth_token.map(str::to_owned) })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        let response = self
            .http
            .get(self.endpoint("health")?)
            .timeout(SHORT_TIMEOUT)
            .send()
            .await
            .map_err(classify)?;
        read_json(response).await
    }

    /// Stage 1→2: upload the selected audio and extract its start sequence.
    pub async fn extract_sequence(
        &self,
        file_name: &str,
        mime: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<Vec<String>, ApiError> {
        let form = audio_form(file_name, mime, bytes)?;
        debug!(file_name, "uploading audio for sequence extraction");
        let response = self
            .http
            .post(self.endpoint("upload-audio")?)
            .timeout(SHORT_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(classify)?;
        let body: SequenceResponse = read_json(response).await?;
        Ok(body.start_sequence)
    }

    /// Stage 2→3: long-running model inference on the worker.
    pub async fn generate_melody(&self, sequence: &[String]) -> Result<String, ApiError> {
        let request = GenerateRequest { start_sequence: sequence.to_vec() };
        let response = self
            .http
            .post(self.endpoint("generate-melody")?)
            .timeout(GENERATE_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(classify)?;
        let body: MelodyResponse = read_json(response).await?;
        Ok(body.melody)
    }

    /// Stage 3→4: the worker renders the MIDI file server-side and keeps it;
    /// success is an acknowledgement, not a payload.
    pub async fn render_midi(&self, melody: &str) -> Result<(), ApiError> {
        let request = ConvertRequest { melody: melody.to_owned() };
        let response = self
            .http
            .post(self.endpoint("convert-to-midi")?)
            .timeout(SHORT_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(classify)?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Combined extract+generate. The worker may answer with only the start
    /// sequence when generation failed partway; callers advance only as far
    /// as the returned artifacts justify.
    pub async fn run_full_workflow(
        &self,
        file_name: &str,
        mime: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<WorkflowResponse, ApiError> {
        let form = audio_form(file_name, mime, bytes)?;
        debug!(file_name, "submitting full workflow");
        let response = self
            .http
            .post(self.endpoint("process-full-workflow")?)
            .timeout(GENERATE_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(classify)?;
        read_json(response).await
    }

    /// Server-side microphone recording; returns the extracted sequence.
    pub async fn record_audio(&self) -> Result<Vec<String>, ApiError> {
        let response = self
            .http
            .post(self.endpoint("record-audio")?)
            .timeout(RECORD_TIMEOUT)
            .send()
            .await
            .map_err(classify)?;
        let body: SequenceResponse = read_json(response).await?;
        Ok(body.start_sequence)
    }

    /// Fabricates a sample sequence and melody in one call, making the MIDI
    /// endpoints valid immediately.
    pub async fn create_demo(&self) -> Result<DemoResponse, ApiError> {
        let response = self
            .http
            .post(self.endpoint("create-demo")?)
            .timeout(SHORT_TIMEOUT)
            .send()
            .await
            .map_err(classify)?;
        read_json(response).await
    }

    /// Download the rendered MIDI file. Always re-fetched, never cached.
    pub async fn fetch_midi_bytes(&self) -> Result<Vec<u8>, ApiError> {
        self.fetch_bytes("download-midi").await
    }

    /// Rendered audio stream of the current MIDI, for the "generated"
    /// playback source.
    pub async fn fetch_midi_audio(&self) -> Result<Vec<u8>, ApiError> {
        self.fetch_bytes("play-midi").await
    }

    /// Audio captured by the most recent server-side recording, for the
    /// "original" playback source after a recording.
    pub async fn fetch_recorded_audio(&self) -> Result<Vec<u8>, ApiError> {
        self.fetch_bytes("get-recorded-audio").await
    }

    /// Auth collaborator. Any failure here means "not logged in".
    pub async fn fetch_profile(&self) -> Result<Profile, ApiError> {
        let mut request = self.http.get(self.endpoint("auth/profile")?).timeout(SHORT_TIMEOUT);
        if let Some(token) = self.auth_token.as_deref() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(classify)?;
        read_json(response).await
    }

    async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .http
            .get(self.endpoint(path)?)
            .timeout(SHORT_TIMEOUT)
            .send()
            .await
            .map_err(classify)?;
        let response = ensure_success(response).await?;
        let bytes = response.bytes().await.map_err(classify)?;
        Ok(bytes.to_vec())
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url.join(path).map_err(|err| ApiError::Network(err.to_string()))
    }
}

/// The worker expects the upload under the `audio` multipart field.
fn audio_form(
    file_name: &str,
    mime: Option<&str>,
    bytes: Vec<u8>,
) -> Result<multipart::Form, ApiError> {
    let mut part = multipart::Part::bytes(bytes).file_name(file_name.to_owned());
    if let Some(mime) = mime {
        part = part.mime_str(mime).map_err(|err| ApiError::Decode(err.to_string()))?;
    }
    Ok(multipart::Form::new().part("audio", part))
}

fn classify(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else {
        ApiError::Network(err.to_string())
    }
}

/// Map non-2xx responses to `Remote`, preferring the worker's own
/// `{"error": ...}` message over a bare status line.
async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Remote { message: remote_message(status, &body) })
}

fn remote_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => format!("worker responded with status {status}"),
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let response = ensure_success(response).await?;
    response.json().await.map_err(classify)
}

fn normalize_base_url(raw: &str) -> Result<Url> {
    // A trailing slash matters for Url::join: without it the last path
    // segment would be replaced instead of extended.
    let mut raw = raw.to_owned();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_api_prefix_when_joining() {
        let url = normalize_base_url("http://localhost:5000/api").unwrap();
        assert_eq!(url.join("upload-audio").unwrap().as_str(), "http://localhost:5000/api/upload-audio");
        assert_eq!(url.join("auth/profile").unwrap().as_str(), "http://localhost:5000/api/auth/profile");
    }

    #[test]
    fn base_url_accepts_existing_trailing_slash() {
        let url = normalize_base_url("http://localhost:5000/api/").unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/");
    }

    #[test]
    fn remote_message_prefers_worker_error_body() {
        let message = remote_message(
            StatusCode::BAD_REQUEST,
            r#"{"error": "Could not extract start sequence from audio"}"#,
        );
        assert_eq!(message, "Could not extract start sequence from audio");
    }

    #[test]
    fn remote_message_falls_back_to_status_line() {
        let message = remote_message(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(message.contains("502"));
    }
}
