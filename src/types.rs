use serde::{Deserialize, Serialize};

/// Body of `POST generate-melody`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub start_sequence: Vec<String>,
}

/// Body of `POST convert-to-midi`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertRequest {
    pub melody: String,
}

/// Response of `POST upload-audio` and `POST record-audio`.
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceResponse {
    pub start_sequence: Vec<String>,
}

/// Response of `POST generate-melody`.
#[derive(Debug, Clone, Deserialize)]
pub struct MelodyResponse {
    pub melody: String,
}

/// Response of `POST process-full-workflow`.
///
/// The worker may return the start sequence without a melody when generation
/// was skipped or failed server-side; both fields are optional and stage
/// advancement is decided purely from which ones are present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowResponse {
    #[serde(default)]
    pub start_sequence: Option<Vec<String>>,
    #[serde(default)]
    pub melody: Option<String>,
}

/// Response of `POST create-demo`.
#[derive(Debug, Clone, Deserialize)]
pub struct DemoResponse {
    pub start_sequence: Vec<String>,
    pub melody: String,
}

/// Response of `GET health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body the worker attaches to non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Response of `GET auth/profile`. A failed fetch is treated as
/// "not logged in" rather than an error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub tracks_created: Option<u64>,
    #[serde(default)]
    pub joined: Option<String>,
}
