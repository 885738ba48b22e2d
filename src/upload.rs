use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::keygen::KeyGenerator;
use crate::model::FileBundle;
use crate::store::{ContentStore, StoredBlob};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("bundle {0} was not found")]
    NotFound(String),
    #[error("server returned unexpected data")]
    Malformed,
    #[error("one or more errors occurred with the request:\n{0}")]
    Validation(String),
    #[error("{0}")]
    Transport(String),
}

/// Save request body: the bundle travels as a JSON string, with its
/// client-local id alongside as the submitted name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub file: String,
    #[serde(default)]
    pub name: String,
}

/// Save response body: the assigned storage id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: String,
    pub filename: String,
}

/// Validation failure body: field name to list of messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiError {
    pub errors: HashMap<String, Vec<String>>,
}

impl ApiError {
    pub fn field(name: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(name.to_string(), vec![message.to_string()]);
        Self { errors }
    }

    /// Collapses the field map into one human-readable multi-line message.
    pub fn collapse(&self) -> String {
        let mut fields: Vec<_> = self.errors.iter().collect();
        fields.sort_by_key(|(name, _)| name.as_str());
        fields
            .iter()
            .flat_map(|(_, messages)| messages.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Boundary adapter between the state container and bundle storage. The
/// container never branches on transport: reads and saves go through here
/// whether that means a network round trip or a direct store call.
pub trait UploadService {
    async fn read_bundle(&self, server_id: &str) -> Result<FileBundle, UploadError>;
    async fn save_bundle(&self, bundle: &FileBundle) -> Result<String, UploadError>;
}

/// Client-side adapter: talks to a remote bundlebin server over HTTP.
pub struct HttpUploadService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUploadService {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

impl UploadService for HttpUploadService {
    async fn read_bundle(&self, server_id: &str) -> Result<FileBundle, UploadError> {
        let url = format!("{}/raw/{server_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(UploadError::NotFound(server_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(UploadError::Transport(format!(
                "server responded with {}",
                response.status()
            )));
        }

        let mut bundle: FileBundle = response
            .json()
            .await
            .map_err(|_| UploadError::Malformed)?;

        // A bundle with no files is as useless as a missing one.
        if bundle.files.is_empty() {
            return Err(UploadError::NotFound(server_id.to_string()));
        }

        bundle.last_server_id = Some(server_id.to_string());
        Ok(bundle)
    }

    async fn save_bundle(&self, bundle: &FileBundle) -> Result<String, UploadError> {
        let payload =
            serde_json::to_string(bundle).map_err(|_| UploadError::Malformed)?;
        if payload.trim().is_empty() {
            return Err(UploadError::Validation("no data to upload".to_string()));
        }

        let request = SubmitRequest {
            file: payload,
            name: bundle.id.clone(),
        };
        let response = self
            .client
            .post(format!("{}/submit", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let api_error = response.json::<ApiError>().await.unwrap_or_default();
            if api_error.errors.is_empty() {
                return Err(UploadError::Transport(
                    "server responded with 400 Bad Request".to_string(),
                ));
            }
            return Err(UploadError::Validation(api_error.collapse()));
        }
        if !response.status().is_success() {
            return Err(UploadError::Transport(format!(
                "server responded with {}",
                response.status()
            )));
        }

        let created: SubmitResponse = response
            .json()
            .await
            .map_err(|_| UploadError::Malformed)?;
        Ok(created.id)
    }
}

/// Server-rendered-context adapter: same contract, direct store calls.
pub struct DirectUploadService {
    store: Arc<ContentStore>,
    keygen: KeyGenerator,
}

impl DirectUploadService {
    pub fn new(store: Arc<ContentStore>, keygen: KeyGenerator) -> Self {
        Self { store, keygen }
    }
}

impl UploadService for DirectUploadService {
    async fn read_bundle(&self, server_id: &str) -> Result<FileBundle, UploadError> {
        let blob = self
            .store
            .read(server_id)
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?
            .ok_or_else(|| UploadError::NotFound(server_id.to_string()))?;

        let mut bundle: FileBundle =
            serde_json::from_str(&blob.data).map_err(|_| UploadError::Malformed)?;
        if bundle.files.is_empty() {
            return Err(UploadError::NotFound(server_id.to_string()));
        }

        bundle.last_server_id = Some(server_id.to_string());
        Ok(bundle)
    }

    async fn save_bundle(&self, bundle: &FileBundle) -> Result<String, UploadError> {
        let payload =
            serde_json::to_string(bundle).map_err(|_| UploadError::Malformed)?;
        let key = self.keygen.generate_id();
        let blob = StoredBlob {
            id: key.clone(),
            filename: bundle.id.clone(),
            data: payload,
        };

        self.store
            .write(&blob)
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;
        debug!(id = %key, bundle = %bundle.id, "bundle stored directly");
        Ok(key)
    }
}
