use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json},
};
use tracing::{info, warn};

use crate::server::AppState;
use crate::store::StoredBlob;
use crate::upload::{ApiError, SubmitRequest, SubmitResponse};

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Accepts a paste and returns the storage key assigned to it.
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> impl IntoResponse {
    if request.file.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::field("file", "no data to upload")),
        )
            .into_response();
    }

    let key = state.keygen.generate_id();
    let filename = if request.name.is_empty() {
        key.clone()
    } else {
        request.name
    };

    let blob = StoredBlob {
        id: key.clone(),
        filename: filename.clone(),
        data: request.file,
    };
    if let Err(err) = state.store.write(&blob).await {
        warn!(id = %key, error = %err, "submit failed to persist blob");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!(id = %key, filename = %filename, "blob stored");
    (
        StatusCode::CREATED,
        Json(SubmitResponse { id: key, filename }),
    )
        .into_response()
}

/// Serves the stored payload verbatim. Unparseable blobs read as absent.
pub async fn raw_blob(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.store.read(&id).await {
        Ok(Some(blob)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/json".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", blob.filename),
                ),
            ],
            blob.data,
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            warn!(id = %id, error = %err, "raw read failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
