use std::sync::Arc;

use axum::http::{Method, header};
use axum::{Router, extract::DefaultBodyLimit};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::keygen::KeyGenerator;
use crate::routes;
use crate::store::ContentStore;

/// Request bodies above this size are rejected before the handler runs.
/// Sized to the client's character ceiling with headroom for multi-byte
/// UTF-8 and the submit envelope.
pub const MAX_BODY_BYTES: usize = 409_600;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ContentStore>,
    pub keygen: KeyGenerator,
}

impl AppState {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self {
            store,
            keygen: KeyGenerator,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", axum::routing::get(routes::health))
        .route("/health", axum::routing::get(routes::health))
        .route("/submit", axum::routing::post(routes::submit))
        .route("/raw/{id}", axum::routing::get(routes::raw_blob))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let app = router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("bundlebin api listening on port {port}");
    axum::serve(listener, app).await
}
