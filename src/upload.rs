//! Chunked upload pipeline: routing, CORS gating, token checks, and
//! streaming chunk persistence.
//!
//! The pipeline is installed as a middleware so that any request outside
//! the configured store prefix falls through to downstream handlers
//! untouched. A matching POST streams its body straight into the staging
//! file for the addressed file id; the client keeps sending chunk
//! requests until the file is complete, and completion itself is decided
//! out of band.

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{Method, Request, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use futures_util::stream::StreamExt;
use http_body_util::BodyExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::error::ApiError;
use crate::http::allow_cors;
use crate::locking::LockManager;
use crate::registry::{FieldUpdate, Store, StoreRegistry};
use crate::route::{RouteMatch, match_store_path};
use crate::staging::{StagingArea, StagingError};

/// Pipeline configuration shared across requests.
#[derive(Debug)]
pub struct UploadConfig {
    /// URL prefix the upload endpoints live under, e.g. `/ufs`.
    pub store_prefix: String,
    /// How long an overlapping chunk request waits for the per-file lock.
    pub lock_wait: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkQuery {
    token: Option<String>,
    progress: Option<String>,
}

/// Upload middleware: OPTIONS/POST/GET under the store prefix are
/// handled here; every other request passes through untouched.
pub async fn upload_pipeline(
    Extension(registry): Extension<Arc<StoreRegistry>>,
    Extension(staging): Extension<Arc<StagingArea>>,
    Extension(locks): Extension<Arc<LockManager>>,
    Extension(config): Extension<Arc<UploadConfig>>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    let route = match match_store_path(req.uri().path(), &config.store_prefix) {
        RouteMatch::PassThrough => return Ok(next.run(req).await),
        route => route,
    };
    let method = req.method().clone();

    if method == Method::OPTIONS {
        // Preflight: confirm the store, set the CORS headers, and let the
        // downstream handler finish the response.
        let (store_name, _) = require_upload(route)?;
        if registry.get_store(&store_name).await.is_none() {
            return Err(ApiError::NotFound);
        }
        let mut response = next.run(req).await;
        allow_cors(response.headers_mut());
        Ok(response)
    } else if method == Method::POST {
        let (store_name, file_id) = require_upload(route)?;
        let Some(store) = registry.get_store(&store_name).await else {
            return Err(ApiError::NotFound);
        };
        // Store confirmed: every response from here carries the CORS
        // headers, success and failure alike.
        let mut response =
            match receive_chunk(store, &file_id, &staging, &locks, config.lock_wait, req).await {
                Ok(response) => response,
                Err(err) => err.into_response(),
            };
        allow_cors(response.headers_mut());
        Ok(response)
    } else if method == Method::GET {
        // Download serving lives elsewhere; this endpoint only accepts
        // chunks.
        Err(ApiError::NotFound)
    } else {
        Ok(next.run(req).await)
    }
}

fn require_upload(route: RouteMatch) -> Result<(String, String), ApiError> {
    match route {
        RouteMatch::Upload {
            store_name,
            file_id,
        } => Ok((store_name, file_id)),
        _ => Err(ApiError::BadRequest),
    }
}

/// Streams the request body into the staging file for `file_id`.
///
/// Validation failures answer before any byte lands on disk; stream and
/// sink failures after that point delete the partial staging file
/// best-effort and answer 500. On a normal end of body the transient
/// upload state is written back to the record, the sink is closed, and
/// only then does the client see 204.
async fn receive_chunk(
    store: Arc<dyn Store>,
    file_id: &str,
    staging: &StagingArea,
    locks: &LockManager,
    lock_wait: Duration,
    req: Request<AxumBody>,
) -> Result<Response, ApiError> {
    let query: ChunkQuery =
        serde_urlencoded::from_str(req.uri().query().unwrap_or_default()).unwrap_or_default();

    if store.find_by_id(file_id).await.is_none() {
        return Err(ApiError::NotFound);
    }

    let token = query.token.as_deref().unwrap_or_default();
    if !store.validate_token(token, file_id).await {
        warn!(file_id, "chunk rejected: invalid upload token");
        return Err(ApiError::Forbidden);
    }

    let fields = FieldUpdate {
        uploading: true,
        progress: parse_progress(query.progress.as_deref()),
    };

    // At most one in-flight chunk request per file id; an overlapping
    // retry waits here and backs off with 409 once the window elapses.
    let Ok(_guard) = locks.lock_file_with_timeout(file_id, lock_wait).await else {
        warn!(file_id, "chunk rejected: file is locked by another request");
        return Err(ApiError::Conflict);
    };

    let mut sink = match staging.open_append(file_id).await {
        Ok(sink) => sink,
        Err(StagingError::InvalidId) => {
            warn!(file_id, "chunk rejected: unusable file id");
            return Err(ApiError::BadRequest);
        }
        Err(StagingError::Io(err)) => {
            error!(file_id, error = %err, "cannot open staging file");
            return Err(ApiError::Internal);
        }
    };

    let mut data_stream = BodyExt::into_data_stream(req.into_body());
    let mut appended: u64 = 0;
    while let Some(chunk) = data_stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                // A client abort mid-chunk lands here as well.
                warn!(file_id, error = %err, "body stream failed mid-chunk");
                staging.remove(file_id).await;
                return Err(ApiError::Internal);
            }
        };
        if chunk.is_empty() {
            continue;
        }
        if let Err(err) = sink.write_all(&chunk).await {
            error!(file_id, error = %err, "cannot write chunk");
            staging.remove(file_id).await;
            return Err(ApiError::Internal);
        }
        appended += chunk.len() as u64;
    }

    // Intermediate state only; the direct variant keeps record hooks
    // from re-triggering the upload workflow.
    if !store.update_fields_direct(file_id, &fields).await {
        warn!(file_id, "file record missing at progress update");
    }

    if let Err(err) = sink.flush().await {
        error!(file_id, error = %err, "cannot finish staging file");
        staging.remove(file_id).await;
        return Err(ApiError::Internal);
    }
    drop(sink);

    debug!(file_id, bytes = appended, progress = ?fields.progress, "chunk appended");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Parses the declared progress; values above 1 are clamped, values
/// that are non-numeric or not above zero are dropped.
fn parse_progress(raw: Option<&str>) -> Option<f64> {
    let value = raw?.parse::<f64>().ok()?;
    (value > 0.0).then_some(value.min(1.0))
}
