//! Process-wide panic logging and a per-request unwind boundary.

use axum::body::Body as AxumBody;
use axum::http::Request;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::error;

use crate::error::ApiError;

/// Installs the process-wide panic hook. Called once at startup.
///
/// Panics raised outside a request context (spawned tasks, deferred
/// callbacks) land here; the process keeps serving.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        error!(panic = %info, "uncaught panic");
    }));
}

/// Request-scoped unwind boundary around the rest of the pipeline.
///
/// A panic inside one request is logged and answered with 500; other
/// in-flight requests are unaffected.
pub async fn isolate_faults(req: Request<AxumBody>, next: middleware::Next) -> Response {
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .copied()
                .map(str::to_owned)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(detail, "request handler panicked");
            ApiError::Internal.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn boom() -> StatusCode {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn panicking_handler_answers_500() {
        let app = Router::new()
            .route("/boom", get(boom))
            .layer(middleware::from_fn(isolate_faults));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/boom")
                    .body(AxumBody::empty())
                    .expect("request"),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn healthy_requests_are_untouched() {
        let app = Router::new()
            .route("/ok", get(|| async { StatusCode::NO_CONTENT }))
            .layer(middleware::from_fn(isolate_faults));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ok")
                    .body(AxumBody::empty())
                    .expect("request"),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
