//! chunkgate server binary.
//!
//! The HTTP receiving end of a resumable, chunked file-upload protocol:
//! clients stream a file in one or more POSTs addressed by store name
//! and file id, and the server appends the bytes to a staging file. The
//! upload pipeline is installed as Axum middleware so every request
//! outside the configured store prefix falls through to downstream
//! routes untouched. The main entry point builds the router, configures
//! TLS, and starts HTTP/HTTPS listeners.

mod background;
mod config;
mod error;
mod fault;
mod http;
mod locking;
mod logging;
mod registry;
mod route;
mod staging;
mod tls;
mod upload;

use axum::body::Body as AxumBody;
use axum::extract::{Extension, connect_info::ConnectInfo};
use axum::http::{Method, Request, StatusCode};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use crate::background::spawn_background_tasks;
use crate::config::Args;
use crate::http::resolve_client_ip;
use crate::locking::LockManager;
use crate::registry::StoreRegistry;
use crate::staging::StagingArea;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the chunkgate server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();
    fault::install_panic_hook();

    let args = Args::parse();
    let store_prefix = route::normalize_prefix(&args.store_prefix);
    if store_prefix.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "store prefix must not be empty",
        ));
    }

    let registry = match args.manifest.as_deref() {
        Some(path) => Arc::new(registry::load_manifest(Path::new(path)).await?),
        None => {
            warn!("no manifest configured; starting with an empty store registry");
            Arc::new(StoreRegistry::new())
        }
    };
    let staging = Arc::new(StagingArea::new(PathBuf::from(&args.staging_dir)));
    staging.ensure_root().await?;
    let locks = Arc::new(LockManager::new());
    let upload_config = Arc::new(UploadConfig {
        store_prefix,
        lock_wait: Duration::from_secs(args.lock_wait_secs),
    });
    let staging_for_tasks = staging.clone();

    let app = Router::new()
        .fallback(downstream_fallback)
        .layer(middleware::from_fn(upload::upload_pipeline))
        .layer(middleware::from_fn(fault::isolate_faults))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(registry))
        .layer(Extension(staging))
        .layer(Extension(locks))
        .layer(Extension(upload_config));

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let https_addr = SocketAddr::new(host, args.https_port);
    let tls_config = tls::build_rustls_config(&args, host).await?;
    let handle = Handle::new();

    info!("starting HTTP listener at {}", http_addr);
    info!("starting HTTPS listener at {}", https_addr);

    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(app.clone().into_make_service_with_connect_info::<SocketAddr>());
    let https_server = axum_server::bind_rustls(https_addr, tls_config)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    spawn_background_tasks(
        staging_for_tasks,
        Duration::from_secs(args.staging_ttl_secs),
    );
    tokio::select! {
        result = http_server => result?,
        result = https_server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

/// Terminal downstream handler: completes the preflights the upload
/// pipeline lets through after granting CORS, and answers 404 for
/// everything else.
async fn downstream_fallback(req: Request<AxumBody>) -> StatusCode {
    if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("received termination signal, shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
