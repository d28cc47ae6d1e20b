//! HTTP surface: the debug interceptor in front of package content.

use anyhow::Result;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use log::{debug, info, warn};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::debug::DebugConnector;

/// Largest debug command body accepted.
const MAX_COMMAND_BODY: usize = 1024 * 1024;

/// Router serving package content, wrapped by the debug interceptor.
pub fn router(connector: Arc<DebugConnector>) -> Router {
    Router::new()
        .route("/_pilets/{name}/{*path}", get(package_file))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&connector),
            intercept_debug,
        ))
        .with_state(connector)
}

/// Serve until ctrl-c.
pub async fn serve(listener: TcpListener, connector: Arc<DebugConnector>) -> Result<()> {
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(connector))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
        })
        .await?;
    Ok(())
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

async fn intercept_debug(
    State(connector): State<Arc<DebugConnector>>,
    request: Request,
    next: Next,
) -> Response {
    if !DebugConnector::matches(request.uri().path()) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_COMMAND_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Failed to read debug request body: {}", e);
            Default::default()
        }
    };

    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let handler = Arc::clone(&connector);
    let bytes_for_handler = bytes.clone();
    let state = tokio::task::spawn_blocking(move || {
        handler.intercept(&method, &path, &bytes_for_handler)
    })
    .await;

    match state {
        Ok(Some(state)) => Json(state).into_response(),
        Ok(None) => next.run(Request::from_parts(parts, Body::from(bytes))).await,
        Err(e) => {
            warn!("Debug request handler failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn package_file(
    State(connector): State<Arc<DebugConnector>>,
    Path((name, path)): Path<(String, String)>,
) -> Response {
    let repository = Arc::clone(connector.repository());
    let content = tokio::task::spawn_blocking(move || {
        let package = repository.get_package(&name)?;
        let mut stream = package.get_file(&path)?;
        let mut buffer = Vec::new();
        match stream.read_to_end(&mut buffer) {
            Ok(_) => Some((content_type(&path), buffer)),
            Err(e) => {
                debug!("Failed to read {} from {}: {}", path, name, e);
                None
            }
        }
    })
    .await;

    match content {
        Ok(Some((content_type, bytes))) => {
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Content request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn content_type(path: &str) -> &'static str {
    let extension = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("html") | Some("htm") => "text/html",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}
