//! HTTP routes for the content server.

use axum::{extract::Request, middleware::Next, response::Response, Router};
use std::path::Path;
use tower_http::services::ServeDir;
use tracing::debug;

/// Build the router: every path is a static file lookup below `root`.
///
/// Directories serve their `index.html`.
pub fn build_router(root: &Path) -> Router {
    let files = ServeDir::new(root).append_index_html_on_directories(true);

    Router::new()
        .fallback_service(files)
        .layer(axum::middleware::from_fn(log_request))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    debug!(%method, %path, status = response.status().as_u16(), "Served request");
    response
}
