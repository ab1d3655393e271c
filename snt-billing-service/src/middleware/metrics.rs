//! HTTP request counting.

use crate::services::{record_error, record_http_request};
use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

/// Count every request by method, matched route template and status.
pub async fn http_metrics_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    let status = response.status();
    record_http_request(&method, &route, status.as_u16());
    if status.is_server_error() {
        record_error("http_5xx");
    } else if status.is_client_error() {
        record_error("http_4xx");
    }

    response
}
