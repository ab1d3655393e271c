//! HTTP handlers. Every API route answers with the `{ok, data}` envelope;
//! CSV exports return the file itself.

pub mod health;
pub mod imports;
pub mod payments;
pub mod periods;
pub mod plots;
pub mod reports;

use axum::http::header;
use axum::response::{IntoResponse, Response};

pub(crate) fn csv_attachment(filename: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}
