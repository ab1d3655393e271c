//! Body, path and query extractors that reject with [`AppError`], so a
//! malformed request still gets the `{ok: false, error}` envelope.

use axum::extract::{FromRequest, FromRequestParts};
use service_core::error::AppError;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use axum::body::Body;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Filter {
        #[allow(dead_code)]
        include_voided: bool,
    }

    #[tokio::test]
    async fn test_bad_query_is_bad_request() {
        let (mut parts, _) = Request::builder()
            .uri("/payments?include_voided=maybe")
            .body(())
            .unwrap()
            .into_parts();
        let err = ApiQuery::<Filter>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let request = Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let err = ApiJson::<serde_json::Value>::from_request(request, &())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
