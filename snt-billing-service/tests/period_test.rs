//! Period lifecycle and accrual integration tests.

mod common;

use common::{amount, TestApp};
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn period_moves_from_draft_to_closed() {
    let app = TestApp::spawn().await;
    let period_id = app
        .create_period("Январь 2025", "2025-01-01", "2025-01-31")
        .await;

    let (status, body) = app.post(&format!("/periods/{}/approve", period_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");

    let (status, body) = app.post(&format!("/periods/{}/close", period_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "closed");

    let (_, body) = app.get("/periods").await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn overlapping_period_conflicts() {
    let app = TestApp::spawn().await;
    app.create_period("Январь 2025", "2025-01-01", "2025-01-31")
        .await;

    let (status, body) = app
        .post(
            "/periods",
            json!({ "title": "Overlap", "from": "2025-01-15", "to": "2025-02-15" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn closed_period_rejects_accrual_changes() {
    let app = TestApp::spawn().await;
    let plot_id = app.create_plot("Лесная", "12").await;
    let period_id = app
        .create_period("Январь 2025", "2025-01-01", "2025-01-31")
        .await;
    app.set_accrual(&period_id, &plot_id, "1000").await;
    app.post(&format!("/periods/{}/close", period_id), json!({}))
        .await;

    let (status, body) = app
        .put(
            &format!("/periods/{}/accruals", period_id),
            json!({ "plot_id": plot_id, "category": "membership", "amount": "1200" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "period_closed");
    assert_eq!(body["error"]["message"], "period_closed");
}

#[tokio::test]
async fn tariff_generation_covers_every_plot() {
    let app = TestApp::spawn().await;
    app.create_plot("Лесная", "12").await;
    app.create_plot("Садовая", "3").await;
    let period_id = app
        .create_period("Январь 2025", "2025-01-01", "2025-01-31")
        .await;

    let (status, body) = app
        .post(
            &format!("/periods/{}/accruals/generate", period_id),
            json!({
                "category": "membership",
                "tariff": { "kind": "per_area", "amount": "100" }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["created"], 2);

    let (_, body) = app.get(&format!("/periods/{}/accruals", period_id)).await;
    let accruals = body["data"].as_array().unwrap();
    assert_eq!(accruals.len(), 2);
    assert!(accruals
        .iter()
        .all(|a| amount(&a["amount_accrued"]) == 600.0));
}

#[tokio::test]
async fn invalid_period_body_is_a_validation_error() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post(
            "/periods",
            json!({ "title": "", "from": "2025-01-01", "to": "2025-01-31" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");
}
