//! Common test utilities for snt-billing-service integration tests.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use snt_billing_service::config::BillingConfig;
use snt_billing_service::startup::Application;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("warn,snt_billing_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Test application wrapper.
#[allow(dead_code)]
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: Client,
}

#[allow(dead_code)]
impl TestApp {
    /// Spawn the application on a random port with an empty ledger.
    pub async fn spawn() -> Self {
        init_tracing();

        let app = Application::build(BillingConfig::for_tests())
            .await
            .expect("Failed to build application");
        let port = app.port();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        Self {
            address: format!("http://127.0.0.1:{}", port),
            port,
            client: Client::new(),
        }
    }

    pub fn api(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.address, path)
    }

    async fn envelope(response: reqwest::Response) -> (StatusCode, Value) {
        let status = response.status();
        let body = response.json().await.expect("Failed to parse JSON");
        (status, body)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(self.api(path))
            .send()
            .await
            .expect("Failed to execute request");
        Self::envelope(response).await
    }

    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.api(path))
            .header("x-user-id", "treasurer")
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request");
        Self::envelope(response).await
    }

    pub async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .put(self.api(path))
            .header("x-user-id", "treasurer")
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request");
        Self::envelope(response).await
    }

    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let response = self
            .client
            .get(self.api(path))
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let bytes = response.bytes().await.expect("Failed to read body");
        // `Response::text` strips a leading BOM; decode the raw bytes instead.
        (status, String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8"))
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    pub async fn create_plot(&self, street: &str, number: &str) -> String {
        let (status, body) = self
            .post(
                "/plots",
                json!({ "street": street, "number": number, "area": "6" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["plot_id"].as_str().unwrap().to_string()
    }

    pub async fn create_period(&self, title: &str, from: &str, to: &str) -> String {
        let (status, body) = self
            .post("/periods", json!({ "title": title, "from": from, "to": to }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["period_id"].as_str().unwrap().to_string()
    }

    pub async fn set_accrual(&self, period_id: &str, plot_id: &str, amount: &str) {
        let (status, body) = self
            .put(
                &format!("/periods/{}/accruals", period_id),
                json!({ "plot_id": plot_id, "category": "membership", "amount": amount }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    pub async fn import(&self, content: &str) -> (StatusCode, Value) {
        self.post(
            "/imports",
            json!({ "content": content, "source_name": "bank.csv" }),
        )
        .await
    }

    /// Reconciliation row of one plot.
    pub async fn balance_row(&self, period_id: &str, plot_id: &str) -> Value {
        let (status, body) = self
            .get(&format!("/periods/{}/reconciliation", period_id))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["rows"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["plot_id"] == plot_id)
            .cloned()
            .expect("plot missing from reconciliation")
    }
}

/// Decimal fields are serialized as strings; compare numerically.
#[allow(dead_code)]
pub fn amount(value: &Value) -> f64 {
    value
        .as_str()
        .map(|s| s.parse().unwrap())
        .or_else(|| value.as_f64())
        .unwrap()
}
