//! Common test utilities for in-process API testing.
//!
//! The fixture builds the real router on top of an [`InMemoryFateStore`]
//! seeded with one event date, so tests can drive generation over HTTP and
//! then inspect the store directly.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use fateticket_core::{
    testing::InMemoryFateStore, ApiKeyAuthenticator, AuthConfig, AuthMethod, Authenticator,
    Config, DatabaseConfig, FateConfig, FateStore, NoneAuthenticator, ServerConfig,
};
use fateticket_server::state::AppState;

/// Re-export fixtures for test convenience
pub use fateticket_core::testing::fixtures;

pub const API_KEY: &str = "test-secret";
pub const OPERATOR: &str = "box-office";

/// Options for building a [`TestFixture`].
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub auth_method: AuthMethod,
    /// Shops seeded as attending [`fixtures::EVENT_DATE_ID`].
    pub shops: Vec<&'static str>,
    pub fate: FateConfig,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            auth_method: AuthMethod::None,
            shops: vec!["shop-a", "shop-b", "shop-c"],
            fate: FateConfig::default(),
        }
    }
}

pub struct TestFixture {
    pub router: Router,
    pub store: Arc<InMemoryFateStore>,
    api_key: Option<String>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestResponse {
    pub fn error(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(TestConfig::default())
    }

    pub fn with_config(test_config: TestConfig) -> Self {
        let store = Arc::new(InMemoryFateStore::new());
        fixtures::seed_catalog(store.as_ref(), &test_config.shops)
            .expect("Failed to seed catalog");

        let config = Config {
            auth: AuthConfig {
                method: test_config.auth_method,
                api_key: Some(API_KEY.to_string()),
                operator: OPERATOR.to_string(),
            },
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            fate: test_config.fate,
        };

        let authenticator: Arc<dyn Authenticator> = match test_config.auth_method {
            AuthMethod::None => Arc::new(NoneAuthenticator::new()),
            AuthMethod::ApiKey => Arc::new(ApiKeyAuthenticator::new(API_KEY, OPERATOR)),
        };

        let state = AppState::new(
            config,
            authenticator,
            Arc::clone(&store) as Arc<dyn FateStore>,
        )
        .with_generator_seed(42);

        let router = fateticket_server::api::create_router(Arc::new(state));

        Self {
            router,
            store,
            api_key: None,
        }
    }

    /// Attach the configured API key to every subsequent request.
    pub fn authenticated(mut self) -> Self {
        self.api_key = Some(API_KEY.to_string());
        self
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = self
            .builder("POST", path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Generate a batch for the seeded event date.
    pub async fn generate(&self, weights: &[(&str, u32)]) -> TestResponse {
        let shops: Vec<Value> = weights
            .iter()
            .map(|(id, ratio)| json!({ "id": id, "destiny_ratio": ratio }))
            .collect();
        self.post(
            "/api/v1/fate/batches",
            json!({
                "event_id": fixtures::EVENT_ID,
                "event_date_id": fixtures::EVENT_DATE_ID,
                "shops": shops,
            }),
        )
        .await
    }

    /// Fetch the active ticket listing for the seeded event date.
    pub async fn list(&self, page: u32, page_size: u32) -> TestResponse {
        self.get(&format!(
            "/api/v1/fate/tickets?event_date_id={}&page={}&pageSize={}",
            fixtures::EVENT_DATE_ID,
            page,
            page_size
        ))
        .await
    }

    /// Get raw text response (for non-JSON endpoints like /metrics).
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = self.builder("GET", path).body(Body::empty()).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    fn builder(&self, method: &str, path: &str) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(path);
        match &self.api_key {
            Some(key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let request = match body {
            Some(json) => self
                .builder(method, path)
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_string(&json).unwrap()))
                .unwrap(),
            None => self.builder(method, path).body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}
