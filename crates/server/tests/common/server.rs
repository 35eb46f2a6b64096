//! Server test utilities.

use super::fakes::{FakeBackend, FakePlatform};
use super::metadata::TestMetadata;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use ember_core::ManualClock;
use ember_core::config::AppConfig;
use ember_server::{AppState, Collaborators, assemble, create_router};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Unix time the test clock starts at.
pub const TEST_NOW: i64 = 1_700_000_000;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub platform: Arc<FakePlatform>,
    pub backend: Arc<FakeBackend>,
    pub clock: Arc<ManualClock>,
    _metadata: TestMetadata,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server whose event dispatcher runs in the background.
    pub async fn new() -> Self {
        let mut config = AppConfig::for_testing();
        config.lifecycle.poll_interval_ms = 10;
        config.lifecycle.poll_timeout_secs = 5;
        config.messaging.redelivery_backoff_ms = 1;
        Self::with_config(config).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let metadata = TestMetadata::new()
            .await
            .expect("Failed to create metadata store");
        let platform = Arc::new(FakePlatform::new());
        let backend = Arc::new(FakeBackend::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));

        let collaborators = Collaborators {
            projects: platform.clone(),
            commits: platform.clone(),
            users: platform.clone(),
            backend: backend.clone(),
        };

        let service = assemble(config, metadata.store(), collaborators, clock.clone());
        let (state, _dispatcher) = service.start_dispatcher();
        let router = create_router(state.clone());

        Self {
            router,
            state,
            platform,
            backend,
            clock,
            _metadata: metadata,
        }
    }

    /// Send a JSON request, returning the status and parsed body.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(user) = user {
            builder = builder.header("x-ember-user", user);
        }

        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let request = builder.body(body).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let json: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into()))
        };

        (status, json)
    }
}
