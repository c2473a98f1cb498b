//! Shared helpers for the wiremock integration tests.

#![allow(dead_code)]

use integrations_snyk::{LoadingStrategy, SnykClient, SnykConfig, SnykConfigBuilder};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "test-token";

/// Client pointed at the mock server with a fast backoff.
pub fn client(server: &MockServer) -> Arc<SnykClient> {
    client_with(server, LoadingStrategy::Lazy, |b| b)
}

pub fn client_with(
    server: &MockServer,
    strategy: LoadingStrategy,
    configure: impl FnOnce(SnykConfigBuilder) -> SnykConfigBuilder,
) -> Arc<SnykClient> {
    let builder = SnykConfig::builder()
        .base_url(server.uri())
        .token(TOKEN)
        .max_retries(3)
        .backoff_factor(Duration::from_millis(5))
        .max_workers(4)
        .loading_strategy(strategy);
    let config = configure(builder).build().expect("valid config");
    Arc::new(SnykClient::new(config).expect("client"))
}

/// Serves `body` for `GET path`.
pub async fn mount_get(server: &MockServer, at: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Serves `body` for `GET path`, asserting exactly `times` calls when the server drops.
pub async fn mount_get_times(server: &MockServer, at: &str, body: Value, times: u64) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(times)
        .mount(server)
        .await;
}

/// Every event emitted by this crate, captured for assertions.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl LogCapture {
    /// Installs the capture as the thread's default subscriber.
    ///
    /// Only reliable on a current-thread runtime, where spawned tasks run
    /// on the test thread.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn count(&self, level: Level) -> usize {
        self.events.lock().iter().filter(|(l, _)| *l == level).count()
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if !meta.target().starts_with("integrations_snyk") {
            return;
        }
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events.lock().push((*meta.level(), visitor.0));
    }
}
