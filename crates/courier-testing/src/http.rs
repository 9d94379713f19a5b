//! HTTP mocking utilities for webhook testing.

use std::time::Duration;

use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer as WiremockServer, Request, ResponseTemplate,
};

/// Path every helper mounts its mocks on.
pub const WEBHOOK_PATH: &str = "/webhook";

/// HTTP mock server for testing webhook deliveries.
pub struct MockServer {
    server: WiremockServer,
}

impl MockServer {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: WiremockServer::start().await }
    }

    /// Returns the base URL of the mock server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Returns the URL deliveries should target.
    pub fn webhook_url(&self) -> String {
        format!("{}{WEBHOOK_PATH}", self.server.uri())
    }

    /// Responds to every delivery with `status`.
    pub async fn mock_status(&self, status: u16) {
        self.mount(ResponseTemplate::new(status), None).await;
    }

    /// Responds to every delivery with `status` and a JSON body.
    pub async fn mock_json(&self, status: u16, body: Value) {
        self.mount(ResponseTemplate::new(status).set_body_json(body), None).await;
    }

    /// Responds to every delivery with `status` after `delay`.
    pub async fn mock_delayed(&self, status: u16, delay: Duration) {
        self.mount(ResponseTemplate::new(status).set_delay(delay), None).await;
    }

    /// Responds with each status in turn, one request each.
    ///
    /// The last status keeps answering once the sequence is used up.
    pub async fn mock_status_sequence(&self, statuses: &[u16]) {
        let Some((last, leading)) = statuses.split_last() else {
            return;
        };

        for status in leading {
            self.mount(ResponseTemplate::new(*status), Some(1)).await;
        }
        self.mount(ResponseTemplate::new(*last), None).await;
    }

    /// Returns all requests received by the server.
    pub async fn received_requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Asserts that exactly `expected` requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let received = self.received_requests().await.len();
        assert_eq!(received, expected, "expected {expected} requests, received {received}");
    }

    async fn mount(&self, response: ResponseTemplate, times: Option<u64>) {
        let mock = Mock::given(method("POST")).and(path(WEBHOOK_PATH)).respond_with(response);
        let mock = match times {
            Some(n) => mock.up_to_n_times(n),
            None => mock,
        };
        mock.mount(&self.server).await;
    }
}

/// Returns a header of a recorded request as a string.
pub fn header_value(request: &Request, name: &str) -> Option<String> {
    request.headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
}

/// Parses the body of a recorded request as JSON.
pub fn json_body(request: &Request) -> Value {
    serde_json::from_slice(&request.body).unwrap_or(Value::Null)
}

/// Returns a URL on a local port nothing listens on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0");
    let port = listener.and_then(|listener| listener.local_addr()).map_or(9, |addr| addr.port());
    format!("http://127.0.0.1:{port}{WEBHOOK_PATH}")
}
