//! HTTP attempt execution and endpoint probing.
//!
//! `DeliveryClient` performs exactly one POST per call with a hard timeout
//! and turns every outcome (response, timeout, connection failure) into an
//! `Attempt`. It never returns an error once constructed.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use courier_core::{Clock, DeliveryId, RealClock};
use reqwest::{
    header::{HeaderMap, CONTENT_TYPE},
    Response,
};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::{
    error::{DeliveryError, Result},
    result::{Attempt, ResponseBody, MAX_RESPONSE_BODY_SIZE},
};

/// Header carrying the delivery id.
pub const WEBHOOK_ID_HEADER: &str = "X-Webhook-ID";
/// Header carrying the 1-based attempt number.
pub const ATTEMPT_NUMBER_HEADER: &str = "X-Attempt-Number";
/// Header carrying the attempt timestamp (RFC 3339).
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";

/// Default timeout for endpoint probes.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// User agent string, `<service>/<version>`.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent("courier"),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// Builds a `<service>/<version>` user agent string.
pub fn default_user_agent(service: &str) -> String {
    format!("{service}/{}", env!("CARGO_PKG_VERSION"))
}

/// Everything needed to perform one attempt.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    /// Delivery the attempt belongs to.
    pub delivery_id: DeliveryId,
    /// Destination URL.
    pub url: String,
    /// Caller and context headers, already merged.
    pub headers: HashMap<String, String>,
    /// Serialized JSON payload, identical for every attempt.
    pub body: Bytes,
    /// The payload as a JSON value, recorded on the attempt.
    pub payload: serde_json::Value,
    /// Attempt number (1-based).
    pub attempt_number: u32,
    /// Hard timeout for this attempt.
    pub timeout: Duration,
}

/// Executes a single delivery attempt.
///
/// Implementations must never panic or return early without an `Attempt`:
/// every failure mode is represented in the returned value.
#[async_trait::async_trait]
pub trait AttemptExecutor: Send + Sync + std::fmt::Debug {
    /// Performs one attempt.
    async fn execute(&self, request: &AttemptRequest) -> Attempt;
}

/// Result of a one-shot reachability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Whether the endpoint answered with a non-5xx status.
    pub reachable: bool,
    /// Status code, if the endpoint answered.
    pub status: Option<u16>,
    /// Time until the answer or failure.
    pub elapsed: Duration,
    /// Transport error message.
    pub error: Option<String>,
}

/// HTTP client for webhook delivery.
///
/// Connection pooling is shared across all attempts; the timeout is applied
/// per request so configuration swaps take effect on the next attempt.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl DeliveryClient {
    /// Creates a new delivery client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built with the provided settings.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, clock })
    }

    /// Creates a new delivery client with default configuration and the real
    /// clock.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default(), Arc::new(RealClock::new()))
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Checks whether an endpoint answers a HEAD request.
    ///
    /// This is an operator diagnostic: no retries, no events.
    pub async fn probe(&self, url: &str, timeout: Duration) -> ProbeResult {
        let start_time = Instant::now();

        let outcome = self.client.head(url).timeout(timeout).send().await;
        let elapsed = start_time.elapsed();

        match outcome {
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::debug!(url, status, elapsed_ms = elapsed.as_millis(), "probe answered");
                ProbeResult { reachable: status < 500, status: Some(status), elapsed, error: None }
            },
            Err(e) => {
                let error = transport_error(&e, timeout);
                tracing::debug!(url, error = %error, "probe failed");
                ProbeResult {
                    reachable: false,
                    status: None,
                    elapsed,
                    error: Some(error.to_string()),
                }
            },
        }
    }

    async fn send(
        &self,
        request: &AttemptRequest,
        headers: &HashMap<String, String>,
        timestamp: DateTime<Utc>,
    ) -> Attempt {
        let start_time = Instant::now();

        let mut http_request = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .body(request.body.clone());
        for (name, value) in headers {
            http_request = http_request.header(name.as_str(), value.as_str());
        }

        let mut attempt = Attempt {
            attempt_number: request.attempt_number,
            timestamp,
            url: request.url.clone(),
            request_headers: headers.clone(),
            request_body: request.payload.clone(),
            response_status: None,
            response_headers: None,
            response_body: None,
            elapsed: None,
            error: None,
            network_error: false,
        };

        let response = match http_request.send().await {
            Ok(response) => response,
            Err(e) => return failed_attempt(attempt, &e, request.timeout, start_time),
        };

        let status_code = response.status().as_u16();
        let (response_headers, body) = match read_response(response).await {
            Ok(read) => read,
            Err(e) => return failed_attempt(attempt, &e, request.timeout, start_time),
        };
        let elapsed = start_time.elapsed();

        tracing::debug!(status = status_code, duration_ms = elapsed.as_millis(), "received response");

        attempt.response_status = Some(status_code);
        attempt.response_headers = Some(response_headers);
        attempt.response_body = Some(body);
        attempt.elapsed = Some(elapsed);
        attempt
    }
}

#[async_trait::async_trait]
impl AttemptExecutor for DeliveryClient {
    async fn execute(&self, request: &AttemptRequest) -> Attempt {
        let span = info_span!(
            "webhook_attempt",
            delivery_id = %request.delivery_id,
            url = %request.url,
            attempt = request.attempt_number
        );

        async move {
            let timestamp = self.clock.now_utc();
            let headers = compose_headers(
                &self.config.user_agent,
                request,
                &timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            );
            self.send(request, &headers, timestamp).await
        }
        .instrument(span)
        .await
    }
}

/// Maps a reqwest failure onto the transport error taxonomy.
fn transport_error(error: &reqwest::Error, timeout: Duration) -> DeliveryError {
    if error.is_timeout() {
        return DeliveryError::timeout(timeout);
    }
    if error.is_connect() {
        return DeliveryError::network(format!("connection failed: {error}"));
    }
    DeliveryError::network(error.to_string())
}

/// Records a transport failure. Any status already received is discarded.
fn failed_attempt(
    mut attempt: Attempt,
    error: &reqwest::Error,
    timeout: Duration,
    start_time: Instant,
) -> Attempt {
    let error = transport_error(error, timeout);
    let elapsed = start_time.elapsed();
    tracing::warn!(duration_ms = elapsed.as_millis(), "request failed: {}", error);

    attempt.elapsed = Some(elapsed);
    attempt.error = Some(error.to_string());
    attempt.network_error = true;
    attempt
}

/// Reads headers and at most `MAX_RESPONSE_BODY_SIZE` bytes of body.
///
/// Reading stops once the cap is passed; the rest of the body is never
/// buffered.
async fn read_response(
    mut response: Response,
) -> std::result::Result<(HashMap<String, String>, ResponseBody), reqwest::Error> {
    let headers = extract_headers(response.headers());
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut buffer = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        buffer.extend_from_slice(&chunk);
        if buffer.len() > MAX_RESPONSE_BODY_SIZE {
            buffer.truncate(MAX_RESPONSE_BODY_SIZE + 1);
            break;
        }
    }

    Ok((headers, ResponseBody::parse(content_type.as_deref(), &buffer)))
}

/// Builds the header set for one attempt.
///
/// Order of precedence, lowest first: caller headers, then the engine's own
/// headers. Managed headers supplied by the caller are dropped.
pub fn compose_headers(
    user_agent: &str,
    request: &AttemptRequest,
    timestamp: &str,
) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = request
        .headers
        .iter()
        .filter(|(name, _)| !is_managed_header(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.insert("User-Agent".to_string(), user_agent.to_string());
    headers.insert(WEBHOOK_ID_HEADER.to_string(), request.delivery_id.to_string());
    headers.insert(ATTEMPT_NUMBER_HEADER.to_string(), request.attempt_number.to_string());
    headers.insert(TIMESTAMP_HEADER.to_string(), timestamp.to_string());

    headers
}

/// Extracts headers from a reqwest HeaderMap into a standard HashMap.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    let mut headers = HashMap::new();

    for (key, value) in header_map {
        if let Ok(value_str) = value.to_str() {
            headers.insert(key.to_string(), value_str.to_string());
        }
    }

    headers
}

/// Checks if a header is controlled by the engine or the transport and must
/// not be taken from the caller.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_ascii_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length"
            | "content-type"
            | "host"
            | "user-agent"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "x-webhook-id"
            | "x-attempt-number"
            | "x-timestamp"
    )
}
