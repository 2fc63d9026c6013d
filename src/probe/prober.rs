//! Single-identifier classification with bounded retries.
//!
//! One attempt maps the remote response onto [`Attempt`]; the retry loop in
//! [`Prober::classify`] only ever inspects that tag.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use url::Url;

use super::backoff::RetryPolicy;
use super::transport::{ProbeRequest, ProbeResponse, ProbeTransport, TransportError};
use super::user_agents::random_user_agent;

pub const DEFAULT_URL_TEMPLATE: &str = "https://www.instagram.com/{id}/";
pub const DEFAULT_NOT_FOUND_MARKER: &str = "Page Not Found";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const ID_PLACEHOLDER: &str = "{id}";

/// Classification of one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Available,
    Taken,
    Unknown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Available => "available",
            Outcome::Taken => "taken",
            Outcome::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classes worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryableKind {
    Transient,
    RateLimited,
}

impl fmt::Display for RetryableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryableKind::Transient => f.write_str("network failure"),
            RetryableKind::RateLimited => f.write_str("rate limited"),
        }
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Resolved(Outcome),
    Retryable(RetryableKind, String),
    Fatal(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("gave up after {attempts} attempts ({kind}): {reason}")]
    RetriesExhausted {
        attempts: u32,
        kind: RetryableKind,
        reason: String,
    },
    #[error("unexpected probe failure: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Target URL with an `{id}` placeholder.
    pub url_template: String,
    /// Body fragment meaning the identifier does not exist remotely.
    pub not_found_marker: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            not_found_marker: DEFAULT_NOT_FOUND_MARKER.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl ProberConfig {
    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }

    pub fn with_not_found_marker(mut self, marker: impl Into<String>) -> Self {
        self.not_found_marker = marker.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Classifies identifiers through a caller-supplied proxy.
pub struct Prober {
    transport: Arc<dyn ProbeTransport>,
    config: ProberConfig,
}

impl Prober {
    pub fn new(transport: Arc<dyn ProbeTransport>, config: ProberConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ProberConfig {
        &self.config
    }

    /// Resolve `identifier` via `proxy`, retrying transient and rate-limit
    /// failures according to the retry policy.
    pub async fn classify(&self, identifier: &str, proxy: &str) -> Result<Outcome, ProbeError> {
        let policy = self.config.retry;
        let mut attempt = 1;

        loop {
            match self.attempt(identifier, proxy).await {
                Attempt::Resolved(outcome) => return Ok(outcome),
                Attempt::Fatal(reason) => return Err(ProbeError::Unexpected(reason)),
                Attempt::Retryable(kind, reason) => {
                    if attempt >= policy.max_attempts() {
                        return Err(ProbeError::RetriesExhausted {
                            attempts: attempt,
                            kind,
                            reason,
                        });
                    }

                    attempt += 1;
                    let delay = policy.delay_before(attempt);
                    log::warn!(
                        "retrying {identifier} via {proxy} (attempt {attempt}/{}) in {:.1}s after {kind}",
                        policy.max_attempts(),
                        delay.as_secs_f64()
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Perform exactly one request and interpret it.
    pub async fn attempt(&self, identifier: &str, proxy: &str) -> Attempt {
        let url = match self.target_url(identifier) {
            Ok(url) => url,
            Err(err) => return Attempt::Fatal(format!("invalid target url: {err}")),
        };

        let request = ProbeRequest {
            url,
            proxy: proxy.to_string(),
            user_agent: random_user_agent(),
            timeout: self.config.request_timeout,
        };

        log::debug!("checking {identifier} via {proxy}");
        match self.transport.fetch(&request).await {
            Ok(response) => self.interpret(identifier, &response),
            Err(TransportError::Connect(reason)) | Err(TransportError::Timeout(reason)) => {
                log::warn!("network error while checking {identifier}: {reason}");
                Attempt::Retryable(RetryableKind::Transient, reason)
            }
            Err(err) => {
                log::error!("unexpected error while checking {identifier}: {err}");
                Attempt::Fatal(err.to_string())
            }
        }
    }

    fn interpret(&self, identifier: &str, response: &ProbeResponse) -> Attempt {
        let status = response.status;
        if status == StatusCode::TOO_MANY_REQUESTS {
            log::warn!("too many requests (429) while checking {identifier}");
            return Attempt::Retryable(RetryableKind::RateLimited, "HTTP 429".into());
        }

        if !status.is_success() {
            log::error!("HTTP {} while checking {identifier}", status.as_u16());
            return Attempt::Resolved(Outcome::Unknown);
        }

        if response.body.contains(&self.config.not_found_marker) {
            Attempt::Resolved(Outcome::Available)
        } else {
            Attempt::Resolved(Outcome::Taken)
        }
    }

    fn target_url(&self, identifier: &str) -> Result<Url, url::ParseError> {
        Url::parse(&self.config.url_template.replace(ID_PLACEHOLDER, identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubTransport {
        responses: Mutex<Vec<Result<ProbeResponse, TransportError>>>,
        calls: Mutex<Vec<ProbeRequest>>,
    }

    impl StubTransport {
        fn new(responses: Vec<Result<ProbeResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProbeTransport for StubTransport {
        async fn fetch(&self, request: &ProbeRequest) -> Result<ProbeResponse, TransportError> {
            self.calls.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .expect("no more stub responses")
        }
    }

    fn ok(status: u16, body: &str) -> Result<ProbeResponse, TransportError> {
        Ok(ProbeResponse::new(StatusCode::from_u16(status).unwrap(), body))
    }

    fn prober(transport: Arc<StubTransport>) -> Prober {
        Prober::new(
            transport,
            ProberConfig::default().with_retry(RetryPolicy::immediate(3)),
        )
    }

    #[tokio::test]
    async fn not_found_body_is_available() {
        let transport = StubTransport::new(vec![ok(200, "<title>Page Not Found</title>")]);
        let outcome = prober(transport.clone()).classify("alpha", "10.0.0.1:80").await;
        assert_eq!(outcome, Ok(Outcome::Available));

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].url.as_str(), "https://www.instagram.com/alpha/");
        assert_eq!(calls[0].proxy, "10.0.0.1:80");
        assert_eq!(calls[0].timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn other_success_is_taken() {
        let transport = StubTransport::new(vec![ok(200, "<body>profile</body>")]);
        let outcome = prober(transport).classify("beta", "10.0.0.1:80").await;
        assert_eq!(outcome, Ok(Outcome::Taken));
    }

    #[tokio::test]
    async fn http_errors_resolve_unknown_without_retry() {
        let transport = StubTransport::new(vec![ok(500, "oops"), ok(200, "unused")]);
        let outcome = prober(transport.clone()).classify("gamma", "10.0.0.1:80").await;
        assert_eq!(outcome, Ok(Outcome::Unknown));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn rate_limits_exhaust_after_three_attempts() {
        let transport = StubTransport::new(vec![ok(429, ""), ok(429, ""), ok(429, ""), ok(200, "")]);
        let outcome = prober(transport.clone()).classify("delta", "10.0.0.1:80").await;
        assert!(matches!(
            outcome,
            Err(ProbeError::RetriesExhausted {
                attempts: 3,
                kind: RetryableKind::RateLimited,
                ..
            })
        ));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let transport = StubTransport::new(vec![
            Err(TransportError::Timeout("read timed out".into())),
            Err(TransportError::Connect("refused".into())),
            ok(200, "Page Not Found"),
        ]);
        let outcome = prober(transport.clone()).classify("eps", "10.0.0.1:80").await;
        assert_eq!(outcome, Ok(Outcome::Available));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn unexpected_transport_errors_are_not_retried() {
        let transport = StubTransport::new(vec![
            Err(TransportError::Other("body decode".into())),
            ok(200, ""),
        ]);
        let outcome = prober(transport.clone()).classify("zeta", "10.0.0.1:80").await;
        assert!(matches!(outcome, Err(ProbeError::Unexpected(_))));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn custom_template_and_marker() {
        let transport = StubTransport::new(vec![ok(200, "no such user")]);
        let prober = Prober::new(
            transport.clone(),
            ProberConfig::default()
                .with_url_template("http://example.test/u/{id}")
                .with_not_found_marker("no such user"),
        );
        assert_eq!(prober.classify("eta", "p:1").await, Ok(Outcome::Available));
        assert_eq!(
            transport.calls.lock().unwrap()[0].url.as_str(),
            "http://example.test/u/eta"
        );
    }
}
