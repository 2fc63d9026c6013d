//! HTTP transport used by the prober.
//!
//! `ProbeTransport` keeps the classification logic independent of reqwest;
//! `ReqwestTransport` is the production adapter and caches one client per
//! proxy endpoint.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use http::header::USER_AGENT;
use reqwest::{Client, Proxy};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

/// One outbound classification request.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub url: Url,
    pub proxy: String,
    pub user_agent: &'static str,
    pub timeout: Duration,
}

/// Status and body returned by the remote service.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ProbeResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("invalid proxy endpoint {proxy}: {reason}")]
    InvalidProxy { proxy: String, reason: String },
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Sends a single GET through a given proxy.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn fetch(&self, request: &ProbeRequest) -> Result<ProbeResponse, TransportError>;
}

/// Reqwest-backed transport with a client per proxy endpoint.
pub struct ReqwestTransport {
    clients: Mutex<HashMap<String, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, proxy: &str, timeout: Duration) -> Result<Client, TransportError> {
        let mut guard = self.clients.lock().await;
        if let Some(client) = guard.get(proxy) {
            return Ok(client.clone());
        }

        let endpoint = proxy_url(proxy);
        let reqwest_proxy = Proxy::all(&endpoint).map_err(|err| TransportError::InvalidProxy {
            proxy: proxy.to_string(),
            reason: err.to_string(),
        })?;

        let client = Client::builder()
            .proxy(reqwest_proxy)
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::InvalidProxy {
                proxy: proxy.to_string(),
                reason: err.to_string(),
            })?;

        guard.insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeTransport for ReqwestTransport {
    async fn fetch(&self, request: &ProbeRequest) -> Result<ProbeResponse, TransportError> {
        let client = self.client(&request.proxy, request.timeout).await?;

        let response = client
            .get(request.url.clone())
            .header(USER_AGENT, request.user_agent)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(TransportError::from_reqwest)?;

        Ok(ProbeResponse { status, body })
    }
}

/// Addresses without a scheme are treated as plain HTTP proxies.
pub fn proxy_url(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_is_added_when_missing() {
        assert_eq!(proxy_url("10.0.0.1:3128"), "http://10.0.0.1:3128");
        assert_eq!(proxy_url("user:pw@10.0.0.1:3128"), "http://user:pw@10.0.0.1:3128");
        assert_eq!(proxy_url("socks5://10.0.0.1:1080"), "socks5://10.0.0.1:1080");
    }

    #[tokio::test]
    async fn clients_are_cached_per_proxy() {
        let transport = ReqwestTransport::new();
        transport
            .client("10.0.0.1:3128", Duration::from_secs(1))
            .await
            .unwrap();
        transport
            .client("10.0.0.1:3128", Duration::from_secs(1))
            .await
            .unwrap();
        transport
            .client("10.0.0.2:3128", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(transport.clients.lock().await.len(), 2);
    }
}
