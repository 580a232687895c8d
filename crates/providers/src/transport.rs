//! HTTP seam between the API client and the network.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::LazyLock;
use std::time::Duration;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: serde_json::Value,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Posts JSON and hands back status plus raw body. Any `Err` is a
/// transport-level failure; HTTP error statuses come back as `Ok`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(&self, request: OutboundRequest) -> Result<TransportResponse>;
}

pub struct ReqwestTransport {
    http: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            timeout,
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, request: OutboundRequest) -> Result<TransportResponse> {
        let mut builder = self.http.post(&request.url).timeout(self.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        let resp = builder.json(&request.body).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(TransportResponse { status, body })
    }
}
