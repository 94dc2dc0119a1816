use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::utils::AdminError;

/// One synthetic request sent through the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// What the gateway answered; any HTTP status is a response, not an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
    pub latency_ms: u64,
}

/// Data-plane access used for synthetic probes
#[async_trait]
pub trait GatewayTraffic: Send + Sync {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, AdminError>;
}

pub struct HttpTraffic {
    client: Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpTraffic {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self, AdminError> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .map_err(|e| AdminError::Transport(e.to_string()))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_ms,
        })
    }
}

#[async_trait]
impl GatewayTraffic for HttpTraffic {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, AdminError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|e| AdminError::Transport(format!("bad method {}: {}", request.method, e)))?;
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_null() {
            builder = builder.json(&request.body);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AdminError::Timeout(self.timeout_ms)
            } else {
                AdminError::Transport(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AdminError::Transport(e.to_string()))?;

        Ok(ProbeResponse {
            status,
            body,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}
