use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

use super::types::{
    parse_item_envelope, parse_list_envelope, route_from_entry, Consumer, GatewayRoute,
};
use crate::constants::{ADMIN_CONSUMERS_PATH, ADMIN_KEY_HEADER, ADMIN_ROUTES_PATH};
use crate::utils::AdminError;

/// Read/write access to the gateway's route and consumer collections.
///
/// Implementations make exactly one request per call; retry policy belongs
/// to the caller.
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn list_routes(&self) -> Result<Vec<GatewayRoute>, AdminError>;

    /// `Ok(None)` when the route does not exist
    async fn get_route(&self, id: &str) -> Result<Option<GatewayRoute>, AdminError>;

    /// Full-resource replacement by id
    async fn put_route(&self, route: &GatewayRoute) -> Result<(), AdminError>;

    async fn list_consumers(&self) -> Result<Vec<Consumer>, AdminError>;

    /// Full-resource replacement keyed by username
    async fn put_consumer(&self, consumer: &Consumer) -> Result<(), AdminError>;
}

/// HTTP client for the admin API
pub struct AdminClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_ms: u64,
}

impl AdminClient {
    pub fn new(base_url: &str, api_key: &str, timeout_ms: u64) -> Result<Self, AdminError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| AdminError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout_ms,
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, Value), AdminError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "admin request");

        let mut builder = self
            .client
            .request(method, &url)
            .header(ADMIN_KEY_HEADER, &self.api_key);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AdminError::Timeout(self.timeout_ms)
            } else {
                AdminError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AdminError::Transport(e.to_string()))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AdminError::Unauthorized(status.as_u16()));
        }
        if status == StatusCode::NOT_FOUND {
            return Ok((status, Value::Null));
        }
        if !status.is_success() {
            return Err(AdminError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| AdminError::Decode(e.to_string()))?
        };
        Ok((status, value))
    }

    fn expect_found(status: StatusCode, path: &str) -> Result<(), AdminError> {
        if status == StatusCode::NOT_FOUND {
            return Err(AdminError::Status {
                status: status.as_u16(),
                body: format!("{} not found", path),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AdminApi for AdminClient {
    async fn list_routes(&self) -> Result<Vec<GatewayRoute>, AdminError> {
        let (status, body) = self.request(Method::GET, ADMIN_ROUTES_PATH, None).await?;
        Self::expect_found(status, ADMIN_ROUTES_PATH)?;

        parse_list_envelope(body)?
            .into_iter()
            .map(|(key, value)| route_from_entry(key, value))
            .collect()
    }

    async fn get_route(&self, id: &str) -> Result<Option<GatewayRoute>, AdminError> {
        let path = format!("{}/{}", ADMIN_ROUTES_PATH, id);
        let (status, body) = self.request(Method::GET, &path, None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let (key, value) = parse_item_envelope(body)?;
        route_from_entry(key.or_else(|| Some(id.to_string())), value).map(Some)
    }

    async fn put_route(&self, route: &GatewayRoute) -> Result<(), AdminError> {
        let path = format!("{}/{}", ADMIN_ROUTES_PATH, route.id);
        let body = route.admin_body()?;
        let (status, _) = self.request(Method::PUT, &path, Some(&body)).await?;
        Self::expect_found(status, &path)
    }

    async fn list_consumers(&self) -> Result<Vec<Consumer>, AdminError> {
        let (status, body) = self.request(Method::GET, ADMIN_CONSUMERS_PATH, None).await?;
        Self::expect_found(status, ADMIN_CONSUMERS_PATH)?;

        parse_list_envelope(body)?
            .into_iter()
            .map(|(_, value)| {
                serde_json::from_value(value).map_err(|e| AdminError::Decode(e.to_string()))
            })
            .collect()
    }

    async fn put_consumer(&self, consumer: &Consumer) -> Result<(), AdminError> {
        let body = consumer.admin_body()?;
        let (status, _) = self
            .request(Method::PUT, ADMIN_CONSUMERS_PATH, Some(&body))
            .await?;
        Self::expect_found(status, ADMIN_CONSUMERS_PATH)
    }
}
