use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::constants::{CONSUMER_AUTH_PLUGIN, SERVER_MANAGED_FIELDS};
use crate::utils::AdminError;

/// A route as the admin API stores it.
///
/// Plugins live in a sorted map so two equal routes always serialize to the
/// same bytes. Fields this crate does not model are kept in `extra` and
/// written back untouched on full replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRoute {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Upstream>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Inline upstream definition of a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Upstream {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<UpstreamTls>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UpstreamTls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl GatewayRoute {
    /// Whether the upstream is reached over TLS
    pub fn is_secure_upstream(&self) -> bool {
        self.upstream
            .as_ref()
            .and_then(|u| u.scheme.as_deref())
            .map(|s| matches!(s.to_ascii_lowercase().as_str(), "https" | "grpcs"))
            .unwrap_or(false)
    }

    /// Effective upstream TLS verification flag (the gateway defaults to off)
    pub fn ssl_verify(&self) -> bool {
        self.upstream
            .as_ref()
            .and_then(|u| u.tls.as_ref())
            .and_then(|t| t.verify)
            .unwrap_or(false)
    }

    pub fn plugin(&self, name: &str) -> Option<&Value> {
        self.plugins.get(name)
    }

    /// Body for a full-resource PUT: everything except server-managed fields
    pub fn admin_body(&self) -> Result<Value, AdminError> {
        let mut body = serde_json::to_value(self).map_err(|e| AdminError::Decode(e.to_string()))?;
        strip_server_fields(&mut body);
        Ok(body)
    }

    /// The definition as it would be written, for byte-level comparisons
    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.admin_body()
            .and_then(|v| serde_json::to_vec(&v).map_err(|e| AdminError::Decode(e.to_string())))
            .unwrap_or_default()
    }
}

/// An authenticated caller registered with the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    pub username: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Consumer {
    /// A consumer holding a single shared-secret credential
    pub fn with_key(username: &str, secret: &str) -> Self {
        let mut plugins = BTreeMap::new();
        plugins.insert(
            CONSUMER_AUTH_PLUGIN.to_string(),
            serde_json::json!({ "key": secret }),
        );
        Self {
            username: username.to_string(),
            plugins,
            extra: BTreeMap::new(),
        }
    }

    pub fn credential(&self) -> Option<&str> {
        self.plugins
            .get(CONSUMER_AUTH_PLUGIN)
            .and_then(|cfg| cfg.get("key"))
            .and_then(Value::as_str)
    }

    pub fn admin_body(&self) -> Result<Value, AdminError> {
        let mut body = serde_json::to_value(self).map_err(|e| AdminError::Decode(e.to_string()))?;
        strip_server_fields(&mut body);
        Ok(body)
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.admin_body()
            .and_then(|v| serde_json::to_vec(&v).map_err(|e| AdminError::Decode(e.to_string())))
            .unwrap_or_default()
    }
}

fn strip_server_fields(body: &mut Value) {
    if let Some(obj) = body.as_object_mut() {
        for field in SERVER_MANAGED_FIELDS {
            obj.remove(*field);
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Unwrap the admin API list envelope (v3 `list` or v2 `node.nodes`)
pub fn parse_list_envelope(body: Value) -> Result<Vec<(Option<String>, Value)>, AdminError> {
    let items = if let Some(list) = body.get("list") {
        list.clone()
    } else if let Some(nodes) = body.get("node").and_then(|n| n.get("nodes")) {
        nodes.clone()
    } else {
        return Err(AdminError::Decode(
            "response has neither `list` nor `node.nodes`".to_string(),
        ));
    };

    match items {
        Value::Array(entries) => Ok(entries.into_iter().map(split_entry).collect()),
        // An empty collection is sometimes encoded as `{}`
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        other => Err(AdminError::Decode(format!("unexpected list payload: {}", other))),
    }
}

/// Unwrap a single-item envelope (v3 `value` or v2 `node.value`)
pub fn parse_item_envelope(body: Value) -> Result<(Option<String>, Value), AdminError> {
    if body.get("value").is_some() {
        return Ok(split_entry(body));
    }
    match body.get("node") {
        Some(node) => Ok(split_entry(node.clone())),
        None => Err(AdminError::Decode("response has no `value`".to_string())),
    }
}

fn split_entry(entry: Value) -> (Option<String>, Value) {
    let key = entry
        .get("key")
        .and_then(Value::as_str)
        .map(|k| k.rsplit('/').next().unwrap_or(k).to_string());
    let value = entry.get("value").cloned().unwrap_or(entry);
    (key, value)
}

/// Decode a route, falling back to the envelope key for its id
pub fn route_from_entry(key: Option<String>, value: Value) -> Result<GatewayRoute, AdminError> {
    let mut route: GatewayRoute =
        serde_json::from_value(value).map_err(|e| AdminError::Decode(e.to_string()))?;
    if route.id.is_empty() {
        route.id = key.unwrap_or_default();
    }
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_route_preserves_unknown_fields() {
        let raw = json!({
            "id": "openai-chat",
            "uri": "/v1/chat/*",
            "name": "openai",
            "plugins": {"ai-proxy": {"provider": "openai"}},
            "upstream": {"scheme": "https", "nodes": {"api.openai.com:443": 1}, "tls": {"verify": true}},
            "create_time": 1700000000
        });
        let route: GatewayRoute = serde_json::from_value(raw).unwrap();

        assert!(route.is_secure_upstream());
        assert!(route.ssl_verify());
        assert_eq!(route.extra.get("name"), Some(&json!("openai")));

        let body = route.admin_body().unwrap();
        assert!(body.get("create_time").is_none());
        assert_eq!(body["upstream"]["nodes"], json!({"api.openai.com:443": 1}));
        assert_eq!(body["name"], json!("openai"));
    }

    #[test]
    fn test_numeric_id_and_envelope_key() {
        let route = route_from_entry(Some("7".into()), json!({"uri": "/a"})).unwrap();
        assert_eq!(route.id, "7");

        let route: GatewayRoute = serde_json::from_value(json!({"id": 12, "uri": "/b"})).unwrap();
        assert_eq!(route.id, "12");
    }

    #[test]
    fn test_list_envelopes() {
        let v3 = json!({"total": 1, "list": [{"key": "/apisix/routes/1", "value": {"uri": "/x"}}]});
        let items = parse_list_envelope(v3).unwrap();
        assert_eq!(items[0].0.as_deref(), Some("1"));

        let v2 = json!({"node": {"nodes": {}}});
        assert!(parse_list_envelope(v2).unwrap().is_empty());

        assert!(parse_list_envelope(json!({"error_msg": "nope"})).is_err());
    }

    #[test]
    fn test_consumer_credential() {
        let consumer = Consumer::with_key("gateway-api", "s3cret");
        assert_eq!(consumer.credential(), Some("s3cret"));

        let bare: Consumer = serde_json::from_value(json!({"username": "x"})).unwrap();
        assert_eq!(bare.credential(), None);
    }
}
