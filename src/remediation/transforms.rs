//! Pure resource rewrites. Each one is idempotent: `f(f(x)) == f(x)`.

use serde_json::{json, Map, Value};

use crate::admin::{Consumer, GatewayRoute, UpstreamTls};
use crate::constants::{AUTHORIZATION_HEADER, CONSUMER_AUTH_PLUGIN};

/// Drop the consumer-credential plugin and make `provider_plugin` carry the
/// provider bearer token. Id, URI and every other field stay as they are.
///
/// A freshly installed provider plugin points at `endpoint` when one is
/// given; an existing plugin keeps its own endpoint settings.
pub fn replace_consumer_auth(
    route: &GatewayRoute,
    provider_plugin: &str,
    provider_name: &str,
    endpoint: Option<&str>,
    token: &str,
) -> GatewayRoute {
    let mut next = route.clone();
    next.plugins.remove(CONSUMER_AUTH_PLUGIN);

    let config = next
        .plugins
        .entry(provider_plugin.to_string())
        .or_insert_with(|| fresh_provider_config(provider_name, endpoint));
    if !config.is_object() {
        *config = fresh_provider_config(provider_name, endpoint);
    }

    let header = object_at(config, "auth");
    let header = object_at(header, "header");
    if let Value::Object(map) = header {
        // Only one spelling of the header may survive
        map.retain(|name, _| !name.eq_ignore_ascii_case(AUTHORIZATION_HEADER));
        map.insert(
            AUTHORIZATION_HEADER.to_string(),
            Value::String(format!("Bearer {}", token)),
        );
    }

    next
}

fn fresh_provider_config(provider_name: &str, endpoint: Option<&str>) -> Value {
    match endpoint.filter(|e| !e.is_empty()) {
        Some(endpoint) => json!({
            "provider": provider_name,
            "override": { "endpoint": endpoint },
        }),
        None => json!({ "provider": provider_name }),
    }
}

/// The object under `key`, created (or replaced if it was not an object)
fn object_at<'v>(value: &'v mut Value, key: &str) -> &'v mut Value {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    let slot = &mut value[key];
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    slot
}

/// Set only the upstream TLS verification flag; `None` without an upstream
pub fn set_ssl_verify(route: &GatewayRoute, verify: bool) -> Option<GatewayRoute> {
    let mut next = route.clone();
    let upstream = next.upstream.as_mut()?;
    upstream
        .tls
        .get_or_insert_with(UpstreamTls::default)
        .verify = Some(verify);
    Some(next)
}

/// The consumer holding the canonical secret, keeping anything else it had
pub fn canonical_consumer(existing: Option<&Consumer>, username: &str, secret: &str) -> Consumer {
    match existing {
        Some(consumer) => {
            let mut next = consumer.clone();
            let config = next
                .plugins
                .entry(CONSUMER_AUTH_PLUGIN.to_string())
                .or_insert_with(|| json!({}));
            if !config.is_object() {
                *config = json!({});
            }
            if let Value::Object(map) = config {
                map.insert("key".to_string(), Value::String(secret.to_string()));
            }
            next
        }
        None => Consumer::with_key(username, secret),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{conflicting_route, route_with_plugins};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_replace_consumer_auth_is_idempotent() {
        let route = conflicting_route("openai-chat");
        let once = replace_consumer_auth(&route, "ai-proxy", "openai", None, "sk-live");
        let twice = replace_consumer_auth(&once, "ai-proxy", "openai", None, "sk-live");

        assert_eq!(once.canonical_bytes(), twice.canonical_bytes());
        assert!(once.plugin("key-auth").is_none());
        assert_eq!(
            once.plugin("ai-proxy").unwrap()["auth"]["header"]["Authorization"],
            "Bearer sk-live"
        );
        assert_eq!(once.id, route.id);
        assert_eq!(once.uri, route.uri);
    }

    #[test]
    fn test_replace_consumer_auth_installs_missing_plugin() {
        let route = route_with_plugins("r", json!({"key-auth": {"header": "Authorization"}}));
        let fixed = replace_consumer_auth(
            &route,
            "ai-proxy",
            "openai",
            Some("https://api.openai.com"),
            "sk",
        );
        let plugin = fixed.plugin("ai-proxy").unwrap();
        assert_eq!(plugin["provider"], "openai");
        assert_eq!(plugin["override"]["endpoint"], "https://api.openai.com");
    }

    #[test]
    fn test_existing_plugin_keeps_its_endpoint() {
        let route = route_with_plugins(
            "r",
            json!({"ai-proxy": {"provider": "openai", "override": {"endpoint": "http://mirror:8080"}}}),
        );
        let fixed = replace_consumer_auth(
            &route,
            "ai-proxy",
            "openai",
            Some("https://api.openai.com"),
            "sk",
        );
        assert_eq!(
            fixed.plugin("ai-proxy").unwrap()["override"]["endpoint"],
            "http://mirror:8080"
        );

        let bare = route_with_plugins("r", json!({}));
        let fixed = replace_consumer_auth(&bare, "ai-proxy", "openai", Some(""), "sk");
        assert!(fixed.plugin("ai-proxy").unwrap().get("override").is_none());
    }

    #[test]
    fn test_replace_drops_other_header_spellings() {
        let route = route_with_plugins(
            "r",
            json!({"ai-proxy": {"auth": {"header": {"authorization": "Bearer old", "X-Org": "o"}}}}),
        );
        let fixed = replace_consumer_auth(&route, "ai-proxy", "openai", None, "new");
        let headers = fixed.plugin("ai-proxy").unwrap()["auth"]["header"].clone();
        assert_eq!(headers, json!({"Authorization": "Bearer new", "X-Org": "o"}));
    }

    #[test]
    fn test_set_ssl_verify_touches_only_the_flag() {
        let route = route_with_plugins("r", json!({"cors": {}}));
        let fixed = set_ssl_verify(&route, false).unwrap();

        assert!(!fixed.ssl_verify());
        assert_eq!(fixed.plugins, route.plugins);
        assert_eq!(
            fixed.upstream.as_ref().unwrap().extra,
            route.upstream.as_ref().unwrap().extra
        );
        assert_eq!(set_ssl_verify(&fixed, false).unwrap(), fixed);
    }

    #[test]
    fn test_canonical_consumer_keeps_other_plugins() {
        let mut existing = Consumer::with_key("gateway-api", "old");
        existing
            .plugins
            .insert("limit-count".into(), json!({"count": 10}));

        let fixed = canonical_consumer(Some(&existing), "gateway-api", "new");
        assert_eq!(fixed.credential(), Some("new"));
        assert!(fixed.plugins.contains_key("limit-count"));
        assert_eq!(canonical_consumer(Some(&fixed), "gateway-api", "new"), fixed);
    }
}
