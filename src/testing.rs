//! In-memory gateway and container network shared by the unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::admin::{AdminApi, Consumer, GatewayRoute, Upstream, UpstreamTls};
use crate::app::{DesiredState, ProbeSpec, ProviderSpec};
use crate::constants::{AUTHORIZATION_HEADER, CONSUMER_AUTH_PLUGIN, PROVIDER_AUTH_PLUGIN};
use crate::network::{ContainerRuntime, ServicePath};
use crate::observer::{GatewayTraffic, ProbeRequest, ProbeResponse};
use crate::utils::{AdminError, RuntimeError};

#[derive(Default)]
struct GatewayState {
    routes: BTreeMap<String, GatewayRoute>,
    consumers: BTreeMap<String, Consumer>,
    fail_consumer_reads: bool,
    rejected_routes: BTreeSet<String>,
    probe_overrides: BTreeMap<String, (u16, String)>,
}

/// Admin API plus a data plane that answers the way a misconfigured
/// gateway does: a consumer-credential plugin that swallows the
/// Authorization header makes the provider reject the request.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<GatewayState>,
}

impl FakeGateway {
    pub fn insert_route(&self, route: GatewayRoute) {
        self.state.lock().unwrap().routes.insert(route.id.clone(), route);
    }

    pub fn insert_consumer(&self, consumer: Consumer) {
        self.state
            .lock()
            .unwrap()
            .consumers
            .insert(consumer.username.clone(), consumer);
    }

    pub fn fail_consumer_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_consumer_reads = fail;
    }

    pub fn reject_route_puts(&self, id: &str) {
        self.state.lock().unwrap().rejected_routes.insert(id.to_string());
    }

    /// Answer probes on this route with a fixed response
    pub fn override_probe(&self, route_id: &str, status: u16, body: &str) {
        self.state
            .lock()
            .unwrap()
            .probe_overrides
            .insert(route_id.to_string(), (status, body.to_string()));
    }

    pub fn routes(&self) -> Vec<GatewayRoute> {
        self.state.lock().unwrap().routes.values().cloned().collect()
    }

    pub fn consumers(&self) -> Vec<Consumer> {
        self.state.lock().unwrap().consumers.values().cloned().collect()
    }

    /// Every stored definition, as written, for byte-level comparisons
    pub fn state_bytes(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let mut bytes = Vec::new();
        for route in state.routes.values() {
            bytes.extend(route.canonical_bytes());
            bytes.push(b'\n');
        }
        for consumer in state.consumers.values() {
            bytes.extend(consumer.canonical_bytes());
            bytes.push(b'\n');
        }
        bytes
    }

    fn data_plane(route: &GatewayRoute) -> (u16, Value) {
        let swallows_authorization = route
            .plugin(CONSUMER_AUTH_PLUGIN)
            .and_then(|cfg| cfg.get("header"))
            .and_then(Value::as_str)
            .map(|h| h.eq_ignore_ascii_case(AUTHORIZATION_HEADER))
            .unwrap_or(false);

        match (swallows_authorization, route.plugin(PROVIDER_AUTH_PLUGIN).is_some()) {
            (true, true) => (
                403,
                json!({"message": "Invalid key=value pair (missing equal-sign) in Authorization header"}),
            ),
            (false, true) => (200, json!({"choices": [{"message": {"content": "pong"}}]})),
            _ => (
                401,
                json!({"error": {"code": "invalid_api_key", "message": "Incorrect API key provided"}}),
            ),
        }
    }
}

#[async_trait]
impl AdminApi for FakeGateway {
    async fn list_routes(&self) -> Result<Vec<GatewayRoute>, AdminError> {
        Ok(self.routes())
    }

    async fn get_route(&self, id: &str) -> Result<Option<GatewayRoute>, AdminError> {
        Ok(self.state.lock().unwrap().routes.get(id).cloned())
    }

    async fn put_route(&self, route: &GatewayRoute) -> Result<(), AdminError> {
        let mut state = self.state.lock().unwrap();
        if state.rejected_routes.contains(&route.id) {
            return Err(AdminError::Status {
                status: 400,
                body: "{\"error_msg\":\"invalid configuration\"}".into(),
            });
        }
        let stored: GatewayRoute = serde_json::from_value(route.admin_body()?)
            .map_err(|e| AdminError::Decode(e.to_string()))?;
        state.routes.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn list_consumers(&self) -> Result<Vec<Consumer>, AdminError> {
        if self.state.lock().unwrap().fail_consumer_reads {
            return Err(AdminError::Transport("connection reset by peer".into()));
        }
        Ok(self.consumers())
    }

    async fn put_consumer(&self, consumer: &Consumer) -> Result<(), AdminError> {
        let stored: Consumer = serde_json::from_value(consumer.admin_body()?)
            .map_err(|e| AdminError::Decode(e.to_string()))?;
        self.state
            .lock()
            .unwrap()
            .consumers
            .insert(stored.username.clone(), stored);
        Ok(())
    }
}

#[async_trait]
impl GatewayTraffic for FakeGateway {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, AdminError> {
        let state = self.state.lock().unwrap();
        let route = state
            .routes
            .values()
            .filter(|r| {
                let prefix = r.uri.trim_end_matches('*');
                !prefix.is_empty() && request.path.starts_with(prefix)
            })
            .max_by_key(|r| r.uri.len());

        let (status, body) = match route {
            None => (404, json!({"error_msg": "404 Route Not Found"}).to_string()),
            Some(route) => match state.probe_overrides.get(&route.id) {
                Some((status, body)) => (*status, body.clone()),
                None => {
                    let (status, body) = Self::data_plane(route);
                    (status, body.to_string())
                }
            },
        };
        Ok(ProbeResponse {
            status,
            body,
            latency_ms: 3,
        })
    }
}

#[derive(Default)]
struct NetworkState {
    running: BTreeSet<String>,
    attached: BTreeSet<String>,
    connected: Vec<String>,
}

/// Container network where a service resolves only while it runs on the shared network
#[derive(Default)]
pub struct FakeNetwork {
    state: Mutex<NetworkState>,
}

impl FakeNetwork {
    /// All `services` running and attached
    pub fn healthy(services: &[&str]) -> Self {
        let names: BTreeSet<String> = services.iter().map(|s| s.to_string()).collect();
        Self {
            state: Mutex::new(NetworkState {
                running: names.clone(),
                attached: names,
                connected: Vec::new(),
            }),
        }
    }

    pub fn detach(&self, service: &str) {
        self.state.lock().unwrap().attached.remove(service);
    }

    pub fn attach(&self, service: &str) {
        self.state.lock().unwrap().attached.insert(service.to_string());
    }

    pub fn stop(&self, service: &str) {
        self.state.lock().unwrap().running.remove(service);
    }

    /// Services connected through `connect_network`, in call order
    pub fn connected(&self) -> Vec<String> {
        self.state.lock().unwrap().connected.clone()
    }

    fn is_up(&self, service: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.running.contains(service) && state.attached.contains(service)
    }
}

#[async_trait]
impl ContainerRuntime for FakeNetwork {
    async fn is_running(&self, service: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.lock().unwrap().running.contains(service))
    }

    async fn network_members(&self, _network: &str) -> Result<BTreeSet<String>, RuntimeError> {
        Ok(self.state.lock().unwrap().attached.clone())
    }

    async fn resolve(&self, from: &str, host: &str, _timeout_ms: u64) -> Result<String, RuntimeError> {
        if self.is_up(from) && self.is_up(host) {
            Ok(format!("172.20.0.10    {}", host))
        } else {
            Err(RuntimeError::CommandFailed {
                command: format!("docker exec {} getent hosts {}", from, host),
                stderr: String::new(),
            })
        }
    }

    async fn tcp_connect(
        &self,
        from: &str,
        host: &str,
        port: u16,
        _timeout_ms: u64,
    ) -> Result<(), RuntimeError> {
        if self.is_up(from) && self.is_up(host) {
            Ok(())
        } else {
            Err(RuntimeError::CommandFailed {
                command: format!("docker exec {} nc -z {} {}", from, host, port),
                stderr: "Connection refused".into(),
            })
        }
    }

    async fn connect_network(&self, network: &str, service: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if !state.running.contains(service) {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker network connect {} {}", network, service),
                stderr: format!("No such container: {}", service),
            });
        }
        state.attached.insert(service.to_string());
        state.connected.push(service.to_string());
        Ok(())
    }
}

/// One OpenAI provider on `openai-chat`, one required consumer, one required path
pub fn desired_fixture() -> DesiredState {
    DesiredState {
        shared_secret: "team-secret".into(),
        ssl_verify_default: None,
        providers: vec![ProviderSpec {
            name: "openai".into(),
            route_id: "openai-chat".into(),
            base_url: "https://api.openai.com".into(),
            token: Some("sk-live".into()),
            ssl_verify: Some(true),
            probe: Some(ProbeSpec {
                method: "POST".into(),
                path: Some("/v1/chat/completions".into()),
                headers: BTreeMap::new(),
                payload: json!({"model": "gpt-4o-mini"}),
            }),
        }],
        consumers: vec!["gateway-api".into()],
        shared_network: "gateway-net".into(),
        paths: vec![ServicePath {
            from: "apisix".into(),
            to: "backend".into(),
            port: 8000,
        }],
        provider_auth_plugins: vec![PROVIDER_AUTH_PLUGIN.into()],
    }
}

/// A chat route over a verified https upstream carrying `plugins`
pub fn route_with_plugins(id: &str, plugins: Value) -> GatewayRoute {
    let plugins = plugins
        .as_object()
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    let mut upstream_extra = BTreeMap::new();
    upstream_extra.insert("type".to_string(), json!("roundrobin"));
    upstream_extra.insert("nodes".to_string(), json!({"api.openai.com:443": 1}));

    GatewayRoute {
        id: id.into(),
        uri: "/v1/chat/*".into(),
        methods: vec!["POST".into()],
        plugins,
        upstream: Some(Upstream {
            scheme: Some("https".into()),
            tls: Some(UpstreamTls {
                verify: Some(true),
                extra: BTreeMap::new(),
            }),
            extra: upstream_extra,
        }),
        extra: BTreeMap::new(),
    }
}

/// `key-auth` and `ai-proxy` both reading Authorization
pub fn conflicting_route(id: &str) -> GatewayRoute {
    route_with_plugins(
        id,
        json!({
            "key-auth": {"header": "Authorization"},
            "ai-proxy": {
                "provider": "openai",
                "auth": {"header": {"Authorization": "Bearer sk-live"}}
            }
        }),
    )
}
