use serde::Serialize;
use std::collections::BTreeMap;

use super::retry::RetryPolicy;
use super::traffic::{GatewayTraffic, ProbeRequest, ProbeResponse};
use crate::admin::{AdminApi, Consumer, GatewayRoute};
use crate::app::{DesiredState, ProviderSpec};
use crate::network::{ContainerRuntime, NetworkTopology, PathResult, Reachability, ServicePath};
use crate::utils::ObserverError;

/// Outcome of the synthetic probe for one provider route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeRecord {
    pub route_id: String,
    pub provider: String,
    pub request: ProbeRequest,
    pub response: ProbeResponse,
}

/// Everything one observation pass saw.
///
/// `routes`/`consumers` are `None` when they could not be read; the reason is
/// in `errors`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Observation {
    pub routes: Option<Vec<GatewayRoute>>,
    pub consumers: Option<Vec<Consumer>>,
    pub probes: Vec<ProbeRecord>,
    pub topology: NetworkTopology,
    pub errors: Vec<ObserverError>,
}

/// Read-only view of the gateway, its data plane and the container network
pub struct StateObserver<'a> {
    admin: &'a dyn AdminApi,
    traffic: &'a dyn GatewayTraffic,
    runtime: &'a dyn ContainerRuntime,
    policy: RetryPolicy,
    dns_timeout_ms: u64,
    connect_timeout_ms: u64,
}

impl<'a> StateObserver<'a> {
    pub fn new(
        admin: &'a dyn AdminApi,
        traffic: &'a dyn GatewayTraffic,
        runtime: &'a dyn ContainerRuntime,
        policy: RetryPolicy,
        dns_timeout_ms: u64,
        connect_timeout_ms: u64,
    ) -> Self {
        Self {
            admin,
            traffic,
            runtime,
            policy,
            dns_timeout_ms,
            connect_timeout_ms,
        }
    }

    pub async fn fetch_routes(&self) -> Result<Vec<GatewayRoute>, ObserverError> {
        self.policy.run("routes", || self.admin.list_routes()).await
    }

    pub async fn fetch_route(&self, id: &str) -> Result<Option<GatewayRoute>, ObserverError> {
        let resource = format!("route {}", id);
        self.policy.run(&resource, || self.admin.get_route(id)).await
    }

    pub async fn fetch_consumers(&self) -> Result<Vec<Consumer>, ObserverError> {
        self.policy.run("consumers", || self.admin.list_consumers()).await
    }

    /// DNS resolution from `from`, then a TCP connect, within the retry budget
    pub async fn test_network_path(&self, path: &ServicePath) -> Reachability {
        let attempts = self.policy.attempts();
        let mut detail = String::new();

        for attempt in 1..=attempts {
            match self.try_path(path).await {
                Ok(()) => return Reachability::Reachable,
                Err(reason) => {
                    tracing::debug!(%path, attempt, %reason, "network path check failed");
                    detail = reason;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        Reachability::Unreachable {
            detail: format!("{} (after {} attempt(s))", detail, attempts),
        }
    }

    async fn try_path(&self, path: &ServicePath) -> Result<(), String> {
        let resolved = self
            .runtime
            .resolve(&path.from, &path.to, self.dns_timeout_ms)
            .await
            .map_err(|e| format!("DNS lookup of {} from {} failed: {}", path.to, path.from, e))?;

        self.runtime
            .tcp_connect(&path.from, &path.to, path.port, self.connect_timeout_ms)
            .await
            .map_err(|e| {
                format!(
                    "{} resolved to [{}] but connect to port {} failed: {}",
                    path.to,
                    resolved.trim(),
                    path.port,
                    e
                )
            })
    }

    /// Send one synthetic request through the gateway
    pub async fn probe_endpoint(
        &self,
        route_id: &str,
        request: &ProbeRequest,
    ) -> Result<ProbeResponse, ObserverError> {
        let resource = format!("probe {}", route_id);
        self.policy.run(&resource, || self.traffic.send(request)).await
    }

    /// Observe everything the desired state talks about.
    ///
    /// Failures are collected per resource; nothing here aborts the pass.
    pub async fn observe(&self, desired: &DesiredState) -> Observation {
        let mut observation = Observation::default();

        match self.fetch_routes().await {
            Ok(routes) => observation.routes = Some(routes),
            Err(e) => {
                tracing::warn!(error = %e, "route list unavailable");
                observation.errors.push(e);
            }
        }

        match self.fetch_consumers().await {
            Ok(consumers) => observation.consumers = Some(consumers),
            Err(e) => {
                tracing::warn!(error = %e, "consumer list unavailable");
                observation.errors.push(e);
            }
        }

        for provider in &desired.providers {
            let route = observation
                .routes
                .as_ref()
                .and_then(|routes| routes.iter().find(|r| r.id == provider.route_id));
            let Some(request) = probe_request(provider, route) else {
                tracing::debug!(provider = %provider.name, "no probe configured");
                continue;
            };

            match self.probe_endpoint(&provider.route_id, &request).await {
                Ok(response) => {
                    tracing::debug!(
                        route = %provider.route_id,
                        status = response.status,
                        latency_ms = response.latency_ms,
                        "probe answered"
                    );
                    observation.probes.push(ProbeRecord {
                        route_id: provider.route_id.clone(),
                        provider: provider.name.clone(),
                        request,
                        response,
                    });
                }
                Err(e) => observation.errors.push(e),
            }
        }

        observation.topology = self.observe_topology(desired, &mut observation.errors).await;
        observation
    }

    async fn observe_topology(
        &self,
        desired: &DesiredState,
        errors: &mut Vec<ObserverError>,
    ) -> NetworkTopology {
        let mut topology = NetworkTopology {
            shared_network: desired.shared_network.clone(),
            ..Default::default()
        };
        if desired.paths.is_empty() {
            return topology;
        }

        topology.attached = match self.runtime.network_members(&desired.shared_network).await {
            Ok(members) => Some(members),
            Err(e) => {
                errors.push(runtime_error(format!("network {}", desired.shared_network), e));
                None
            }
        };

        let mut running = BTreeMap::new();
        for service in desired.path_services() {
            match self.runtime.is_running(&service).await {
                Ok(is_running) => {
                    running.insert(service, is_running);
                }
                Err(e) => errors.push(runtime_error(format!("service {}", service), e)),
            }
        }
        topology.running = running;

        for path in &desired.paths {
            let reachability = self.test_network_path(path).await;
            topology.paths.push(PathResult {
                path: path.clone(),
                reachability,
            });
        }

        topology
    }
}

fn runtime_error(resource: String, err: crate::utils::RuntimeError) -> ObserverError {
    ObserverError {
        resource,
        attempts: 1,
        reason: err.to_string(),
    }
}

/// Build the synthetic request for a provider, if there is anything to send
pub fn probe_request(provider: &ProviderSpec, route: Option<&GatewayRoute>) -> Option<ProbeRequest> {
    let probe = provider.probe.as_ref()?;
    let path = match &probe.path {
        Some(path) => path.clone(),
        None => {
            let uri = route?.uri.trim_end_matches('*');
            if uri.is_empty() {
                return None;
            }
            uri.to_string()
        }
    };

    Some(ProbeRequest {
        method: probe.method.clone(),
        path,
        headers: probe.headers.clone(),
        body: probe.payload.clone(),
    })
}
