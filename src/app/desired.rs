use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::config::{Config, ProviderConfig};
use crate::network::ServicePath;

/// The configuration the live gateway must converge to.
///
/// Built once per run and only ever borrowed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesiredState {
    pub shared_secret: String,
    pub ssl_verify_default: Option<bool>,
    pub providers: Vec<ProviderSpec>,
    pub consumers: Vec<String>,
    pub shared_network: String,
    pub paths: Vec<ServicePath>,
    /// Plugins that authenticate natively against a provider
    pub provider_auth_plugins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSpec {
    pub name: String,
    pub route_id: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub ssl_verify: Option<bool>,
    pub probe: Option<ProbeSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeSpec {
    pub method: String,
    pub path: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub payload: Value,
}

impl DesiredState {
    /// Resolve the desired state from configuration, reading token variables
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// Same as `from_config` with an explicit variable lookup
    pub fn resolve(config: &Config, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let desired = &config.desired;

        let mut seen = BTreeSet::new();
        for provider in &desired.providers {
            if !seen.insert(provider.route_id.as_str()) {
                anyhow::bail!(
                    "route `{}` is claimed by more than one provider",
                    provider.route_id
                );
            }
        }
        if !desired.consumers.is_empty() && desired.shared_secret.is_empty() {
            anyhow::bail!("desired.shared_secret must be set when consumers are required");
        }

        let providers = desired
            .providers
            .iter()
            .map(|p| provider_spec(p, &lookup))
            .collect();

        Ok(Self {
            shared_secret: desired.shared_secret.clone(),
            ssl_verify_default: desired.ssl_verify_default,
            providers,
            consumers: desired.consumers.clone(),
            shared_network: desired.network.shared_network.clone(),
            paths: desired.network.paths.clone(),
            provider_auth_plugins: config.gateway.provider_auth_plugins.clone(),
        })
    }

    pub fn provider_for_route(&self, route_id: &str) -> Option<&ProviderSpec> {
        self.providers.iter().find(|p| p.route_id == route_id)
    }

    /// Expected TLS verification for a route, if anything is expected at all
    pub fn expected_ssl_verify(&self, route_id: &str) -> Option<bool> {
        self.provider_for_route(route_id)
            .and_then(|p| p.ssl_verify)
            .or(self.ssl_verify_default)
    }

    /// Services whose state the network checks depend on, in first-seen order
    pub fn path_services(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut services = Vec::new();
        for path in &self.paths {
            for svc in [&path.from, &path.to] {
                if seen.insert(svc.clone()) {
                    services.push(svc.clone());
                }
            }
        }
        services
    }
}

fn provider_spec(config: &ProviderConfig, lookup: &impl Fn(&str) -> Option<String>) -> ProviderSpec {
    let token = config.token.clone().or_else(|| {
        let var = config.token_env.as_deref()?;
        let value = lookup(var);
        if value.is_none() {
            tracing::warn!(provider = %config.name, variable = var, "token variable is not set");
        }
        value
    });

    ProviderSpec {
        name: config.name.clone(),
        route_id: config.route_id.clone(),
        base_url: config.base_url.clone(),
        token,
        ssl_verify: config.ssl_verify,
        probe: config.probe.as_ref().map(|p| ProbeSpec {
            method: p.method.clone(),
            path: p.path.clone(),
            headers: p.headers.clone(),
            payload: p.payload.clone(),
        }),
    }
}
