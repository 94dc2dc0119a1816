use super::transforms::{canonical_consumer, replace_consumer_auth, set_ssl_verify};
use super::types::{FixOutcome, FixScope, LedgerEntry, RemediationLedger};
use crate::admin::{AdminApi, GatewayRoute};
use crate::app::DesiredState;
use crate::diagnosis::{Evidence, Issue, IssueCategory, IssueResource};
use crate::network::ContainerRuntime;
use crate::utils::DoctorError;
use crate::verify::TrackedIssue;

/// Applies the minimal fix for each classified issue.
///
/// Every fix re-reads the resource it touches, computes the target
/// definition and writes it back whole. Write errors are reported, never
/// retried.
pub struct RemediationEngine<'a> {
    admin: &'a dyn AdminApi,
    runtime: &'a dyn ContainerRuntime,
    desired: &'a DesiredState,
}

impl<'a> RemediationEngine<'a> {
    pub fn new(
        admin: &'a dyn AdminApi,
        runtime: &'a dyn ContainerRuntime,
        desired: &'a DesiredState,
    ) -> Self {
        Self {
            admin,
            runtime,
            desired,
        }
    }

    /// Fix every in-scope issue and move it on to verification; one failure
    /// never stops the others
    pub async fn apply(
        &self,
        tracked: &mut [TrackedIssue],
        scope: FixScope,
    ) -> Result<RemediationLedger, DoctorError> {
        let mut ledger = RemediationLedger::default();
        for (index, entry) in tracked.iter_mut().enumerate() {
            if !scope.includes(entry.issue.category) {
                continue;
            }
            entry.begin_remediation()?;
            let recorded = self.fix_entry(index, &entry.issue).await;
            entry.record_fix(recorded.outcome.clone())?;
            ledger.record(recorded);
        }
        Ok(ledger)
    }

    /// Run one fix and describe it as a ledger entry
    async fn fix_entry(&self, index: usize, issue: &Issue) -> LedgerEntry {
        let (outcome, changes) = self.fix(issue).await;
        match &outcome {
            FixOutcome::Applied { changed } => {
                tracing::info!(resource = %issue.resource, category = issue.category.label(), changed, "fix applied")
            }
            FixOutcome::Failed { reason, unrecoverable } => {
                tracing::warn!(resource = %issue.resource, category = issue.category.label(), unrecoverable, %reason, "fix failed")
            }
        }

        LedgerEntry {
            issue_index: index,
            category: issue.category,
            severity: issue.severity,
            resource: issue.resource.clone(),
            action: issue.action,
            outcome,
            changes,
        }
    }

    pub async fn fix(&self, issue: &Issue) -> (FixOutcome, Vec<String>) {
        match (issue.category, &issue.resource) {
            (IssueCategory::AuthConflict | IssueCategory::AuthFormatIssue, IssueResource::Route { id }) => {
                self.fix_route_auth(id, &issue.evidence).await
            }
            (IssueCategory::SslMismatch, IssueResource::Route { id }) => self.fix_ssl(id).await,
            (
                IssueCategory::MissingConsumer | IssueCategory::CredentialDrift,
                IssueResource::Consumer { username },
            ) => self.fix_consumer(username).await,
            (IssueCategory::NetworkPartition, IssueResource::ServicePair { from, to, .. }) => {
                self.fix_network(from, to).await
            }
            (IssueCategory::ClassificationAmbiguous, _) => (
                FixOutcome::failed("ambiguous failure needs manual review"),
                Vec::new(),
            ),
            (category, resource) => (
                FixOutcome::failed(format!(
                    "{} cannot be fixed on {}",
                    category.label(),
                    resource
                )),
                Vec::new(),
            ),
        }
    }

    async fn fix_route_auth(&self, route_id: &str, evidence: &Evidence) -> (FixOutcome, Vec<String>) {
        let Some(provider) = self.desired.provider_for_route(route_id) else {
            return (
                FixOutcome::failed(format!("no provider is configured for route {}", route_id)),
                Vec::new(),
            );
        };
        let Some(token) = provider.token.as_deref() else {
            return (
                FixOutcome::failed(format!("provider {} has no bearer token", provider.name)),
                Vec::new(),
            );
        };

        let current = match self.current_route(route_id).await {
            Ok(route) => route,
            Err(outcome) => return (outcome, Vec::new()),
        };

        let plugin = match evidence {
            Evidence::PluginConflict { provider_plugin, .. } => provider_plugin.clone(),
            _ => self.provider_plugin_for(&current),
        };
        let target = replace_consumer_auth(
            &current,
            &plugin,
            &provider.name,
            Some(provider.base_url.as_str()),
            token,
        );
        let change = format!(
            "route {}: removed consumer credential plugin, {} carries the provider token",
            route_id, plugin
        );
        self.write_route(&current, &target, change).await
    }

    /// The provider-auth plugin already on the route, else the first configured
    fn provider_plugin_for(&self, route: &GatewayRoute) -> String {
        let plugins = &self.desired.provider_auth_plugins;
        plugins
            .iter()
            .find(|p| route.plugins.contains_key(p.as_str()))
            .or_else(|| plugins.first())
            .cloned()
            .unwrap_or_else(|| crate::constants::PROVIDER_AUTH_PLUGIN.to_string())
    }

    async fn fix_ssl(&self, route_id: &str) -> (FixOutcome, Vec<String>) {
        let Some(expected) = self.desired.expected_ssl_verify(route_id) else {
            return (
                FixOutcome::failed(format!("no TLS verification policy for route {}", route_id)),
                Vec::new(),
            );
        };
        let current = match self.current_route(route_id).await {
            Ok(route) => route,
            Err(outcome) => return (outcome, Vec::new()),
        };
        let Some(target) = set_ssl_verify(&current, expected) else {
            return (
                FixOutcome::failed(format!("route {} has no inline upstream", route_id)),
                Vec::new(),
            );
        };

        let change = format!("route {}: upstream tls.verify = {}", route_id, expected);
        self.write_route(&current, &target, change).await
    }

    async fn current_route(&self, route_id: &str) -> Result<GatewayRoute, FixOutcome> {
        match self.admin.get_route(route_id).await {
            Ok(Some(route)) => Ok(route),
            Ok(None) => Err(FixOutcome::failed(format!("route {} no longer exists", route_id))),
            Err(e) => Err(FixOutcome::failed(format!("could not read route {}: {}", route_id, e))),
        }
    }

    async fn write_route(
        &self,
        current: &GatewayRoute,
        target: &GatewayRoute,
        change: String,
    ) -> (FixOutcome, Vec<String>) {
        if current.canonical_bytes() == target.canonical_bytes() {
            return (FixOutcome::Applied { changed: false }, Vec::new());
        }
        match self.admin.put_route(target).await {
            Ok(()) => (FixOutcome::Applied { changed: true }, vec![change]),
            Err(e) => (
                FixOutcome::failed(format!("PUT route {} rejected: {}", target.id, e)),
                Vec::new(),
            ),
        }
    }

    async fn fix_consumer(&self, username: &str) -> (FixOutcome, Vec<String>) {
        let consumers = match self.admin.list_consumers().await {
            Ok(consumers) => consumers,
            Err(e) => return (FixOutcome::failed(format!("could not read consumers: {}", e)), Vec::new()),
        };
        let existing = consumers.iter().find(|c| c.username == username);
        let target = canonical_consumer(existing, username, &self.desired.shared_secret);

        if existing.map(|c| c.canonical_bytes()) == Some(target.canonical_bytes()) {
            return (FixOutcome::Applied { changed: false }, Vec::new());
        }
        match self.admin.put_consumer(&target).await {
            Ok(()) => {
                let verb = if existing.is_some() { "reset" } else { "created" };
                (
                    FixOutcome::Applied { changed: true },
                    vec![format!("consumer {}: {} with canonical secret", username, verb)],
                )
            }
            Err(e) => (
                FixOutcome::failed(format!("PUT consumer {} rejected: {}", username, e)),
                Vec::new(),
            ),
        }
    }

    async fn fix_network(&self, from: &str, to: &str) -> (FixOutcome, Vec<String>) {
        let network = &self.desired.shared_network;

        for service in [from, to] {
            match self.runtime.is_running(service).await {
                Ok(true) => {}
                Ok(false) => {
                    return (
                        FixOutcome::unrecoverable(format!(
                            "service {} is not running; it needs a redeploy",
                            service
                        )),
                        Vec::new(),
                    )
                }
                Err(e) => {
                    return (
                        FixOutcome::failed(format!("could not inspect {}: {}", service, e)),
                        Vec::new(),
                    )
                }
            }
        }

        let members = match self.runtime.network_members(network).await {
            Ok(members) => members,
            Err(e) => {
                return (
                    FixOutcome::failed(format!("could not inspect network {}: {}", network, e)),
                    Vec::new(),
                )
            }
        };

        let mut changes = Vec::new();
        for service in [from, to] {
            if members.contains(service) {
                continue;
            }
            if let Err(e) = self.runtime.connect_network(network, service).await {
                return (
                    FixOutcome::failed(format!("connecting {} to {} failed: {}", service, network, e)),
                    changes,
                );
            }
            changes.push(format!("service {}: connected to {}", service, network));
        }

        (
            FixOutcome::Applied {
                changed: !changes.is_empty(),
            },
            changes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::Consumer;
    use crate::diagnosis::classify;
    use crate::network::MockContainerRuntime;
    use crate::observer::Observation;
    use crate::testing::{conflicting_route, desired_fixture, FakeGateway, FakeNetwork};
    use crate::utils::RuntimeError;
    use crate::verify::IssueState;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn issues_for(gw: &FakeGateway, desired: &DesiredState) -> Vec<TrackedIssue> {
        let observation = Observation {
            routes: Some(gw.routes()),
            consumers: Some(gw.consumers()),
            ..Default::default()
        };
        classify(&observation, desired)
            .into_iter()
            .map(TrackedIssue::new)
            .collect()
    }

    #[tokio::test]
    async fn test_fixes_are_idempotent_byte_for_byte() {
        let gw = FakeGateway::default();
        gw.insert_route(conflicting_route("openai-chat"));
        let net = FakeNetwork::healthy(&[]);
        let desired = desired_fixture();
        let engine = RemediationEngine::new(&gw, &net, &desired);

        let mut issues = issues_for(&gw, &desired);
        assert_eq!(issues.len(), 2);
        let mut again = issues.clone();

        let first = engine.apply(&mut issues, FixScope::All).await.unwrap();
        assert_eq!(first.applied(), 2);
        assert!(issues.iter().all(|t| t.state() == &IssueState::Verifying));
        let after_once = gw.state_bytes();

        let second = engine.apply(&mut again, FixScope::All).await.unwrap();
        assert_eq!(gw.state_bytes(), after_once);
        assert!(second
            .entries
            .iter()
            .all(|e| e.outcome == FixOutcome::Applied { changed: false }));
    }

    #[tokio::test]
    async fn test_missing_consumer_is_created_with_canonical_secret() {
        let gw = FakeGateway::default();
        let net = FakeNetwork::healthy(&[]);
        let desired = desired_fixture();
        let engine = RemediationEngine::new(&gw, &net, &desired);

        let mut issues = issues_for(&gw, &desired);
        let ledger = engine.apply(&mut issues, FixScope::ApiKeys).await.unwrap();

        assert_eq!(ledger.applied(), 1);
        let consumers = gw.consumers();
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].username, "gateway-api");
        assert_eq!(consumers[0].credential(), Some("team-secret"));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let gw = FakeGateway::default();
        gw.insert_route(conflicting_route("openai-chat"));
        gw.insert_route(conflicting_route("unmanaged"));
        gw.reject_route_puts("openai-chat");
        gw.insert_consumer(Consumer::with_key("gateway-api", "stale"));
        let net = FakeNetwork::healthy(&[]);
        let desired = desired_fixture();
        let engine = RemediationEngine::new(&gw, &net, &desired);

        let mut issues = issues_for(&gw, &desired);
        let ledger = engine.apply(&mut issues, FixScope::All).await.unwrap();

        // openai-chat rejected, unmanaged has no provider token, consumer reset
        assert_eq!(ledger.entries.len(), 3);
        assert_eq!(ledger.applied(), 1);
        assert_eq!(gw.consumers()[0].credential(), Some("team-secret"));
        assert!(!ledger.has_blocking_failure());
    }

    #[tokio::test]
    async fn test_scope_filters_categories() {
        let gw = FakeGateway::default();
        gw.insert_route(conflicting_route("openai-chat"));
        let net = FakeNetwork::healthy(&[]);
        let desired = desired_fixture();
        let engine = RemediationEngine::new(&gw, &net, &desired);

        let mut issues = issues_for(&gw, &desired);
        let ledger = engine.apply(&mut issues, FixScope::Ssl).await.unwrap();
        assert!(ledger.entries.is_empty());
        assert!(issues.iter().all(|t| t.state() == &IssueState::Detected));
        assert!(gw.routes()[0].plugin("key-auth").is_some());
    }

    #[tokio::test]
    async fn test_network_fix_reconnects_detached_service() {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_is_running().times(2).returning(|_| Ok(true));
        runtime
            .expect_network_members()
            .returning(|_| Ok(BTreeSet::from(["apisix".to_string()])));
        runtime
            .expect_connect_network()
            .withf(|network, service| network == "gateway-net" && service == "backend")
            .times(1)
            .returning(|_, _| Ok(()));

        let gw = FakeGateway::default();
        let desired = desired_fixture();
        let engine = RemediationEngine::new(&gw, &runtime, &desired);

        let (outcome, changes) = engine.fix_network("apisix", "backend").await;
        assert_eq!(outcome, FixOutcome::Applied { changed: true });
        assert_eq!(changes, vec!["service backend: connected to gateway-net".to_string()]);
    }

    #[tokio::test]
    async fn test_stopped_service_is_unrecoverable() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_is_running()
            .returning(|service| Ok(service != "backend"));
        runtime.expect_connect_network().never();

        let gw = FakeGateway::default();
        let desired = desired_fixture();
        let engine = RemediationEngine::new(&gw, &runtime, &desired);

        let (outcome, _) = engine.fix_network("apisix", "backend").await;
        match outcome {
            FixOutcome::Failed { unrecoverable, reason } => {
                assert!(unrecoverable);
                assert!(reason.contains("backend"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_error_is_reported_not_retried() {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_is_running().returning(|_| Ok(true));
        runtime
            .expect_network_members()
            .returning(|_| Ok(BTreeSet::new()));
        runtime.expect_connect_network().times(1).returning(|_, svc| {
            Err(RuntimeError::CommandFailed {
                command: format!("docker network connect gateway-net {}", svc),
                stderr: "permission denied".into(),
            })
        });

        let gw = FakeGateway::default();
        let desired = desired_fixture();
        let engine = RemediationEngine::new(&gw, &runtime, &desired);

        let (outcome, _) = engine.fix_network("apisix", "backend").await;
        assert!(matches!(outcome, FixOutcome::Failed { unrecoverable: false, .. }));
    }
}
