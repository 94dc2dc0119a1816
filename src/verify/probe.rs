use super::tracker::{CheckResult, IssueState, TrackedIssue};
use crate::app::DesiredState;
use crate::diagnosis::{
    find_auth_conflict, probe_verdict, ssl_mismatch, ErrorSignature, Evidence, Issue,
    IssueCategory, IssueResource, ProbeVerdict,
};
use crate::network::{Reachability, ServicePath};
use crate::observer::StateObserver;
use crate::utils::DoctorError;

/// Re-runs the check that produced each issue against fresh state
pub struct VerificationProbe<'a> {
    observer: &'a StateObserver<'a>,
    desired: &'a DesiredState,
}

impl<'a> VerificationProbe<'a> {
    pub fn new(observer: &'a StateObserver<'a>, desired: &'a DesiredState) -> Self {
        Self { observer, desired }
    }

    /// Conclude every issue waiting in `Verifying`; all others are left as they are
    pub async fn verify(&self, tracked: &mut [TrackedIssue]) -> Result<(), DoctorError> {
        for entry in tracked.iter_mut() {
            if entry.state() != &IssueState::Verifying {
                continue;
            }
            let result = self.recheck(&entry.issue).await;
            match &result {
                CheckResult::Cleared { evidence } => {
                    tracing::info!(resource = %entry.issue.resource, %evidence, "issue resolved")
                }
                CheckResult::Persisting { detail } => {
                    tracing::warn!(resource = %entry.issue.resource, %detail, "issue still failing")
                }
            }
            entry.conclude(result)?;
        }
        Ok(())
    }

    /// Cleared only when a fresh read shows the triggering condition is gone
    pub async fn recheck(&self, issue: &Issue) -> CheckResult {
        match (issue.category, &issue.resource) {
            (IssueCategory::AuthConflict, IssueResource::Route { id }) => self.recheck_conflict(id).await,
            (IssueCategory::AuthFormatIssue, IssueResource::Route { id }) => {
                self.recheck_probe(id, &issue.evidence).await
            }
            (IssueCategory::SslMismatch, IssueResource::Route { id }) => self.recheck_ssl(id).await,
            (
                IssueCategory::MissingConsumer | IssueCategory::CredentialDrift,
                IssueResource::Consumer { username },
            ) => self.recheck_consumer(username).await,
            (IssueCategory::NetworkPartition, IssueResource::ServicePair { from, to, port }) => {
                let path = ServicePath {
                    from: from.clone(),
                    to: to.clone(),
                    port: *port,
                };
                match self.observer.test_network_path(&path).await {
                    Reachability::Reachable => cleared(format!("{} is reachable", path)),
                    Reachability::Unreachable { detail } => persisting(detail),
                }
            }
            (category, resource) => persisting(format!(
                "{} on {} has no automatic re-check; needs manual review",
                category.label(),
                resource
            )),
        }
    }

    async fn recheck_conflict(&self, route_id: &str) -> CheckResult {
        match self.observer.fetch_route(route_id).await {
            Ok(Some(route)) => match find_auth_conflict(&route, &self.desired.provider_auth_plugins) {
                None => cleared(format!("route {} has a single auth plugin per header", route_id)),
                Some(conflict) => persisting(format!(
                    "`{}` and `{}` still both read {}",
                    conflict.consumer_plugin, conflict.provider_plugin, conflict.header
                )),
            },
            Ok(None) => persisting(format!("route {} disappeared before it could be re-checked", route_id)),
            Err(e) => persisting(e.to_string()),
        }
    }

    /// Replay the original probe; a 403 or a known provider error means it still fails
    async fn recheck_probe(&self, route_id: &str, evidence: &Evidence) -> CheckResult {
        let Evidence::ProbeFailure { request, .. } = evidence else {
            return persisting(format!("no recorded probe for route {}", route_id));
        };
        let response = match self.observer.probe_endpoint(route_id, request).await {
            Ok(response) => response,
            Err(e) => return persisting(e.to_string()),
        };

        if let Some(found) = ErrorSignature::detect(&response.body) {
            return persisting(format!(
                "re-probe got HTTP {} with provider error \"{}\"",
                response.status, found.literal
            ));
        }
        match probe_verdict(response.status, &response.body) {
            ProbeVerdict::Healthy => cleared(format!(
                "re-probe of {} {} returned HTTP {}",
                request.method, request.path, response.status
            )),
            _ => persisting(format!("re-probe returned HTTP {}", response.status)),
        }
    }

    async fn recheck_ssl(&self, route_id: &str) -> CheckResult {
        match self.observer.fetch_route(route_id).await {
            Ok(Some(route)) => match ssl_mismatch(&route, self.desired) {
                None => cleared(format!("route {} upstream tls.verify = {}", route_id, route.ssl_verify())),
                Some((expected, actual)) => persisting(format!(
                    "upstream TLS verify is still {}, expected {}",
                    actual, expected
                )),
            },
            Ok(None) => persisting(format!("route {} disappeared before it could be re-checked", route_id)),
            Err(e) => persisting(e.to_string()),
        }
    }

    async fn recheck_consumer(&self, username: &str) -> CheckResult {
        let consumers = match self.observer.fetch_consumers().await {
            Ok(consumers) => consumers,
            Err(e) => return persisting(e.to_string()),
        };
        match consumers.iter().find(|c| c.username == username) {
            None => persisting(format!("consumer `{}` is still not registered", username)),
            Some(c) if c.credential() == Some(self.desired.shared_secret.as_str()) => {
                cleared(format!("consumer `{}` holds the canonical secret", username))
            }
            Some(_) => persisting(format!("consumer `{}` still holds a different secret", username)),
        }
    }
}

fn cleared(evidence: String) -> CheckResult {
    CheckResult::Cleared { evidence }
}

fn persisting(detail: String) -> CheckResult {
    CheckResult::Persisting { detail }
}
