use serde_json::Value;
use std::collections::HashSet;

use super::signatures::{ErrorSignature, SignatureMatch};
use super::types::{Evidence, Issue, IssueCategory, IssueResource};
use crate::admin::{Consumer, GatewayRoute};
use crate::app::DesiredState;
use crate::constants::{AUTHORIZATION_HEADER, CONSUMER_AUTH_PLUGIN, KEY_AUTH_DEFAULT_HEADER};
use crate::network::{NetworkTopology, PathResult, Reachability};
use crate::observer::{Observation, ProbeRecord};

const BODY_EXCERPT_CHARS: usize = 200;

/// Two auth plugins on one route reading the same credential header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConflict {
    pub consumer_plugin: String,
    pub provider_plugin: String,
    pub header: String,
}

/// How a probe response reads
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeVerdict {
    Healthy,
    AuthFormat(SignatureMatch),
    Ambiguous,
}

/// Turn one observation into an ordered issue list.
///
/// Pure: the same observation and desired state always give the same list.
/// Issues are ordered by severity, then by the order they were found in.
pub fn classify(observation: &Observation, desired: &DesiredState) -> Vec<Issue> {
    let mut issues = Vec::new();

    if let Some(routes) = &observation.routes {
        let mut seen = HashSet::new();
        for route in routes {
            if !seen.insert(route.id.as_str()) {
                continue;
            }
            issues.extend(route_issues(route, desired));
        }
    }

    for record in &observation.probes {
        if let Some(issue) = probe_issue(record) {
            fold_probe_issue(&mut issues, issue);
        }
    }

    if let Some(consumers) = &observation.consumers {
        issues.extend(consumer_issues(consumers, desired));
    }

    issues.extend(network_issues(&observation.topology));

    // Stable: equal severities keep discovery order
    issues.sort_by(|a, b| b.severity.cmp(&a.severity));
    issues
}

fn route_issues(route: &GatewayRoute, desired: &DesiredState) -> Vec<Issue> {
    let mut issues = Vec::new();
    let resource = IssueResource::Route {
        id: route.id.clone(),
    };

    if let Some(conflict) = find_auth_conflict(route, &desired.provider_auth_plugins) {
        issues.push(Issue::new(
            IssueCategory::AuthConflict,
            resource.clone(),
            format!(
                "`{}` and `{}` both validate the {} header",
                conflict.consumer_plugin, conflict.provider_plugin, conflict.header
            ),
            Evidence::PluginConflict {
                consumer_plugin: conflict.consumer_plugin,
                provider_plugin: conflict.provider_plugin,
                header: conflict.header,
            },
        ));
    }

    if let Some((expected, actual)) = ssl_mismatch(route, desired) {
        issues.push(Issue::new(
            IssueCategory::SslMismatch,
            resource,
            format!("upstream TLS verify is {}, expected {}", actual, expected),
            Evidence::SslFlag { expected, actual },
        ));
    }

    issues
}

/// The header `key-auth` reads its credential from
fn consumer_auth_header(config: &Value) -> String {
    config
        .get("header")
        .and_then(Value::as_str)
        .unwrap_or(KEY_AUTH_DEFAULT_HEADER)
        .to_string()
}

/// Headers a provider-auth plugin authenticates with
fn provider_auth_headers(config: &Value) -> Vec<String> {
    match config.pointer("/auth/header").and_then(Value::as_object) {
        Some(headers) if !headers.is_empty() => headers.keys().cloned().collect(),
        _ => vec![AUTHORIZATION_HEADER.to_string()],
    }
}

pub fn find_auth_conflict(route: &GatewayRoute, provider_plugins: &[String]) -> Option<AuthConflict> {
    let consumer_cfg = route.plugin(CONSUMER_AUTH_PLUGIN)?;
    let header = consumer_auth_header(consumer_cfg);

    provider_plugins.iter().find_map(|name| {
        let cfg = route.plugin(name)?;
        provider_auth_headers(cfg)
            .into_iter()
            .find(|h| h.eq_ignore_ascii_case(&header))
            .map(|_| AuthConflict {
                consumer_plugin: CONSUMER_AUTH_PLUGIN.to_string(),
                provider_plugin: name.clone(),
                header: header.clone(),
            })
    })
}

/// `(expected, actual)` when a secure upstream's TLS verification is off-policy
pub fn ssl_mismatch(route: &GatewayRoute, desired: &DesiredState) -> Option<(bool, bool)> {
    if !route.is_secure_upstream() {
        return None;
    }
    let expected = desired.expected_ssl_verify(&route.id)?;
    let actual = route.ssl_verify();
    (expected != actual).then_some((expected, actual))
}

pub fn probe_verdict(status: u16, body: &str) -> ProbeVerdict {
    match status {
        403 => match ErrorSignature::detect(body) {
            Some(found) => ProbeVerdict::AuthFormat(found),
            None => ProbeVerdict::Ambiguous,
        },
        500 => ProbeVerdict::Ambiguous,
        _ => ProbeVerdict::Healthy,
    }
}

fn probe_issue(record: &ProbeRecord) -> Option<Issue> {
    let response = &record.response;
    let resource = IssueResource::Route {
        id: record.route_id.clone(),
    };
    let excerpt: String = response.body.chars().take(BODY_EXCERPT_CHARS).collect();

    match probe_verdict(response.status, &response.body) {
        ProbeVerdict::Healthy => None,
        ProbeVerdict::AuthFormat(found) => Some(Issue::new(
            IssueCategory::AuthFormatIssue,
            resource,
            format!(
                "{} probe got HTTP {} with provider error \"{}\"",
                record.provider, response.status, found.literal
            ),
            Evidence::ProbeFailure {
                request: record.request.clone(),
                status: response.status,
                signature: Some(found),
                body_excerpt: excerpt,
            },
        )),
        ProbeVerdict::Ambiguous => Some(Issue::new(
            IssueCategory::ClassificationAmbiguous,
            resource,
            format!(
                "{} probe got HTTP {} matching no known signature; needs manual review",
                record.provider, response.status
            ),
            Evidence::ProbeFailure {
                request: record.request.clone(),
                status: response.status,
                signature: None,
                body_excerpt: excerpt,
            },
        )),
    }
}

/// An auth-format issue specializes the structural conflict on the same
/// route: it takes the conflict's place instead of being reported twice
fn fold_probe_issue(issues: &mut Vec<Issue>, issue: Issue) {
    if issue.category == IssueCategory::AuthFormatIssue {
        if let Some(existing) = issues.iter_mut().find(|i| {
            i.category == IssueCategory::AuthConflict && i.resource == issue.resource
        }) {
            *existing = issue;
            return;
        }
    }
    issues.push(issue);
}

fn consumer_issues(consumers: &[Consumer], desired: &DesiredState) -> Vec<Issue> {
    desired
        .consumers
        .iter()
        .filter_map(|username| {
            let resource = IssueResource::Consumer {
                username: username.clone(),
            };
            match consumers.iter().find(|c| &c.username == username) {
                None => Some(Issue::new(
                    IssueCategory::MissingConsumer,
                    resource,
                    format!("consumer `{}` is not registered", username),
                    Evidence::ConsumerAbsent,
                )),
                Some(c) if c.credential() != Some(desired.shared_secret.as_str()) => Some(Issue::new(
                    IssueCategory::CredentialDrift,
                    resource,
                    format!("consumer `{}` does not hold the canonical secret", username),
                    Evidence::CredentialMismatch,
                )),
                Some(_) => None,
            }
        })
        .collect()
}

fn network_issues(topology: &NetworkTopology) -> Vec<Issue> {
    topology
        .paths
        .iter()
        .filter_map(|result| partition_issue(topology, result))
        .collect()
}

fn partition_issue(topology: &NetworkTopology, result: &PathResult) -> Option<Issue> {
    let Reachability::Unreachable { detail } = &result.reachability else {
        return None;
    };
    let path = &result.path;
    let services = [&path.from, &path.to];

    let detached: Vec<String> = services
        .iter()
        .filter(|s| topology.is_attached(s) == Some(false))
        .map(|s| s.to_string())
        .collect();
    let stopped: Vec<String> = services
        .iter()
        .filter(|s| topology.is_running(s) == Some(false))
        .map(|s| s.to_string())
        .collect();

    let mut summary = format!("{} is unreachable", path);
    if !stopped.is_empty() {
        summary.push_str(&format!("; not running: {}", stopped.join(", ")));
    }
    if !detached.is_empty() {
        summary.push_str(&format!(
            "; not on {}: {}",
            topology.shared_network,
            detached.join(", ")
        ));
    }

    Some(Issue::new(
        IssueCategory::NetworkPartition,
        IssueResource::ServicePair {
            from: path.from.clone(),
            to: path.to.clone(),
            port: path.port,
        },
        summary,
        Evidence::PathUnreachable {
            path: path.clone(),
            detail: detail.clone(),
            detached,
            stopped,
        },
    ))
}
