use serde::Serialize;
use std::fmt;

use super::signatures::SignatureMatch;
use crate::network::ServicePath;
use crate::observer::ProbeRequest;

/// Declaration order is severity order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    AuthConflict,
    AuthFormatIssue,
    SslMismatch,
    MissingConsumer,
    CredentialDrift,
    NetworkPartition,
    ClassificationAmbiguous,
}

impl IssueCategory {
    pub fn severity(&self) -> Severity {
        match self {
            IssueCategory::NetworkPartition => Severity::Critical,
            IssueCategory::AuthConflict
            | IssueCategory::AuthFormatIssue
            | IssueCategory::MissingConsumer
            | IssueCategory::CredentialDrift
            | IssueCategory::ClassificationAmbiguous => Severity::High,
            IssueCategory::SslMismatch => Severity::Medium,
        }
    }

    pub fn action(&self) -> RemediationAction {
        match self {
            IssueCategory::AuthConflict | IssueCategory::AuthFormatIssue => {
                RemediationAction::ReplaceConsumerAuth
            }
            IssueCategory::SslMismatch => RemediationAction::SetUpstreamSslVerify,
            IssueCategory::MissingConsumer => RemediationAction::CreateConsumer,
            IssueCategory::CredentialDrift => RemediationAction::ResetConsumerCredential,
            IssueCategory::NetworkPartition => RemediationAction::ReconnectSharedNetwork,
            IssueCategory::ClassificationAmbiguous => RemediationAction::ManualReview,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IssueCategory::AuthConflict => "AuthConflict",
            IssueCategory::AuthFormatIssue => "AuthFormatIssue",
            IssueCategory::SslMismatch => "SslMismatch",
            IssueCategory::MissingConsumer => "MissingConsumer",
            IssueCategory::CredentialDrift => "CredentialDrift",
            IssueCategory::NetworkPartition => "NetworkPartition",
            IssueCategory::ClassificationAmbiguous => "ClassificationAmbiguous",
        }
    }
}

/// Identifier of the fix an issue calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemediationAction {
    ReplaceConsumerAuth,
    SetUpstreamSslVerify,
    CreateConsumer,
    ResetConsumerCredential,
    ReconnectSharedNetwork,
    ManualReview,
}

/// What an issue is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueResource {
    Route { id: String },
    Consumer { username: String },
    ServicePair { from: String, to: String, port: u16 },
}

impl fmt::Display for IssueResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueResource::Route { id } => write!(f, "route {}", id),
            IssueResource::Consumer { username } => write!(f, "consumer {}", username),
            IssueResource::ServicePair { from, to, port } => {
                write!(f, "path {} -> {}:{}", from, to, port)
            }
        }
    }
}

/// The observation that produced an issue, kept so it can be re-checked
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    PluginConflict {
        consumer_plugin: String,
        provider_plugin: String,
        header: String,
    },
    ProbeFailure {
        request: ProbeRequest,
        status: u16,
        signature: Option<SignatureMatch>,
        body_excerpt: String,
    },
    SslFlag {
        expected: bool,
        actual: bool,
    },
    ConsumerAbsent,
    CredentialMismatch,
    PathUnreachable {
        path: ServicePath,
        detail: String,
        detached: Vec<String>,
        stopped: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub resource: IssueResource,
    pub detail: String,
    pub action: RemediationAction,
    pub evidence: Evidence,
}

impl Issue {
    pub fn new(
        category: IssueCategory,
        resource: IssueResource,
        detail: impl Into<String>,
        evidence: Evidence,
    ) -> Self {
        Self {
            category,
            severity: category.severity(),
            resource,
            detail: detail.into(),
            action: category.action(),
            evidence,
        }
    }

    pub fn route_id(&self) -> Option<&str> {
        match &self.resource {
            IssueResource::Route { id } => Some(id),
            _ => None,
        }
    }

    /// Severity at or above `high` counts against the run's exit status
    pub fn is_blocking_severity(&self) -> bool {
        self.severity >= Severity::High
    }
}
