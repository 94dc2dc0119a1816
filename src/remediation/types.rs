use serde::Serialize;

use crate::diagnosis::{IssueCategory, IssueResource, RemediationAction, Severity};

/// Which issue categories a fix run may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixScope {
    All,
    ApiKeys,
    Auth,
    Ssl,
    Network,
}

impl FixScope {
    pub fn includes(&self, category: IssueCategory) -> bool {
        use IssueCategory::*;
        match (self, category) {
            // Ambiguous failures need a human, whatever the scope
            (_, ClassificationAmbiguous) => false,
            (FixScope::All, _) => true,
            (FixScope::ApiKeys, MissingConsumer | CredentialDrift) => true,
            (FixScope::Auth, AuthConflict | AuthFormatIssue) => true,
            (FixScope::Ssl, SslMismatch) => true,
            (FixScope::Network, NetworkPartition) => true,
            _ => false,
        }
    }
}

/// Result of one fix call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FixOutcome {
    /// `changed` is false when the resource already had the target definition
    Applied { changed: bool },
    /// `unrecoverable` marks failures this engine can never fix (redeploy needed)
    Failed { reason: String, unrecoverable: bool },
}

impl FixOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        FixOutcome::Failed {
            reason: reason.into(),
            unrecoverable: false,
        }
    }

    pub fn unrecoverable(reason: impl Into<String>) -> Self {
        FixOutcome::Failed {
            reason: reason.into(),
            unrecoverable: true,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, FixOutcome::Applied { .. })
    }
}

/// One remediation attempt, as recorded for the run report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    /// Position of the issue in the classified list
    pub issue_index: usize,
    pub category: IssueCategory,
    pub severity: Severity,
    pub resource: IssueResource,
    pub action: RemediationAction,
    pub outcome: FixOutcome,
    /// Human-readable list of what was written
    pub changes: Vec<String>,
}

impl LedgerEntry {
    /// A failed fix on a critical issue fails the whole run
    pub fn is_blocking(&self) -> bool {
        !self.outcome.is_applied() && self.severity == Severity::Critical
    }
}

/// Everything a remediation pass did, aggregated by the caller
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RemediationLedger {
    pub entries: Vec<LedgerEntry>,
}

impl RemediationLedger {
    pub fn record(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    pub fn has_blocking_failure(&self) -> bool {
        self.entries.iter().any(LedgerEntry::is_blocking)
    }

    pub fn applied(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_applied()).count()
    }
}
