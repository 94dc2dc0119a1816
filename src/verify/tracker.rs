use serde::Serialize;

use crate::diagnosis::Issue;
use crate::remediation::FixOutcome;
use crate::utils::DoctorError;

/// Lifecycle of one issue within a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IssueState {
    Detected,
    Remediating,
    Verifying,
    /// The original check was re-run and no longer reproduces
    Resolved { evidence: String },
    StillFailing { detail: String },
}

impl IssueState {
    fn name(&self) -> &'static str {
        match self {
            IssueState::Detected => "detected",
            IssueState::Remediating => "remediating",
            IssueState::Verifying => "verifying",
            IssueState::Resolved { .. } => "resolved",
            IssueState::StillFailing { .. } => "still_failing",
        }
    }
}

/// Result of re-running the check that produced an issue
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    Cleared { evidence: String },
    Persisting { detail: String },
}

/// An issue plus where it is in `Detected -> Remediating -> Verifying -> done`.
///
/// The state is private; the only way to move it is through the transition
/// methods, which reject anything out of order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedIssue {
    pub issue: Issue,
    state: IssueState,
    pub fix: Option<FixOutcome>,
}

impl TrackedIssue {
    pub fn new(issue: Issue) -> Self {
        Self {
            issue,
            state: IssueState::Detected,
            fix: None,
        }
    }

    pub fn state(&self) -> &IssueState {
        &self.state
    }

    pub fn begin_remediation(&mut self) -> Result<(), DoctorError> {
        self.transition(IssueState::Detected, IssueState::Remediating)
    }

    /// Store the fix outcome and hand the issue to verification.
    ///
    /// A failed fix is verified too: only a fresh check decides the result.
    pub fn record_fix(&mut self, outcome: FixOutcome) -> Result<(), DoctorError> {
        self.transition(IssueState::Remediating, IssueState::Verifying)?;
        self.fix = Some(outcome);
        Ok(())
    }

    pub fn conclude(&mut self, result: CheckResult) -> Result<(), DoctorError> {
        let next = match result {
            CheckResult::Cleared { evidence } => IssueState::Resolved { evidence },
            CheckResult::Persisting { detail } => IssueState::StillFailing { detail },
        };
        self.transition(IssueState::Verifying, next)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, IssueState::Resolved { .. })
    }

    /// Unresolved at high severity or above; such an issue fails the run
    pub fn is_blocking(&self) -> bool {
        !self.is_resolved() && self.issue.is_blocking_severity()
    }

    fn transition(&mut self, from: IssueState, to: IssueState) -> Result<(), DoctorError> {
        if std::mem::discriminant(&self.state) != std::mem::discriminant(&from) {
            return Err(DoctorError::TransitionError(format!(
                "{} on {} cannot go from {} to {}",
                self.issue.category.label(),
                self.issue.resource,
                self.state.name(),
                to.name()
            )));
        }
        self.state = to;
        Ok(())
    }
}
