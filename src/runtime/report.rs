use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use super::pipeline::{Diagnosis, Mode};
use crate::cli::OutputFormat;
use crate::diagnosis::Severity;
use crate::remediation::{FixOutcome, RemediationLedger};
use crate::snapshot::{RestoreReport, Snapshot};
use crate::utils::ObserverError;
use crate::verify::{IssueState, TrackedIssue};

/// Everything one run found, changed and verified
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub routes_read: bool,
    pub consumers_read: bool,
    pub issues: Vec<TrackedIssue>,
    pub ledger: RemediationLedger,
    pub observer_errors: Vec<ObserverError>,
    pub snapshot: Option<Snapshot>,
    pub notes: Vec<String>,
}

impl RunReport {
    pub fn from_diagnosis(mode: Mode, diagnosis: Diagnosis) -> Self {
        Self {
            mode: mode.label().to_string(),
            started_at: diagnosis.started_at,
            finished_at: Utc::now(),
            routes_read: diagnosis.observation.routes.is_some(),
            consumers_read: diagnosis.observation.consumers.is_some(),
            issues: diagnosis.issues.into_iter().map(TrackedIssue::new).collect(),
            ledger: RemediationLedger::default(),
            observer_errors: diagnosis.observation.errors,
            snapshot: None,
            notes: Vec::new(),
        }
    }

    /// 0 only when nothing at high severity or above is left unresolved
    /// and the gateway state could actually be read
    pub fn exit_code(&self) -> i32 {
        let blocked = self.issues.iter().any(TrackedIssue::is_blocking)
            || self.ledger.has_blocking_failure()
            || !self.routes_read
            || !self.consumers_read;
        if blocked {
            1
        } else {
            0
        }
    }

    pub fn resolved(&self) -> usize {
        self.issues.iter().filter(|t| t.is_resolved()).count()
    }

    pub fn format(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => serde_json::to_string_pretty(self).unwrap_or_else(|e| {
                format!("{{\"error\": \"Failed to serialize report: {}\"}}", e)
            }),
            OutputFormat::Text => self.format_text(),
            OutputFormat::Markdown => self.format_markdown(),
        }
    }

    fn format_text(&self) -> String {
        let mut output = format!("{} {}\n", "gateway-doctor".bold(), self.mode);

        if let Some(snapshot) = &self.snapshot {
            output.push_str(&format!("  Snapshot: {}\n", snapshot.summary()));
        }

        if self.issues.is_empty() {
            output.push_str(&format!("\n  {}\n", "No issues found".green()));
        } else {
            output.push_str(&format!("\n--- Issues ({}) ---\n", self.issues.len()));
            for tracked in &self.issues {
                let issue = &tracked.issue;
                output.push_str(&format!(
                    "[{}] {} {} - {}\n",
                    severity_tag(issue.severity),
                    issue.category.label(),
                    issue.resource,
                    state_tag(tracked.state())
                ));
                output.push_str(&format!("  {}\n", issue.detail));
                if let Some(fix) = &tracked.fix {
                    output.push_str(&format!("  fix: {}\n", fix_text(fix)));
                }
                match tracked.state() {
                    IssueState::Resolved { evidence } => {
                        output.push_str(&format!("  verified: {}\n", evidence))
                    }
                    IssueState::StillFailing { detail } => {
                        output.push_str(&format!("  still failing: {}\n", detail))
                    }
                    _ => {}
                }
            }
        }

        let changes: Vec<&String> = self.ledger.entries.iter().flat_map(|e| &e.changes).collect();
        if !changes.is_empty() {
            output.push_str("\n--- Changes ---\n");
            for change in changes {
                output.push_str(&format!("• {}\n", change));
            }
        }

        if !self.observer_errors.is_empty() {
            output.push_str("\n--- Errors ---\n");
            for error in &self.observer_errors {
                output.push_str(&format!("• {}\n", error.to_string().red()));
            }
        }

        if !self.notes.is_empty() {
            output.push_str("\n--- Notes ---\n");
            for note in &self.notes {
                output.push_str(&format!("• {}\n", note));
            }
        }

        let verdict = if self.exit_code() == 0 {
            "OK".green().bold()
        } else {
            "FAILED".red().bold()
        };
        output.push_str(&format!(
            "\n{}: {} issue(s), {} resolved, {} fix(es) applied\n",
            verdict,
            self.issues.len(),
            self.resolved(),
            self.ledger.applied()
        ));
        output
    }

    fn format_markdown(&self) -> String {
        let mut output = format!("## gateway-doctor `{}`\n\n", self.mode);

        if let Some(snapshot) = &self.snapshot {
            output.push_str(&format!("Snapshot: `{}`\n\n", snapshot.summary()));
        }

        if self.issues.is_empty() {
            output.push_str("No issues found.\n\n");
        } else {
            output.push_str("| Severity | Category | Resource | State |\n");
            output.push_str("|---|---|---|---|\n");
            for tracked in &self.issues {
                output.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    tracked.issue.severity,
                    tracked.issue.category.label(),
                    tracked.issue.resource,
                    state_label(tracked.state())
                ));
            }
            output.push('\n');
        }

        if !self.observer_errors.is_empty() {
            output.push_str("## Errors\n\n");
            for error in &self.observer_errors {
                output.push_str(&format!("- {}\n", error));
            }
            output.push('\n');
        }

        if !self.notes.is_empty() {
            output.push_str("## Notes\n\n");
            for note in &self.notes {
                output.push_str(&format!("- {}\n", note));
            }
            output.push('\n');
        }

        output.push_str("---\n");
        output.push_str(&format!(
            "*Exit status: {} | Resolved: {}/{} | Finished: {}*\n",
            self.exit_code(),
            self.resolved(),
            self.issues.len(),
            self.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        output
    }
}

/// Render a rollback result
pub fn format_restore(report: &RestoreReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_else(|e| {
            format!("{{\"error\": \"Failed to serialize report: {}\"}}", e)
        }),
        OutputFormat::Text | OutputFormat::Markdown => {
            let mut output = format!("Restored snapshot {}\n", report.snapshot_id);
            for resource in &report.restored {
                output.push_str(&format!("  [{}] {}\n", "OK".green(), resource));
            }
            for failure in &report.failed {
                output.push_str(&format!(
                    "  [{}] {}: {}\n",
                    "FAIL".red(),
                    failure.resource,
                    failure.reason
                ));
            }
            for resource in &report.not_captured {
                output.push_str(&format!(
                    "  [{}] {} was not captured\n",
                    "SKIP".yellow(),
                    resource
                ));
            }
            if !report.is_complete() {
                output.push_str(&format!(
                    "\n{} {} resource(s) need manual intervention\n",
                    "FAILED:".red().bold(),
                    report.failed.len()
                ));
            }
            output
        }
    }
}

fn severity_tag(severity: Severity) -> colored::ColoredString {
    let label = severity.to_string().to_uppercase();
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::High => label.red(),
        Severity::Medium => label.yellow(),
    }
}

fn state_label(state: &IssueState) -> &'static str {
    match state {
        IssueState::Detected => "detected",
        IssueState::Remediating => "remediating",
        IssueState::Verifying => "verifying",
        IssueState::Resolved { .. } => "resolved",
        IssueState::StillFailing { .. } => "still failing",
    }
}

fn state_tag(state: &IssueState) -> colored::ColoredString {
    let label = state_label(state);
    match state {
        IssueState::Resolved { .. } => label.green(),
        IssueState::StillFailing { .. } => label.red(),
        _ => label.normal(),
    }
}

fn fix_text(fix: &FixOutcome) -> String {
    match fix {
        FixOutcome::Applied { changed: true } => "applied".to_string(),
        FixOutcome::Applied { changed: false } => "already in place".to_string(),
        FixOutcome::Failed {
            reason,
            unrecoverable: true,
        } => format!("unrecoverable: {}", reason),
        FixOutcome::Failed { reason, .. } => format!("failed: {}", reason),
    }
}
