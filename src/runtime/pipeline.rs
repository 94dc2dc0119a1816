use chrono::{DateTime, Utc};

use super::report::RunReport;
use crate::app::DesiredState;
use crate::diagnosis::{classify, Issue, IssueCategory};
use crate::observer::{Observation, StateObserver};
use crate::remediation::{FixScope, RemediationEngine};
use crate::snapshot::SnapshotManager;
use crate::utils::{log_progress, DoctorError};
use crate::verify::VerificationProbe;

/// Which stages a run goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    DiagnoseOnly,
    Fix(FixScope),
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::DiagnoseOnly => "diagnose-only",
            Mode::Fix(FixScope::All) => "fix-all",
            Mode::Fix(FixScope::ApiKeys) => "fix-api-keys",
            Mode::Fix(FixScope::Auth) => "fix-auth",
            Mode::Fix(FixScope::Ssl) => "fix-ssl",
            Mode::Fix(FixScope::Network) => "fix-network",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub mode: Mode,
    /// Capture a snapshot before the first write
    pub capture_snapshot: bool,
}

/// Output of the observe and classify stages
#[derive(Debug, Clone)]
pub struct Diagnosis {
    /// Taken before the first read of gateway state
    pub started_at: DateTime<Utc>,
    pub observation: Observation,
    pub issues: Vec<Issue>,
}

impl Diagnosis {
    pub fn in_scope(&self, scope: FixScope) -> usize {
        self.issues
            .iter()
            .filter(|i| scope.includes(i.category))
            .count()
    }
}

/// observe -> classify -> snapshot -> remediate -> verify, one stage at a time.
///
/// Never prompts: whether fixes may be written is decided by the caller
/// through `auto_approve`.
pub struct Pipeline<'a> {
    observer: StateObserver<'a>,
    engine: RemediationEngine<'a>,
    desired: &'a DesiredState,
    snapshots: Option<&'a SnapshotManager>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        observer: StateObserver<'a>,
        engine: RemediationEngine<'a>,
        desired: &'a DesiredState,
    ) -> Self {
        Self {
            observer,
            engine,
            desired,
            snapshots: None,
        }
    }

    pub fn with_snapshots(mut self, snapshots: &'a SnapshotManager) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn observer(&self) -> &StateObserver<'a> {
        &self.observer
    }

    pub async fn diagnose(&self) -> Diagnosis {
        let started_at = Utc::now();
        log_progress(1, 4, "observing gateway state");
        let observation = self.observer.observe(self.desired).await;
        let issues = classify(&observation, self.desired);
        tracing::info!(
            issues = issues.len(),
            observer_errors = observation.errors.len(),
            "diagnosis complete"
        );
        Diagnosis {
            started_at,
            observation,
            issues,
        }
    }

    pub async fn run(&self, options: PipelineOptions, auto_approve: bool) -> Result<RunReport, DoctorError> {
        let diagnosis = self.diagnose().await;
        match options.mode {
            Mode::DiagnoseOnly => Ok(RunReport::from_diagnosis(options.mode, diagnosis)),
            Mode::Fix(scope) => self.remediate(diagnosis, scope, options, auto_approve).await,
        }
    }

    /// Fix the in-scope issues of `diagnosis` and verify each one afterwards
    pub async fn remediate(
        &self,
        diagnosis: Diagnosis,
        scope: FixScope,
        options: PipelineOptions,
        auto_approve: bool,
    ) -> Result<RunReport, DoctorError> {
        let pending = diagnosis.in_scope(scope);
        let mut report = RunReport::from_diagnosis(options.mode, diagnosis);

        let ambiguous = report
            .issues
            .iter()
            .filter(|t| t.issue.category == IssueCategory::ClassificationAmbiguous)
            .count();
        if ambiguous > 0 {
            report
                .notes
                .push(format!("{} ambiguous issue(s) skipped; they need manual review", ambiguous));
        }

        if pending == 0 {
            report.notes.push("nothing to fix in this scope".to_string());
            return Ok(report);
        }
        if !auto_approve {
            report.notes.push(format!(
                "{} fix(es) pending approval; nothing was written",
                pending
            ));
            return Ok(report);
        }

        if options.capture_snapshot {
            log_progress(2, 4, "capturing snapshot");
            match self.snapshots {
                Some(manager) => match manager.capture(&self.observer).await {
                    Ok(snapshot) => {
                        if snapshot.is_partial() {
                            report.notes.push(format!(
                                "snapshot {} is partial; rollback cannot restore everything",
                                snapshot.id
                            ));
                        }
                        report.snapshot = Some(snapshot);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "snapshot failed, remediation aborted");
                        report
                            .notes
                            .push(format!("snapshot failed ({:#}); no fix was applied", e));
                        return Ok(report);
                    }
                },
                None => report
                    .notes
                    .push("no backups root configured; fixes applied without a snapshot".to_string()),
            }
        }

        log_progress(3, 4, format!("applying {} fix(es)", pending));
        report.ledger = self.engine.apply(&mut report.issues, scope).await?;

        log_progress(4, 4, "verifying fixes");
        VerificationProbe::new(&self.observer, self.desired)
            .verify(&mut report.issues)
            .await?;
        report.finished_at = Utc::now();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::Consumer;
    use crate::observer::RetryPolicy;
    use crate::snapshot::RestoreOptions;
    use crate::testing::{conflicting_route, desired_fixture, route_with_plugins, FakeGateway, FakeNetwork};
    use crate::verify::IssueState;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn pipeline<'a>(
        gw: &'a FakeGateway,
        net: &'a FakeNetwork,
        desired: &'a DesiredState,
    ) -> Pipeline<'a> {
        let observer = StateObserver::new(gw, gw, net, RetryPolicy::new(0, 0), 100, 100);
        let engine = RemediationEngine::new(gw, net, desired);
        Pipeline::new(observer, engine, desired)
    }

    fn fix(scope: FixScope) -> PipelineOptions {
        PipelineOptions {
            mode: Mode::Fix(scope),
            capture_snapshot: false,
        }
    }

    /// Gateway that satisfies `desired_fixture` completely
    fn healthy_gateway() -> FakeGateway {
        let gw = FakeGateway::default();
        gw.insert_route(route_with_plugins(
            "openai-chat",
            json!({"ai-proxy": {"provider": "openai", "auth": {"header": {"Authorization": "Bearer sk-live"}}}}),
        ));
        gw.insert_consumer(Consumer::with_key("gateway-api", "team-secret"));
        gw
    }

    #[tokio::test]
    async fn test_healthy_gateway_exits_zero() {
        let gw = healthy_gateway();
        let net = FakeNetwork::healthy(&["apisix", "backend"]);
        let desired = desired_fixture();

        let report = pipeline(&gw, &net, &desired)
            .run(
                PipelineOptions {
                    mode: Mode::DiagnoseOnly,
                    capture_snapshot: false,
                },
                false,
            )
            .await
            .unwrap();
        assert!(report.issues.is_empty());
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_diagnose_only_reports_one_conflict_per_route() {
        let gw = healthy_gateway();
        let mut route = conflicting_route("legacy-chat");
        route.uri = "/legacy/*".into();
        gw.insert_route(route);
        let net = FakeNetwork::healthy(&["apisix", "backend"]);
        let desired = desired_fixture();
        let before = gw.state_bytes();

        let report = pipeline(&gw, &net, &desired)
            .run(
                PipelineOptions {
                    mode: Mode::DiagnoseOnly,
                    capture_snapshot: false,
                },
                true,
            )
            .await
            .unwrap();

        let conflicts: Vec<_> = report
            .issues
            .iter()
            .filter(|t| t.issue.category == IssueCategory::AuthConflict)
            .map(|t| t.issue.route_id())
            .collect();
        assert_eq!(conflicts, vec![Some("legacy-chat")]);
        assert!(report.issues.iter().all(|t| t.state() == &IssueState::Detected));
        assert_eq!(gw.state_bytes(), before);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_fix_api_keys_creates_missing_consumer() {
        let gw = FakeGateway::default();
        gw.insert_route(route_with_plugins(
            "openai-chat",
            json!({"ai-proxy": {"provider": "openai"}}),
        ));
        let net = FakeNetwork::healthy(&["apisix", "backend"]);
        let desired = desired_fixture();

        let report = pipeline(&gw, &net, &desired)
            .run(fix(FixScope::ApiKeys), true)
            .await
            .unwrap();

        assert_eq!(report.ledger.applied(), 1);
        assert!(report.issues[0].is_resolved());
        let usernames: Vec<_> = gw.consumers().into_iter().map(|c| c.username).collect();
        assert_eq!(usernames, vec!["gateway-api".to_string()]);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_auth_format_issue_resolves_after_fix() {
        let gw = healthy_gateway();
        gw.insert_route(conflicting_route("openai-chat"));
        let net = FakeNetwork::healthy(&["apisix", "backend"]);
        let desired = desired_fixture();

        let report = pipeline(&gw, &net, &desired)
            .run(fix(FixScope::Auth), true)
            .await
            .unwrap();

        assert_eq!(report.issues.len(), 1);
        let tracked = &report.issues[0];
        assert_eq!(tracked.issue.category, IssueCategory::AuthFormatIssue);
        match tracked.state() {
            IssueState::Resolved { evidence } => assert!(evidence.contains("HTTP 200")),
            other => panic!("expected resolved, got {:?}", other),
        }
        assert!(gw.routes()[0].plugin("key-auth").is_none());
    }

    #[tokio::test]
    async fn test_unremediable_auth_issue_stays_failing() {
        // The upstream keeps rejecting whatever the gateway sends
        let gw = healthy_gateway();
        gw.insert_route(conflicting_route("openai-chat"));
        gw.override_probe(
            "openai-chat",
            403,
            r#"{"message":"Invalid key=value pair (missing equal-sign) in Authorization header"}"#,
        );
        let net = FakeNetwork::healthy(&["apisix", "backend"]);
        let desired = desired_fixture();

        let report = pipeline(&gw, &net, &desired)
            .run(fix(FixScope::All), true)
            .await
            .unwrap();

        assert!(report.issues[0].fix.as_ref().unwrap().is_applied());
        assert!(matches!(report.issues[0].state(), IssueState::StillFailing { .. }));
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_fix_network_reconnects_detached_service() {
        let gw = healthy_gateway();
        let net = FakeNetwork::healthy(&["apisix", "backend"]);
        net.detach("backend");
        let desired = desired_fixture();
        let pipeline = pipeline(&gw, &net, &desired);

        let report = pipeline.run(fix(FixScope::Network), true).await.unwrap();

        assert_eq!(net.connected(), vec!["backend".to_string()]);
        assert!(report.issues[0].is_resolved());
        let path = &desired.paths[0];
        assert!(pipeline.observer().test_network_path(path).await.is_reachable());
    }

    #[tokio::test]
    async fn test_stopped_service_blocks_the_run() {
        let gw = healthy_gateway();
        let net = FakeNetwork::healthy(&["apisix", "backend"]);
        net.stop("backend");
        let desired = desired_fixture();

        let report = pipeline(&gw, &net, &desired)
            .run(fix(FixScope::All), true)
            .await
            .unwrap();

        assert!(report.ledger.has_blocking_failure());
        assert!(net.connected().is_empty());
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_without_approval_nothing_is_written() {
        let gw = FakeGateway::default();
        gw.insert_route(conflicting_route("openai-chat"));
        let net = FakeNetwork::healthy(&["apisix", "backend"]);
        let desired = desired_fixture();
        let before = gw.state_bytes();

        let report = pipeline(&gw, &net, &desired)
            .run(fix(FixScope::All), false)
            .await
            .unwrap();

        assert_eq!(gw.state_bytes(), before);
        assert!(report.ledger.entries.is_empty());
        assert!(report.notes.iter().any(|n| n.contains("pending approval")));
    }

    #[tokio::test]
    async fn test_snapshot_before_fix_allows_rollback() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(dir.path(), vec![]);
        let gw = healthy_gateway();
        gw.insert_route(conflicting_route("openai-chat"));
        let net = FakeNetwork::healthy(&["apisix", "backend"]);
        let desired = desired_fixture();
        let original = gw.state_bytes();

        let report = pipeline(&gw, &net, &desired)
            .with_snapshots(&manager)
            .run(
                PipelineOptions {
                    mode: Mode::Fix(FixScope::All),
                    capture_snapshot: true,
                },
                true,
            )
            .await
            .unwrap();
        assert_ne!(gw.state_bytes(), original);

        let snapshot = report.snapshot.expect("snapshot captured");
        manager
            .restore(&gw, &snapshot.id, RestoreOptions::default())
            .await
            .unwrap();
        assert_eq!(gw.state_bytes(), original);
    }

    #[tokio::test]
    async fn test_unreadable_consumers_fail_the_run() {
        let gw = healthy_gateway();
        gw.fail_consumer_reads(true);
        let net = FakeNetwork::healthy(&["apisix", "backend"]);
        let desired = desired_fixture();

        let report = pipeline(&gw, &net, &desired)
            .run(fix(FixScope::All), true)
            .await
            .unwrap();
        assert!(report.issues.is_empty());
        assert_eq!(report.observer_errors.len(), 1);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_report_time_span_covers_observation() {
        let gw = FakeGateway::default();
        let net = FakeNetwork::healthy(&["apisix", "backend"]);
        let desired = desired_fixture();
        let pipeline = pipeline(&gw, &net, &desired);

        let before = Utc::now();
        let diagnosis = pipeline.diagnose().await;
        let started = diagnosis.started_at;
        assert!(started >= before);

        let report = pipeline
            .remediate(diagnosis, FixScope::ApiKeys, fix(FixScope::ApiKeys), true)
            .await
            .unwrap();
        assert_eq!(report.started_at, started);
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn test_mode_labels_match_commands() {
        assert_eq!(Mode::Fix(FixScope::ApiKeys).label(), "fix-api-keys");
        assert_eq!(Mode::DiagnoseOnly.label(), "diagnose-only");
    }
}
