use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::types::{
    CaptureGap, EnvFileEntry, RestoreFailure, RestoreOptions, RestoreReport, Snapshot,
};
use crate::admin::{AdminApi, Consumer, GatewayRoute};
use crate::constants::{
    SNAPSHOT_CONSUMERS_FILE, SNAPSHOT_ENV_DIR, SNAPSHOT_METADATA_FILE, SNAPSHOT_ROUTES_FILE,
};
use crate::observer::StateObserver;
use crate::utils::DoctorError;

/// Captures and restores route/consumer state under a backups root.
///
/// Each snapshot is written to a staging directory and renamed into place
/// once complete; after that its files are read-only and never rewritten.
pub struct SnapshotManager {
    root: PathBuf,
    env_files: Vec<PathBuf>,
}

impl SnapshotManager {
    pub fn new(root: impl Into<PathBuf>, env_files: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            env_files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Capture routes, consumers and environment files.
    ///
    /// A sub-resource that cannot be read is recorded as a gap; the rest is
    /// still captured. Check `Snapshot::is_partial`.
    pub async fn capture(&self, observer: &StateObserver<'_>) -> Result<Snapshot> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;

        let id = self.next_id();
        self.capture_as(observer, id).await
    }

    /// Capture under a fixed id; the staging directory never outlives a failure
    async fn capture_as(&self, observer: &StateObserver<'_>, id: String) -> Result<Snapshot> {
        let staging = self.root.join(format!(".staging-{}", id));
        let result = self.capture_staged(observer, id, &staging).await;
        if result.is_err() && staging.exists() {
            if let Err(e) = fs::remove_dir_all(&staging) {
                tracing::warn!(staging = %staging.display(), error = %e, "could not remove staging directory");
            }
        }
        result
    }

    async fn capture_staged(
        &self,
        observer: &StateObserver<'_>,
        id: String,
        staging: &Path,
    ) -> Result<Snapshot> {
        fs::create_dir_all(staging.join(SNAPSHOT_ENV_DIR))
            .with_context(|| format!("Failed to create {}", staging.display()))?;

        let mut snapshot = Snapshot {
            id: id.clone(),
            created_at: Utc::now(),
            route_count: None,
            consumer_count: None,
            env_files: Vec::new(),
            digests: BTreeMap::new(),
            gaps: Vec::new(),
            dir: self.root.join(&id),
        };

        match observer.fetch_routes().await {
            Ok(routes) => {
                self.store_json(staging, SNAPSHOT_ROUTES_FILE, &routes, &mut snapshot)?;
                snapshot.route_count = Some(routes.len());
            }
            Err(e) => snapshot.gaps.push(CaptureGap {
                resource: "routes".into(),
                reason: e.to_string(),
            }),
        }

        match observer.fetch_consumers().await {
            Ok(consumers) => {
                self.store_json(staging, SNAPSHOT_CONSUMERS_FILE, &consumers, &mut snapshot)?;
                snapshot.consumer_count = Some(consumers.len());
            }
            Err(e) => snapshot.gaps.push(CaptureGap {
                resource: "consumers".into(),
                reason: e.to_string(),
            }),
        }

        for (index, source) in self.env_files.iter().enumerate() {
            match fs::read(source) {
                Ok(bytes) => {
                    let name = source
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| "env".to_string());
                    let stored_as = format!("{}-{}", index, name);
                    let relative = format!("{}/{}", SNAPSHOT_ENV_DIR, stored_as);
                    self.store_bytes(staging, &relative, &bytes, &mut snapshot)?;
                    snapshot.env_files.push(EnvFileEntry {
                        source: source.clone(),
                        stored_as,
                    });
                }
                Err(e) => snapshot.gaps.push(CaptureGap {
                    resource: format!("env:{}", source.display()),
                    reason: e.to_string(),
                }),
            }
        }

        let metadata = serde_json::to_vec_pretty(&snapshot)?;
        write_read_only(&staging.join(SNAPSHOT_METADATA_FILE), &metadata)?;

        if snapshot.dir.exists() {
            return Err(DoctorError::SnapshotError(format!("{} already exists", snapshot.dir.display())).into());
        }
        fs::rename(staging, &snapshot.dir).with_context(|| {
            format!("Failed to move snapshot into {}", snapshot.dir.display())
        })?;

        if snapshot.is_partial() {
            tracing::warn!(snapshot = %snapshot.id, gaps = snapshot.gaps.len(), "partial snapshot captured");
        } else {
            tracing::info!(snapshot = %snapshot.id, "snapshot captured");
        }
        Ok(snapshot)
    }

    /// Replay every captured route and consumer with full-resource PUTs.
    ///
    /// Resources created after the snapshot are left alone; on an id
    /// collision the snapshot's definition wins. Safe to run repeatedly.
    pub async fn restore(
        &self,
        admin: &dyn AdminApi,
        id: &str,
        options: RestoreOptions,
    ) -> Result<RestoreReport> {
        let snapshot = self.load(id)?;
        let mut report = RestoreReport {
            snapshot_id: snapshot.id.clone(),
            ..Default::default()
        };
        for gap in &snapshot.gaps {
            report.not_captured.push(gap.resource.clone());
        }

        if snapshot.route_count.is_some() {
            let routes: Vec<GatewayRoute> = read_json(&snapshot.dir.join(SNAPSHOT_ROUTES_FILE))?;
            for route in &routes {
                let resource = format!("route {}", route.id);
                match admin.put_route(route).await {
                    Ok(()) => report.restored.push(resource),
                    Err(e) => report.failed.push(RestoreFailure {
                        resource,
                        reason: e.to_string(),
                    }),
                }
            }
        }

        if snapshot.consumer_count.is_some() {
            let consumers: Vec<Consumer> =
                read_json(&snapshot.dir.join(SNAPSHOT_CONSUMERS_FILE))?;
            for consumer in &consumers {
                let resource = format!("consumer {}", consumer.username);
                match admin.put_consumer(consumer).await {
                    Ok(()) => report.restored.push(resource),
                    Err(e) => report.failed.push(RestoreFailure {
                        resource,
                        reason: e.to_string(),
                    }),
                }
            }
        }

        if options.restore_env_files {
            for entry in &snapshot.env_files {
                let stored = snapshot.dir.join(SNAPSHOT_ENV_DIR).join(&entry.stored_as);
                let resource = format!("env {}", entry.source.display());
                // Written fresh so the restored file does not inherit read-only bits
                match fs::read(&stored).and_then(|bytes| fs::write(&entry.source, bytes)) {
                    Ok(()) => report.restored.push(resource),
                    Err(e) => report.failed.push(RestoreFailure {
                        resource,
                        reason: e.to_string(),
                    }),
                }
            }
        }

        for failure in &report.failed {
            tracing::error!(resource = %failure.resource, reason = %failure.reason, "not restored");
        }
        Ok(report)
    }

    /// Load a snapshot's metadata and check every stored file against its digest
    pub fn load(&self, id: &str) -> Result<Snapshot> {
        if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) {
            return Err(DoctorError::SnapshotError(format!("invalid snapshot id `{}`", id)).into());
        }
        let dir = self.root.join(id);
        let mut snapshot: Snapshot = read_json(&dir.join(SNAPSHOT_METADATA_FILE))
            .with_context(|| format!("Snapshot {} not found in {}", id, self.root.display()))?;
        snapshot.dir = dir;

        for (relative, expected) in &snapshot.digests {
            let bytes = fs::read(snapshot.dir.join(relative))
                .with_context(|| format!("Snapshot {} is missing {}", id, relative))?;
            if &sha256_hex(&bytes) != expected {
                return Err(DoctorError::SnapshotError(format!(
                    "snapshot {} was modified after capture ({})",
                    id, relative
                ))
                .into());
            }
        }
        Ok(snapshot)
    }

    /// All snapshots, oldest first
    pub fn list(&self) -> Result<Vec<Snapshot>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            let metadata_path = entry.path().join(SNAPSHOT_METADATA_FILE);
            match read_json::<Snapshot>(&metadata_path) {
                Ok(mut snapshot) => {
                    snapshot.dir = entry.path();
                    snapshots.push(snapshot);
                }
                Err(e) => tracing::warn!(path = %metadata_path.display(), error = %e, "skipping unreadable snapshot"),
            }
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }

    pub fn latest(&self) -> Result<Option<Snapshot>> {
        Ok(self.list()?.pop())
    }

    /// Delete all but the newest `keep` snapshots; returns the deleted ids
    pub fn prune(&self, keep: usize) -> Result<Vec<String>> {
        let snapshots = self.list()?;
        let excess = snapshots.len().saturating_sub(keep);
        let mut removed = Vec::new();
        for snapshot in snapshots.into_iter().take(excess) {
            fs::remove_dir_all(&snapshot.dir)
                .with_context(|| format!("Failed to remove {}", snapshot.dir.display()))?;
            removed.push(snapshot.id);
        }
        Ok(removed)
    }

    /// Timestamp id, suffixed when two captures land in the same millisecond
    fn next_id(&self) -> String {
        let base = Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string();
        let mut id = base.clone();
        let mut n = 1;
        while self.root.join(&id).exists() {
            id = format!("{}-{}", base, n);
            n += 1;
        }
        id
    }

    fn store_json<T: Serialize>(
        &self,
        staging: &Path,
        relative: &str,
        value: &T,
        snapshot: &mut Snapshot,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.store_bytes(staging, relative, &bytes, snapshot)
    }

    fn store_bytes(
        &self,
        staging: &Path,
        relative: &str,
        bytes: &[u8],
        snapshot: &mut Snapshot,
    ) -> Result<()> {
        write_read_only(&staging.join(relative), bytes)?;
        snapshot
            .digests
            .insert(relative.to_string(), sha256_hex(bytes));
        Ok(())
    }
}

fn write_read_only(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
