use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A sub-resource that could not be captured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureGap {
    pub resource: String,
    pub reason: String,
}

/// An environment file copied into the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvFileEntry {
    /// Where the file lived at capture time
    pub source: PathBuf,
    /// File name inside the snapshot's env directory
    pub stored_as: String,
}

/// Metadata of one immutable snapshot directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub route_count: Option<usize>,
    pub consumer_count: Option<usize>,
    pub env_files: Vec<EnvFileEntry>,
    /// SHA-256 of every stored file, keyed by path relative to the snapshot
    pub digests: BTreeMap<String, String>,
    pub gaps: Vec<CaptureGap>,
    #[serde(skip)]
    pub dir: PathBuf,
}

impl Snapshot {
    /// Some sub-resource is missing from this snapshot
    pub fn is_partial(&self) -> bool {
        !self.gaps.is_empty()
    }

    pub fn summary(&self) -> String {
        let count = |c: Option<usize>| c.map(|n| n.to_string()).unwrap_or_else(|| "-".into());
        format!(
            "{} ({} routes, {} consumers, {} env files{})",
            self.id,
            count(self.route_count),
            count(self.consumer_count),
            self.env_files.len(),
            if self.is_partial() { ", PARTIAL" } else { "" }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RestoreOptions {
    /// Also copy captured environment files back to their source paths
    pub restore_env_files: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreFailure {
    pub resource: String,
    pub reason: String,
}

/// What a restore replayed, and what it could not
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RestoreReport {
    pub snapshot_id: String,
    pub restored: Vec<String>,
    pub failed: Vec<RestoreFailure>,
    /// Sub-resources the snapshot never captured
    pub not_captured: Vec<String>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
