use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Two services that are required to talk to each other
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServicePath {
    pub from: String,
    pub to: String,
    pub port: u16,
}

impl fmt::Display for ServicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}:{}", self.from, self.to, self.port)
    }
}

/// Result of one network path test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reachability {
    Reachable,
    Unreachable { detail: String },
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResult {
    pub path: ServicePath,
    pub reachability: Reachability,
}

/// Observed network layout around the shared gateway network
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub shared_network: String,
    /// `None` when the membership could not be read
    pub attached: Option<BTreeSet<String>>,
    /// Only services that were queried appear here
    pub running: BTreeMap<String, bool>,
    pub paths: Vec<PathResult>,
}

impl NetworkTopology {
    /// `Some(false)` only when membership was read and the service is absent
    pub fn is_attached(&self, service: &str) -> Option<bool> {
        self.attached.as_ref().map(|set| set.contains(service))
    }

    pub fn is_running(&self, service: &str) -> Option<bool> {
        self.running.get(service).copied()
    }
}
