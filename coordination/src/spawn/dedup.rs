//! Duplicate-spawn prevention: a 60-second window per agent name, matched
//! either exactly (on a normalized task prefix) or semantically (Jaccard
//! over tokenized descriptions).
//!
//! Grounded on `harness/tools.rs`'s recent-invocation memoization (same
//! "has this exact thing already happened in the last window" idea) and
//! `debate/memory_bridge.rs`'s tokenized-overlap similarity scoring.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use blake3::Hasher;

const WINDOW: Duration = Duration::from_secs(60);
const EXACT_PREFIX_LEN: usize = 150;

#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub agent_name: String,
    pub task: String,
    pub fingerprint: String,
    pub result_summary: String,
    pub queued_plan_changes: usize,
    recorded_at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub semantic_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { semantic_threshold: 0.75 }
    }
}

fn normalize(task: &str) -> String {
    task.trim().to_lowercase()
}

fn exact_fingerprint(agent_name: &str, task: &str) -> String {
    let normalized = normalize(task);
    let prefix: String = normalized.chars().take(EXACT_PREFIX_LEN).collect();
    let mut hasher = Hasher::new();
    hasher.update(agent_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(prefix.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Tracks recent spawns per agent name for duplicate detection.
#[derive(Default)]
pub struct DedupTracker {
    records: HashMap<String, Vec<SpawnRecord>>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune_expired(&mut self, agent_name: &str) {
        if let Some(records) = self.records.get_mut(agent_name) {
            let now = Instant::now();
            records.retain(|r| now.duration_since(r.recorded_at) < WINDOW);
        }
    }

    /// Looks for an exact or semantic match within the window. Returns the
    /// matching record if found; never mutates state on a lookup.
    pub fn find_duplicate(&mut self, agent_name: &str, task: &str, config: DedupConfig) -> Option<SpawnRecord> {
        self.prune_expired(agent_name);
        let records = self.records.get(agent_name)?;

        let fingerprint = exact_fingerprint(agent_name, task);
        if let Some(exact) = records.iter().find(|r| r.fingerprint == fingerprint) {
            return Some(exact.clone());
        }

        let tokens = tokenize(task);
        records
            .iter()
            .filter(|r| jaccard(&tokens, &tokenize(&r.task)) >= config.semantic_threshold)
            .max_by(|a, b| {
                jaccard(&tokens, &tokenize(&a.task))
                    .partial_cmp(&jaccard(&tokens, &tokenize(&b.task)))
                    .unwrap()
            })
            .cloned()
    }

    /// Records a completed spawn so later calls within the window can be
    /// recognized as duplicates.
    pub fn record(&mut self, agent_name: &str, task: &str, result_summary: &str, queued_plan_changes: usize) {
        let fingerprint = exact_fingerprint(agent_name, task);
        self.records.entry(agent_name.to_string()).or_default().push(SpawnRecord {
            agent_name: agent_name.to_string(),
            task: task.to_string(),
            fingerprint,
            result_summary: result_summary.to_string(),
            queued_plan_changes,
            recorded_at: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_duplicate_within_window_is_found() {
        let mut tracker = DedupTracker::new();
        tracker.record("coder", "implement the login form", "done", 2);
        let dup = tracker.find_duplicate("coder", "implement the login form", DedupConfig::default());
        assert!(dup.is_some());
    }

    #[test]
    fn different_agent_name_is_not_a_duplicate() {
        let mut tracker = DedupTracker::new();
        tracker.record("coder", "implement the login form", "done", 0);
        let dup = tracker.find_duplicate("reviewer", "implement the login form", DedupConfig::default());
        assert!(dup.is_none());
    }

    #[test]
    fn semantically_similar_task_is_a_duplicate() {
        let mut tracker = DedupTracker::new();
        tracker.record("coder", "implement the user login form with validation", "done", 1);
        let dup = tracker.find_duplicate(
            "coder",
            "implement the user login form with input validation",
            DedupConfig::default(),
        );
        assert!(dup.is_some());
    }

    #[test]
    fn unrelated_task_is_not_a_duplicate() {
        let mut tracker = DedupTracker::new();
        tracker.record("coder", "implement the login form", "done", 0);
        let dup = tracker.find_duplicate("coder", "write docs for the billing API", DedupConfig::default());
        assert!(dup.is_none());
    }
}
