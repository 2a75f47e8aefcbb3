//! Component K: the persisted-state layout — a session directory holding
//! the latest swarm checkpoint, a predictions log, worker-result records,
//! and a per-agent file-change log.
//!
//! Grounded on `harness/session.rs`'s JSON-file session state store
//! (one state file per session, atomic write-then-rename) generalized to
//! the swarm's four-artifact layout, plus `ensemble/state.rs`'s
//! append-only JSONL event log for the three append-only record kinds.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::orchestrator::SwarmCheckpoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionLogEntry {
    pub task_id: String,
    pub agent_name: String,
    pub prediction: String,
    pub recorded_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResultRecord {
    pub task_id: String,
    pub agent_name: String,
    pub success: bool,
    pub summary: String,
    pub recorded_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeLogEntry {
    pub agent_name: String,
    pub file: String,
    pub change_kind: String,
    pub recorded_at_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("malformed record in {path}: {source}")]
    Malformed { path: PathBuf, source: serde_json::Error },
    #[error("no checkpoint found for session {0}")]
    NoCheckpoint(String),
}

/// The persistence seam: an embedding application may supply a store
/// backed by a real database instead of `FsSessionStore` without the
/// orchestrator knowing the difference. Failures here are always
/// surfaced as `persistence.warning` events, never propagated as fatal.
pub trait SessionStore: Send + Sync {
    fn write_checkpoint(&self, session_id: &str, checkpoint: &SwarmCheckpoint) -> Result<(), PersistenceError>;
    fn latest_checkpoint(&self, session_id: &str) -> Result<SwarmCheckpoint, PersistenceError>;
    fn append_prediction(&self, session_id: &str, entry: &PredictionLogEntry) -> Result<(), PersistenceError>;
    fn append_worker_result(&self, session_id: &str, entry: &WorkerResultRecord) -> Result<(), PersistenceError>;
    fn append_file_change(&self, session_id: &str, entry: &FileChangeLogEntry) -> Result<(), PersistenceError>;
}

/// A plain directory of JSON/JSONL files: one timestamped checkpoint file
/// per write (resume "latest" sorts filenames), three append-only JSONL
/// logs. Deliberately the simplest adapter that satisfies the layout.
pub struct FsSessionStore {
    root: PathBuf,
}

impl FsSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn ensure_session_dir(&self, session_id: &str) -> Result<PathBuf, PersistenceError> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).map_err(|source| PersistenceError::Io { path: dir.clone(), source })?;
        Ok(dir)
    }

    fn append_jsonl<T: Serialize>(&self, session_id: &str, file_name: &str, entry: &T) -> Result<(), PersistenceError> {
        use std::io::Write;

        let dir = self.ensure_session_dir(session_id)?;
        let path = dir.join(file_name);
        let line = serde_json::to_string(entry).map_err(|source| PersistenceError::Malformed { path: path.clone(), source })?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| PersistenceError::Io { path: path.clone(), source })?;
        writeln!(file, "{line}").map_err(|source| PersistenceError::Io { path, source })
    }
}

impl SessionStore for FsSessionStore {
    fn write_checkpoint(&self, session_id: &str, checkpoint: &SwarmCheckpoint) -> Result<(), PersistenceError> {
        let dir = self.ensure_session_dir(session_id)?;
        let timestamp = checkpoint.wave;
        let path = dir.join(format!("checkpoint-{timestamp:010}.json"));
        let body = serde_json::to_string_pretty(checkpoint).map_err(|source| PersistenceError::Malformed { path: path.clone(), source })?;
        fs::write(&path, body).map_err(|source| PersistenceError::Io { path, source })
    }

    fn latest_checkpoint(&self, session_id: &str) -> Result<SwarmCheckpoint, PersistenceError> {
        let dir = self.session_dir(session_id);
        let mut names: Vec<String> = fs::read_dir(&dir)
            .map_err(|source| PersistenceError::Io { path: dir.clone(), source })?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.starts_with("checkpoint-") && n.ends_with(".json"))
            .collect();
        names.sort();

        let latest = names.last().ok_or_else(|| PersistenceError::NoCheckpoint(session_id.to_string()))?;
        let path = dir.join(latest);
        let body = fs::read_to_string(&path).map_err(|source| PersistenceError::Io { path: path.clone(), source })?;
        serde_json::from_str(&body).map_err(|source| PersistenceError::Malformed { path, source })
    }

    fn append_prediction(&self, session_id: &str, entry: &PredictionLogEntry) -> Result<(), PersistenceError> {
        self.append_jsonl(session_id, "predictions.jsonl", entry)
    }

    fn append_worker_result(&self, session_id: &str, entry: &WorkerResultRecord) -> Result<(), PersistenceError> {
        self.append_jsonl(session_id, "worker_results.jsonl", entry)
    }

    fn append_file_change(&self, session_id: &str, entry: &FileChangeLogEntry) -> Result<(), PersistenceError> {
        self.append_jsonl(session_id, "file_changes.jsonl", entry)
    }
}

/// Reads every line of a session's file-change log back, in append order.
/// Not part of `SessionStore` (no caller needs it yet outside tests/CLI
/// `list`), but kept alongside the writer since it exercises the same
/// JSONL shape.
pub fn read_file_changes(store_root: &Path, session_id: &str) -> Result<Vec<FileChangeLogEntry>, PersistenceError> {
    let path = store_root.join(session_id).join("file_changes.jsonl");
    let body = match fs::read_to_string(&path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(PersistenceError::Io { path, source }),
    };
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(|source| PersistenceError::Malformed { path: path.clone(), source }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("agent-core-persistence-test-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn sample_checkpoint(wave: u32) -> SwarmCheckpoint {
        SwarmCheckpoint {
            original_prompt: "do the thing".to_string(),
            queue: crate::queue::TaskQueue::new(2).get_checkpoint_state(),
            wave,
        }
    }

    #[test]
    fn checkpoint_round_trips_through_the_filesystem() {
        let root = temp_dir("checkpoint");
        let store = FsSessionStore::new(&root);
        store.write_checkpoint("s1", &sample_checkpoint(3)).unwrap();
        let restored = store.latest_checkpoint("s1").unwrap();
        assert_eq!(restored.wave, 3);
        assert_eq!(restored.original_prompt, "do the thing");
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn latest_checkpoint_picks_the_highest_wave() {
        let root = temp_dir("latest");
        let store = FsSessionStore::new(&root);
        store.write_checkpoint("s1", &sample_checkpoint(1)).unwrap();
        store.write_checkpoint("s1", &sample_checkpoint(2)).unwrap();
        store.write_checkpoint("s1", &sample_checkpoint(10)).unwrap();
        let restored = store.latest_checkpoint("s1").unwrap();
        assert_eq!(restored.wave, 10);
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn missing_checkpoint_is_a_named_error() {
        let root = temp_dir("missing");
        let store = FsSessionStore::new(&root);
        fs::create_dir_all(root.join("s1")).unwrap();
        let err = store.latest_checkpoint("s1").unwrap_err();
        assert!(matches!(err, PersistenceError::NoCheckpoint(_)));
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn append_only_logs_accumulate_in_order() {
        let root = temp_dir("append");
        let store = FsSessionStore::new(&root);
        for i in 0..3 {
            store
                .append_file_change(
                    "s1",
                    &FileChangeLogEntry {
                        agent_name: "coder".to_string(),
                        file: format!("file{i}.rs"),
                        change_kind: "modified".to_string(),
                        recorded_at_ms: i as u64,
                    },
                )
                .unwrap();
        }
        let entries = read_file_changes(&root, "s1").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].file, "file0.rs");
        assert_eq!(entries[2].file, "file2.rs");
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn reading_an_absent_log_returns_empty() {
        let root = temp_dir("absent");
        let entries = read_file_changes(&root, "nonexistent-session").unwrap();
        assert!(entries.is_empty());
    }
}
