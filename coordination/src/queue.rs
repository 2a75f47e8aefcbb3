//! Component J: DAG-backed task queue driving the swarm orchestrator's
//! wave dispatch — readiness, dispatch/completion/failure transitions,
//! checkpoint round-tripping, and replan insertion.
//!
//! Grounded on `state/store.rs`'s in-memory keyed-record store with a
//! checkpoint/restore pair, generalized from ensemble tasks to the
//! decomposer's dependency-graph subtasks.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core_events::{CoreEvent, EventBus};
use crate::decompose::{DependencyGraph, SmartDecompositionResult, SmartSubtask, SubtaskStatus};

const SATISFIED_FOR_READINESS: &[SubtaskStatus] = &[SubtaskStatus::Completed, SubtaskStatus::Decomposed];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    #[serde(flatten)]
    pub subtask: SmartSubtask,
    pub attempts: u32,
    pub result_summary: Option<String>,
    pub rescue_context: Option<String>,
    pub assigned_model: Option<String>,
}

impl QueuedTask {
    fn from_subtask(subtask: SmartSubtask) -> Self {
        Self { subtask, attempts: 0, result_summary: None, rescue_context: None, assigned_model: None }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub ready: usize,
    pub blocked: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub decomposed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueCheckpoint {
    pub tasks: Vec<QueuedTask>,
    pub graph: DependencyGraph,
    pub max_retries: u32,
}

/// Holds the decomposition's dependency graph plus one `QueuedTask` per
/// subtask id, and drives status transitions over it.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: HashMap<String, QueuedTask>,
    graph: DependencyGraph,
    max_retries: u32,
}

impl TaskQueue {
    pub fn new(max_retries: u32) -> Self {
        Self { tasks: HashMap::new(), graph: DependencyGraph::default(), max_retries }
    }

    /// Seeds the queue from a finished decomposition. Tasks with no
    /// dependencies start `Ready`; all others start `Blocked`.
    pub fn load_from_decomposition(&mut self, result: SmartDecompositionResult) {
        self.graph = result.graph;
        self.tasks = result
            .subtasks
            .into_iter()
            .map(|mut subtask| {
                subtask.status =
                    if subtask.dependencies.is_empty() { SubtaskStatus::Ready } else { SubtaskStatus::Blocked };
                (subtask.id.clone(), QueuedTask::from_subtask(subtask))
            })
            .collect();
    }

    pub fn get_task(&self, id: &str) -> Option<&QueuedTask> {
        self.tasks.get(id)
    }

    pub fn get_all_tasks(&self) -> Vec<&QueuedTask> {
        self.tasks.values().collect()
    }

    pub fn ready_tasks(&self) -> Vec<&QueuedTask> {
        self.tasks.values().filter(|t| t.subtask.status == SubtaskStatus::Ready).collect()
    }

    pub fn get_stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for task in self.tasks.values() {
            match task.subtask.status {
                SubtaskStatus::Pending => stats.pending += 1,
                SubtaskStatus::Ready => stats.ready += 1,
                SubtaskStatus::Blocked => stats.blocked += 1,
                SubtaskStatus::InProgress => stats.in_progress += 1,
                SubtaskStatus::Completed => stats.completed += 1,
                SubtaskStatus::Failed => stats.failed += 1,
                SubtaskStatus::Skipped => stats.skipped += 1,
                SubtaskStatus::Decomposed => stats.decomposed += 1,
            }
        }
        stats
    }

    pub fn mark_dispatched(&mut self, id: &str, model: &str) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.subtask.status = SubtaskStatus::InProgress;
            task.assigned_model = Some(model.to_string());
        }
    }

    /// No-op if the task already transitioned to `Failed` (a slow success
    /// racing a prior failure must not resurrect it).
    pub fn mark_completed(&mut self, id: &str, result_summary: impl Into<String>, events: &EventBus) {
        let already_failed = self.tasks.get(id).is_some_and(|t| t.subtask.status == SubtaskStatus::Failed);
        if already_failed {
            return;
        }
        if let Some(task) = self.tasks.get_mut(id) {
            task.subtask.status = SubtaskStatus::Completed;
            task.result_summary = Some(result_summary.into());
        }
        self.refresh_readiness(events);
    }

    /// Failure with `retries_left > 0` goes back to `Ready` with
    /// `attempts` incremented; otherwise `Failed`, cascading a `Skipped`
    /// status to every dependent (transitively).
    pub fn mark_failed(&mut self, id: &str, retries_left: u32, events: &EventBus) {
        let Some(task) = self.tasks.get_mut(id) else { return };
        task.attempts += 1;
        if retries_left > 0 {
            task.subtask.status = SubtaskStatus::Ready;
            return;
        }
        task.subtask.status = SubtaskStatus::Failed;
        self.cascade_skip(id, events);
    }

    fn cascade_skip(&mut self, failed_id: &str, events: &EventBus) {
        let mut stack = self.graph.forward.get(failed_id).cloned().unwrap_or_default();
        let mut seen: HashSet<String> = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(task) = self.tasks.get_mut(&id) {
                if matches!(task.subtask.status, SubtaskStatus::Completed | SubtaskStatus::Decomposed) {
                    continue;
                }
                task.subtask.status = SubtaskStatus::Skipped;
                events.publish(CoreEvent::DecomposeUnknownDependency {
                    task_id: id.clone(),
                    dependency_id: failed_id.to_string(),
                });
                if let Some(next) = self.graph.forward.get(&id) {
                    stack.extend(next.iter().cloned());
                }
            }
        }
    }

    /// Promotes every `Blocked` task whose dependencies are now all
    /// satisfied ({completed, decomposed}) to `Ready`.
    fn refresh_readiness(&mut self, _events: &EventBus) {
        let ids: Vec<String> = self.tasks.keys().cloned().collect();
        for id in ids {
            let satisfied = self.dependencies_satisfied(&id);
            if let Some(task) = self.tasks.get_mut(&id) {
                if satisfied && task.subtask.status == SubtaskStatus::Blocked {
                    task.subtask.status = SubtaskStatus::Ready;
                }
            }
        }
    }

    fn dependencies_satisfied(&self, id: &str) -> bool {
        self.tasks
            .get(id)
            .map(|t| {
                t.subtask
                    .dependencies
                    .iter()
                    .all(|d| self.tasks.get(d).is_some_and(|dep| SATISFIED_FOR_READINESS.contains(&dep.subtask.status)))
            })
            .unwrap_or(false)
    }

    /// Recursively restores `Skipped` tasks reachable from `completed_id`
    /// to `Ready` once every one of their dependencies is satisfied.
    pub fn un_skip_dependents(&mut self, completed_id: &str) {
        let mut stack = self.graph.forward.get(completed_id).cloned().unwrap_or_default();
        let mut seen: HashSet<String> = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let was_skipped = self.tasks.get(&id).is_some_and(|t| t.subtask.status == SubtaskStatus::Skipped);
            if !was_skipped {
                continue;
            }
            if self.dependencies_satisfied(&id) {
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.subtask.status = SubtaskStatus::Ready;
                }
                if let Some(next) = self.graph.forward.get(&id) {
                    stack.extend(next.iter().cloned());
                }
            }
        }
    }

    /// Inserts freshly decomposed tasks from a replan. Each gets
    /// `rescueContext` and `attempts = 1` per the replan contract.
    pub fn add_replan_tasks(&mut self, tasks: Vec<SmartSubtask>, wave: &str) {
        for mut subtask in tasks {
            subtask.status = if subtask.dependencies.is_empty() { SubtaskStatus::Ready } else { SubtaskStatus::Blocked };
            self.graph.forward.entry(subtask.id.clone()).or_default();
            self.graph.reverse.insert(subtask.id.clone(), subtask.dependencies.clone());
            for dep in &subtask.dependencies {
                self.graph.forward.entry(dep.clone()).or_default().push(subtask.id.clone());
            }
            let id = subtask.id.clone();
            self.tasks.insert(
                id,
                QueuedTask {
                    subtask,
                    attempts: 1,
                    result_summary: None,
                    rescue_context: Some(format!("Re-planned from stalled swarm ({wave})")),
                    assigned_model: None,
                },
            );
        }
    }

    pub fn get_checkpoint_state(&self) -> QueueCheckpoint {
        QueueCheckpoint {
            tasks: self.tasks.values().cloned().collect(),
            graph: clone_graph(&self.graph),
            max_retries: self.max_retries,
        }
    }

    /// Restores the queue from a checkpoint, then resets any `Failed`
    /// task back to `Ready` (preserving `attempts`) so the retry budget
    /// is honored on resume.
    pub fn restore_from_checkpoint(&mut self, checkpoint: QueueCheckpoint) {
        self.graph = checkpoint.graph;
        self.max_retries = checkpoint.max_retries;
        self.tasks = checkpoint
            .tasks
            .into_iter()
            .map(|mut task| {
                if task.subtask.status == SubtaskStatus::Failed {
                    task.subtask.status = SubtaskStatus::Ready;
                }
                (task.subtask.id.clone(), task)
            })
            .collect();
    }
}

fn clone_graph(graph: &DependencyGraph) -> DependencyGraph {
    DependencyGraph {
        forward: graph.forward.clone(),
        reverse: graph.reverse.clone(),
        execution_order: graph.execution_order.clone(),
        parallel_groups: graph.parallel_groups.clone(),
        cycles: graph.cycles.clone(),
    }
}
