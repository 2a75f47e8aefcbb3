//! Component F: turns a goal into a dependency-ordered subtask DAG.

mod graph;
mod heuristic;

pub use graph::{build_dependency_graph, Conflict, ConflictSeverity, DependencyGraph};
pub use heuristic::{infer_strategy, infer_task_type, heuristic_skeleton, Strategy};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core_events::{CoreEvent, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Ready,
    Blocked,
    InProgress,
    Completed,
    Failed,
    Skipped,
    /// Superseded by a fresh decomposition during a replan; counts as
    /// satisfied for dependents' readiness the same way `Completed` does.
    Decomposed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartSubtask {
    pub id: String,
    pub description: String,
    pub status: SubtaskStatus,
    pub dependencies: Vec<String>,
    pub complexity: u8,
    pub task_type: String,
    pub parallelizable: bool,
    pub modifies: Vec<String>,
    pub reads: Vec<String>,
    pub relevant_files: Vec<String>,
    pub suggested_role: Option<String>,
    pub estimated_tokens: Option<u64>,
}

const MODIFYING_TYPES: &[&str] = &["implement", "fix", "refactor", "integrate", "test", "deploy"];

#[derive(Debug, Default)]
pub struct SmartDecompositionResult {
    pub subtasks: Vec<SmartSubtask>,
    pub graph: DependencyGraph,
    pub conflicts: Vec<Conflict>,
}

#[derive(Debug, Clone, Copy)]
pub struct DecomposeConfig {
    pub max_subtasks: usize,
    pub detect_conflicts: bool,
}

impl Default for DecomposeConfig {
    fn default() -> Self {
        Self { max_subtasks: 20, detect_conflicts: true }
    }
}

/// One raw subtask field set as parsed from an LLM's decomposition
/// response, before dependency-string resolution and post-processing.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSubtask {
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_complexity")]
    pub complexity: u8,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default)]
    pub parallelizable: bool,
    #[serde(default)]
    pub relevant_files: Vec<String>,
}

fn default_complexity() -> u8 {
    5
}

fn default_task_type() -> String {
    "implement".to_string()
}

fn reference_patterns(index: usize) -> [String; 3] {
    [format!("task-{index}"), format!("subtask-{index}"), format!("st-{index}")]
}

/// Resolves dependency strings against sibling descriptions, positional
/// indices, and the `task-N`/`subtask-N`/`st-N` reference patterns.
/// Self-references and references to unknown IDs are dropped.
fn resolve_dependencies(raw: &[RawSubtask], ids: &[String], events: &EventBus) -> Vec<Vec<String>> {
    raw.iter()
        .enumerate()
        .map(|(i, subtask)| {
            let my_id = &ids[i];
            let mut resolved = Vec::new();
            for dep in &subtask.dependencies {
                let dep = dep.trim();
                let target = ids.iter().enumerate().find_map(|(j, id)| {
                    let patterns = reference_patterns(j + 1);
                    if id == dep || patterns.iter().any(|p| p == dep) {
                        Some(id.clone())
                    } else {
                        None
                    }
                });
                match target {
                    Some(t) if &t == my_id => {
                        events.publish(CoreEvent::DecomposeUnknownDependency {
                            task_id: my_id.clone(),
                            dependency_id: dep.to_string(),
                        });
                    }
                    Some(t) => resolved.push(t),
                    None => {
                        events.publish(CoreEvent::DecomposeUnknownDependency {
                            task_id: my_id.clone(),
                            dependency_id: dep.to_string(),
                        });
                    }
                }
            }
            resolved
        })
        .collect()
}

fn to_subtasks(raw: Vec<RawSubtask>, events: &EventBus) -> Vec<SmartSubtask> {
    let ids: Vec<String> = (0..raw.len()).map(|i| format!("task-{}", i + 1)).collect();
    let resolved_deps = resolve_dependencies(&raw, &ids, events);

    raw.into_iter()
        .zip(ids)
        .zip(resolved_deps)
        .map(|((r, id), dependencies)| {
            let modifies = if MODIFYING_TYPES.contains(&r.task_type.as_str()) {
                r.relevant_files.clone()
            } else {
                Vec::new()
            };
            SmartSubtask {
                id,
                description: r.description,
                status: SubtaskStatus::Pending,
                dependencies,
                complexity: r.complexity,
                task_type: r.task_type,
                parallelizable: r.parallelizable,
                modifies,
                reads: r.relevant_files.clone(),
                relevant_files: r.relevant_files,
                suggested_role: None,
                estimated_tokens: None,
            }
        })
        .collect()
}

/// Builds a final decomposition result from a set of raw (LLM-parsed or
/// heuristic) subtasks: resolves dependencies, caps at `max_subtasks`,
/// builds the dependency graph, and optionally detects conflicts.
pub fn finalize(raw: Vec<RawSubtask>, config: DecomposeConfig, events: &EventBus) -> SmartDecompositionResult {
    let mut subtasks = to_subtasks(raw, events);
    subtasks.truncate(config.max_subtasks);

    // Dropping subtasks from the cap can leave dangling dependency ids;
    // filter those out rather than leaving an invalid reference.
    let valid_ids: HashSet<&str> = subtasks.iter().map(|t| t.id.as_str()).collect();
    for subtask in &mut subtasks {
        subtask.dependencies.retain(|d| valid_ids.contains(d.as_str()));
    }

    let graph = build_dependency_graph(&subtasks, events);
    let conflicts = if config.detect_conflicts {
        graph::detect_conflicts(&subtasks)
    } else {
        Vec::new()
    };

    SmartDecompositionResult { subtasks, graph, conflicts }
}

/// Runs the heuristic fallback path end to end: infer task type and
/// strategy from the goal text, generate a fixed skeleton, and finalize.
pub fn decompose_heuristic(goal: &str, config: DecomposeConfig, events: &EventBus) -> SmartDecompositionResult {
    let task_type = infer_task_type(goal);
    let strategy = infer_strategy(goal);
    let raw = heuristic_skeleton(goal, task_type, strategy);
    finalize(raw, config, events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_strings_resolve_against_reference_patterns() {
        let raw = vec![
            RawSubtask {
                description: "design the schema".to_string(),
                dependencies: vec![],
                complexity: 3,
                task_type: "design".to_string(),
                parallelizable: false,
                relevant_files: vec![],
            },
            RawSubtask {
                description: "implement the schema".to_string(),
                dependencies: vec!["task-1".to_string()],
                complexity: 5,
                task_type: "implement".to_string(),
                parallelizable: false,
                relevant_files: vec!["schema.rs".to_string()],
            },
        ];
        let events = EventBus::new();
        let result = finalize(raw, DecomposeConfig::default(), &events);
        assert_eq!(result.subtasks[1].dependencies, vec!["task-1".to_string()]);
    }

    #[test]
    fn self_reference_is_dropped() {
        let raw = vec![RawSubtask {
            description: "a".to_string(),
            dependencies: vec!["task-1".to_string()],
            complexity: 1,
            task_type: "research".to_string(),
            parallelizable: false,
            relevant_files: vec![],
        }];
        let events = EventBus::new();
        let result = finalize(raw, DecomposeConfig::default(), &events);
        assert!(result.subtasks[0].dependencies.is_empty());
    }

    #[test]
    fn modifies_populated_only_for_mutating_types() {
        let raw = vec![
            RawSubtask {
                description: "research".to_string(),
                dependencies: vec![],
                complexity: 2,
                task_type: "research".to_string(),
                parallelizable: true,
                relevant_files: vec!["notes.md".to_string()],
            },
            RawSubtask {
                description: "implement".to_string(),
                dependencies: vec![],
                complexity: 5,
                task_type: "implement".to_string(),
                parallelizable: false,
                relevant_files: vec!["lib.rs".to_string()],
            },
        ];
        let events = EventBus::new();
        let result = finalize(raw, DecomposeConfig::default(), &events);
        assert!(result.subtasks[0].modifies.is_empty());
        assert_eq!(result.subtasks[0].reads, vec!["notes.md".to_string()]);
        assert_eq!(result.subtasks[1].modifies, vec!["lib.rs".to_string()]);
    }

    #[test]
    fn max_subtasks_caps_and_drops_dangling_dependencies() {
        let raw = vec![
            RawSubtask {
                description: "a".to_string(),
                dependencies: vec![],
                complexity: 1,
                task_type: "research".to_string(),
                parallelizable: true,
                relevant_files: vec![],
            },
            RawSubtask {
                description: "b".to_string(),
                dependencies: vec!["task-1".to_string()],
                complexity: 1,
                task_type: "implement".to_string(),
                parallelizable: false,
                relevant_files: vec![],
            },
        ];
        let config = DecomposeConfig { max_subtasks: 1, detect_conflicts: false };
        let events = EventBus::new();
        let result = finalize(raw, config, &events);
        assert_eq!(result.subtasks.len(), 1);
    }
}
