//! Heuristic fallback: keyword-driven task-type/strategy inference and a
//! fixed subtask skeleton per strategy, used when the LLM-assisted path
//! fails twice.
//!
//! Grounded on `router/task_classifier.rs`'s keyword-hit `TaskType`
//! inference, generalized from a fixed six-way enum to the decomposer's
//! open task-type string set.

use super::RawSubtask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Sequential,
    Parallel,
    Hierarchical,
    Pipeline,
    Adaptive,
}

const TASK_TYPE_KEYWORDS: &[(&str, &[&str])] = &[
    ("test", &["test", "spec", "coverage"]),
    ("fix", &["fix", "bug", "broken", "error"]),
    ("refactor", &["refactor", "clean up", "restructure"]),
    ("review", &["review", "audit", "critique"]),
    ("document", &["document", "readme", "docs"]),
    ("design", &["design", "architecture", "plan"]),
    ("research", &["research", "investigate", "explore"]),
    ("deploy", &["deploy", "release", "ship"]),
    ("integrate", &["integrate", "wire up", "connect"]),
];

/// Infers the dominant task type from keyword hits, defaulting to
/// `implement` when nothing matches.
pub fn infer_task_type(goal: &str) -> &'static str {
    let lower = goal.to_lowercase();
    for (task_type, keywords) in TASK_TYPE_KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return task_type;
        }
    }
    "implement"
}

/// Infers an execution strategy from cue words and length.
pub fn infer_strategy(goal: &str) -> Strategy {
    let lower = goal.to_lowercase();
    if lower.contains("in parallel") || lower.contains("concurrently") {
        Strategy::Parallel
    } else if lower.contains("step by step") || lower.contains("one at a time") {
        Strategy::Sequential
    } else if lower.contains("pipeline") || lower.contains("stage") {
        Strategy::Pipeline
    } else if goal.split_whitespace().count() > 40 {
        Strategy::Hierarchical
    } else {
        Strategy::Adaptive
    }
}

/// A fixed skeleton of subtasks for the given strategy, scoped to the
/// inferred primary task type.
pub fn heuristic_skeleton(goal: &str, task_type: &str, strategy: Strategy) -> Vec<RawSubtask> {
    let make = |description: String, dependencies: Vec<String>, task_type: &str, parallelizable: bool| RawSubtask {
        description,
        dependencies,
        complexity: 5,
        task_type: task_type.to_string(),
        parallelizable,
        relevant_files: Vec::new(),
    };

    match strategy {
        Strategy::Sequential => vec![
            make(format!("Explore context for: {goal}"), vec![], "research", false),
            make(format!("{task_type} the core change for: {goal}"), vec!["task-1".to_string()], task_type, false),
            make("Verify the change".to_string(), vec!["task-2".to_string()], "test", false),
        ],
        Strategy::Parallel => vec![
            make(format!("{task_type} part A of: {goal}"), vec![], task_type, true),
            make(format!("{task_type} part B of: {goal}"), vec![], task_type, true),
            make("Merge and verify both parts".to_string(), vec!["task-1".to_string(), "task-2".to_string()], "test", false),
        ],
        Strategy::Hierarchical => vec![
            make(format!("Design the approach for: {goal}"), vec![], "design", false),
            make(format!("{task_type} according to the design"), vec!["task-1".to_string()], task_type, false),
            make("Review against the design".to_string(), vec!["task-2".to_string()], "review", false),
            make("Verify the final result".to_string(), vec!["task-3".to_string()], "test", false),
        ],
        Strategy::Pipeline => vec![
            make(format!("Stage 1: research for {goal}"), vec![], "research", false),
            make("Stage 2: implement".to_string(), vec!["task-1".to_string()], task_type, false),
            make("Stage 3: test".to_string(), vec!["task-2".to_string()], "test", false),
            make("Stage 4: document".to_string(), vec!["task-3".to_string()], "document", false),
        ],
        Strategy::Adaptive => vec![
            make(format!("{task_type} for: {goal}"), vec![], task_type, false),
            make("Verify the change".to_string(), vec!["task-1".to_string()], "test", false),
        ],
    }
}
