//! Component I: a checkpointable wave engine driving the task queue
//! over the decomposer's DAG — plan, dispatch waves, collect results,
//! assess and adapt between waves, terminate, resume.
//!
//! Grounded on `harness/session.rs`'s phase-machine-over-a-checkpoint
//! shape (plan → iterate → assess → terminate, with a resumable state
//! struct at every boundary) and `slurm/mod.rs`'s staggered-dispatch job
//! submission.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::budget_pool::{BudgetPool, ChildBudget};
use crate::core_events::{CoreEvent, EventBus};
use crate::decompose::{SmartSubtask, SubtaskStatus};
use crate::queue::{QueueCheckpoint, TaskQueue};

/// One child dispatch's outcome, as reported back by whatever actually
/// ran the subagent (the spawner). This crate never spawns an agent
/// itself inside the orchestrator — dispatch is a seam.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub success: bool,
    pub retries_left: u32,
    pub tool_calls: u32,
    pub output_len: usize,
    pub tokens_used: u64,
    pub cost_used: f64,
}

/// The orchestrator's only outbound call for running one subtask.
/// Implemented by the embedding application (typically backed by
/// `Spawner::spawn`); this crate only decides *when* and *with what
/// budget* to call it.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, task: &SmartSubtask, budget: ChildBudget) -> DispatchOutcome;
}

/// The orchestrator's only outbound call for a fresh decomposition
/// attempt during planning or a replan. Returns `None` on failure.
#[async_trait]
pub trait GoalDecomposer: Send + Sync {
    async fn decompose(&self, goal: &str) -> Option<Vec<SmartSubtask>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub max_concurrency: usize,
    pub dispatch_stagger_ms: u64,
    pub max_retries: u32,
    /// Default off — see the Open Question resolution in DESIGN.md.
    pub enable_hollow_termination: bool,
    pub hollow_termination_min_dispatches: u32,
    pub hollow_termination_ratio: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            dispatch_stagger_ms: 250,
            max_retries: 2,
            enable_hollow_termination: false,
            hollow_termination_min_dispatches: 5,
            hollow_termination_ratio: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct HollowTracker {
    consecutive_streak: u32,
    total_dispatches: u32,
    hollow_dispatches: u32,
}

impl HollowTracker {
    fn record(&mut self, hollow: bool) {
        self.total_dispatches += 1;
        if hollow {
            self.hollow_dispatches += 1;
            self.consecutive_streak += 1;
        } else {
            self.consecutive_streak = 0;
        }
    }

    fn ratio(&self) -> f64 {
        if self.total_dispatches == 0 {
            0.0
        } else {
            self.hollow_dispatches as f64 / self.total_dispatches as f64
        }
    }
}

/// A `SmartSubtask` is "hollow" when a dispatch produced no tool calls
/// and a suspiciously short output — likely an agent that didn't
/// actually do the work.
const HOLLOW_OUTPUT_LEN_CEILING: usize = 80;

fn is_hollow(outcome: &DispatchOutcome) -> bool {
    outcome.tool_calls == 0 && outcome.output_len < HOLLOW_OUTPUT_LEN_CEILING
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmCheckpoint {
    pub original_prompt: String,
    pub queue: QueueCheckpoint,
    pub wave: u32,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    events: EventBus,
    queue: TaskQueue,
    pool: BudgetPool,
    original_prompt: String,
    wave: u32,
    hollow: HollowTracker,
    status: SwarmStatus,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, events: EventBus, pool: BudgetPool) -> Self {
        Self {
            queue: TaskQueue::new(config.max_retries),
            config,
            events,
            pool,
            original_prompt: String::new(),
            wave: 0,
            hollow: HollowTracker::default(),
            status: SwarmStatus::Running,
        }
    }

    pub fn status(&self) -> SwarmStatus {
        self.status
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Decomposes the goal (via `decomposer`, retried twice) and seeds
    /// the queue. On total LLM failure, falls back to a single task that
    /// covers the whole goal verbatim, not the heuristic multi-task
    /// skeleton — that fallback belongs to the decomposer itself, this
    /// is the orchestrator's own last resort.
    pub async fn plan(&mut self, goal: &str, decomposer: &dyn GoalDecomposer) {
        self.original_prompt = goal.to_string();

        let mut subtasks = None;
        for _ in 0..2 {
            if let Some(tasks) = decomposer.decompose(goal).await {
                subtasks = Some(tasks);
                break;
            }
        }

        let result = match subtasks {
            Some(tasks) => {
                let graph = crate::decompose::build_dependency_graph(&tasks, &self.events);
                crate::decompose::SmartDecompositionResult { subtasks: tasks, graph, conflicts: Vec::new() }
            }
            None => {
                self.events.publish(CoreEvent::SwarmOrchestratorDecision {
                    decision: "plan-fallback".to_string(),
                    detail: "LLM decomposition failed twice; falling back to a single whole-goal task".to_string(),
                });
                decompose_heuristic_single_task(goal, &self.events)
            }
        };

        self.queue.load_from_decomposition(result);
        self.wave = 0;
    }

    /// Runs waves until no task is ready or blocked.
    pub async fn run(&mut self, dispatcher: &dyn TaskDispatcher, decomposer: &dyn GoalDecomposer) {
        loop {
            let ready = self.queue.ready_tasks();
            if ready.is_empty() {
                if self.queue_has_unresolved() {
                    break;
                }
                self.terminate();
                return;
            }

            self.wave += 1;
            self.dispatch_wave(dispatcher).await;
            self.assess_and_adapt(decomposer).await;

            if self.status != SwarmStatus::Running {
                return;
            }
        }
        self.terminate();
    }

    fn queue_has_unresolved(&self) -> bool {
        self.queue
            .get_all_tasks()
            .iter()
            .any(|t| matches!(t.subtask.status, SubtaskStatus::Ready | SubtaskStatus::Blocked))
    }

    /// Dispatches up to `max_concurrency` ready tasks of the current
    /// wave, staggered by `dispatch_stagger_ms`, each under its own pool
    /// reservation.
    async fn dispatch_wave(&mut self, dispatcher: &dyn TaskDispatcher) {
        let batch: Vec<String> = self
            .queue
            .ready_tasks()
            .into_iter()
            .take(self.config.max_concurrency)
            .map(|t| t.subtask.id.clone())
            .collect();

        for (i, id) in batch.iter().enumerate() {
            if i > 0 && self.config.dispatch_stagger_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.config.dispatch_stagger_ms)).await;
            }
            self.dispatch_one(id, dispatcher).await;
        }
    }

    async fn dispatch_one(&mut self, id: &str, dispatcher: &dyn TaskDispatcher) {
        let Some(budget) = self.pool.reserve(id) else {
            self.events.publish(CoreEvent::SwarmOrchestratorDecision {
                decision: "budget-wait".to_string(),
                detail: format!("no budget slice available to dispatch {id}"),
            });
            return;
        };

        let task = self.queue.get_task(id).unwrap().subtask.clone();
        self.queue.mark_dispatched(id, "default");

        let outcome = dispatcher.dispatch(&task, budget).await;
        self.pool.record_usage(id, outcome.tokens_used, outcome.cost_used);
        self.pool.release(id);

        self.hollow.record(is_hollow(&outcome));

        if outcome.success {
            self.queue.mark_completed(id, format!("{} tool calls", outcome.tool_calls), &self.events);
            self.queue.un_skip_dependents(id);
        } else {
            self.queue.mark_failed(id, outcome.retries_left, &self.events);
            if outcome.retries_left == 0 {
                self.events.publish(CoreEvent::SwarmTaskSkipped {
                    task_id: id.to_string(),
                    reason: "failed with no retries remaining; dependents cascade-skipped".to_string(),
                });
            }
        }
    }

    /// After each wave: checkpoint (left to the caller via
    /// `checkpoint()`), budget triage, hollow-completion accounting,
    /// replan if stalled.
    async fn assess_and_adapt(&mut self, decomposer: &dyn GoalDecomposer) {
        self.budget_triage();
        self.hollow_completion_check();
        if self.status == SwarmStatus::Running && self.is_stalled() {
            self.replan(decomposer).await;
        }
    }

    fn workers_running(&self) -> bool {
        self.queue.get_all_tasks().iter().any(|t| t.subtask.status == SubtaskStatus::InProgress)
    }

    /// If remaining budget can't cover remaining tasks and nothing is
    /// running, skip up to `ceil(remaining * 0.2)` expendable tasks in
    /// one pass. Expendable = `(pending|ready) ∧ attempts=0 ∧
    /// ¬isFoundation ∧ complexity ≤ 2 ∧ no dependents`.
    fn budget_triage(&mut self) {
        if self.workers_running() {
            self.events.publish(CoreEvent::SwarmOrchestratorDecision {
                decision: "budget-wait".to_string(),
                detail: "workers still running; triage deferred this round".to_string(),
            });
            return;
        }

        let remaining_tasks: Vec<String> = self
            .queue
            .get_all_tasks()
            .iter()
            .filter(|t| matches!(t.subtask.status, SubtaskStatus::Pending | SubtaskStatus::Ready | SubtaskStatus::Blocked))
            .map(|t| t.subtask.id.clone())
            .collect();
        if remaining_tasks.is_empty() {
            return;
        }

        let available = self.pool.available_tokens();
        let estimated_need = remaining_tasks.len() as u64 * 2_000;
        if available >= estimated_need {
            return;
        }

        let has_dependents: HashSet<String> =
            self.queue.get_all_tasks().iter().flat_map(|t| t.subtask.dependencies.clone()).collect();

        let expendable: Vec<String> = self
            .queue
            .get_all_tasks()
            .iter()
            .filter(|t| {
                matches!(t.subtask.status, SubtaskStatus::Pending | SubtaskStatus::Ready)
                    && t.attempts == 0
                    && t.subtask.complexity <= 2
                    && !has_dependents.contains(&t.subtask.id)
            })
            .map(|t| t.subtask.id.clone())
            .collect();

        let budget = (remaining_tasks.len() as f64 * 0.2).ceil() as usize;
        for id in expendable.into_iter().take(budget.max(1)) {
            self.skip_task(&id, "budget-triage");
        }
        self.events.publish(CoreEvent::SwarmOrchestratorDecision {
            decision: "budget-triage".to_string(),
            detail: format!("remaining budget insufficient for {} task(s); skipped up to {budget}", remaining_tasks.len()),
        });
    }

    fn skip_task(&mut self, id: &str, reason: &str) {
        self.queue.mark_failed(id, 0, &self.events);
        self.events.publish(CoreEvent::SwarmTaskSkipped { task_id: id.to_string(), reason: reason.to_string() });
    }

    /// Streak ≥ 3, or enough dispatches at a high enough ratio, triggers
    /// bulk-skip when `enable_hollow_termination` is set. Otherwise only
    /// warns.
    fn hollow_completion_check(&mut self) {
        let streak_triggers = self.hollow.consecutive_streak >= 3;
        let ratio_triggers = self.hollow.total_dispatches >= self.config.hollow_termination_min_dispatches
            && self.hollow.ratio() >= self.config.hollow_termination_ratio;

        if !streak_triggers && !ratio_triggers {
            return;
        }

        if !self.config.enable_hollow_termination {
            self.events.publish(CoreEvent::SwarmOrchestratorDecision {
                decision: "stall-warning".to_string(),
                detail: format!(
                    "hollow streak={} ratio={:.2}",
                    self.hollow.consecutive_streak,
                    self.hollow.ratio()
                ),
            });
            return;
        }

        let remaining: Vec<String> = self
            .queue
            .get_all_tasks()
            .iter()
            .filter(|t| matches!(t.subtask.status, SubtaskStatus::Pending | SubtaskStatus::Ready | SubtaskStatus::Blocked))
            .map(|t| t.subtask.id.clone())
            .collect();
        for id in &remaining {
            self.skip_task(id, "early-termination");
        }
        self.events.publish(CoreEvent::SwarmOrchestratorDecision {
            decision: "early-termination".to_string(),
            detail: format!("bulk-skipped {} remaining task(s) after sustained hollow completions", remaining.len()),
        });
    }

    /// Stalled: no task ready, at least one blocked, and nothing in
    /// flight — progress can't happen without intervention.
    fn is_stalled(&self) -> bool {
        let tasks = self.queue.get_all_tasks();
        let any_ready = tasks.iter().any(|t| t.subtask.status == SubtaskStatus::Ready);
        let any_blocked = tasks.iter().any(|t| t.subtask.status == SubtaskStatus::Blocked);
        !any_ready && any_blocked && !self.workers_running()
    }

    async fn replan(&mut self, decomposer: &dyn GoalDecomposer) {
        self.events.publish(CoreEvent::SwarmOrchestratorDecision {
            decision: "stall-mode".to_string(),
            detail: "no ready tasks with blocked dependents; requesting a fresh decomposition".to_string(),
        });
        if let Some(tasks) = decomposer.decompose(&self.original_prompt).await {
            let wave = format!("wave-{}", self.wave);
            self.queue.add_replan_tasks(tasks, &wave);
            self.events.publish(CoreEvent::SwarmOrchestratorDecision {
                decision: "replan".to_string(),
                detail: format!("inserted replanned tasks at {wave}"),
            });
        } else {
            self.status = SwarmStatus::Failed;
        }
    }

    /// Finalizes status: `Completed` if every non-skipped task
    /// completed, `Failed` if any task with no dependents that itself
    /// had no dependencies (a foundation task) failed.
    fn terminate(&mut self) {
        let tasks = self.queue.get_all_tasks();
        let any_foundation_failed = tasks
            .iter()
            .any(|t| t.subtask.dependencies.is_empty() && t.subtask.status == SubtaskStatus::Failed);
        self.status = if any_foundation_failed { SwarmStatus::Failed } else { SwarmStatus::Completed };
    }

    pub fn checkpoint(&self) -> SwarmCheckpoint {
        SwarmCheckpoint {
            original_prompt: self.original_prompt.clone(),
            queue: self.queue.get_checkpoint_state(),
            wave: self.wave,
        }
    }

    /// Restores the queue (resetting failed tasks to ready, preserving
    /// attempts) and re-derives readiness for every dependency satisfied
    /// since the checkpoint was taken.
    pub fn resume(&mut self, checkpoint: SwarmCheckpoint) {
        self.original_prompt = checkpoint.original_prompt;
        self.wave = checkpoint.wave;
        self.queue.restore_from_checkpoint(checkpoint.queue);
        let completed_ids: Vec<String> = self
            .queue
            .get_all_tasks()
            .iter()
            .filter(|t| matches!(t.subtask.status, SubtaskStatus::Completed | SubtaskStatus::Decomposed))
            .map(|t| t.subtask.id.clone())
            .collect();
        for id in completed_ids {
            self.queue.un_skip_dependents(&id);
        }
        self.status = SwarmStatus::Running;
    }
}

fn decompose_heuristic_single_task(goal: &str, events: &EventBus) -> crate::decompose::SmartDecompositionResult {
    let task_type = crate::decompose::infer_task_type(goal);
    let task = SmartSubtask {
        id: "task-1".to_string(),
        description: goal.to_string(),
        status: SubtaskStatus::Ready,
        dependencies: Vec::new(),
        complexity: 5,
        task_type: task_type.to_string(),
        parallelizable: false,
        modifies: Vec::new(),
        reads: Vec::new(),
        relevant_files: Vec::new(),
        suggested_role: None,
        estimated_tokens: None,
    };
    let graph = crate::decompose::build_dependency_graph(std::slice::from_ref(&task), events);
    crate::decompose::SmartDecompositionResult { subtasks: vec![task], graph, conflicts: Vec::new() }
}
