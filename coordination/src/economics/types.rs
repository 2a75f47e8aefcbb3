//! Budget, usage, progress, and phase state — the economics data model.
//!
//! Grounded on `memory/budget.rs`'s `TokenBudget`/`BudgetDecision` (the
//! available/validate/threshold idiom) and `escalation/state.rs`'s
//! `EscalationState` (sliding-window history for repeat detection).

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::error::BudgetError;
use crate::pricing;

/// Multi-dimensional execution budget. Hard limits stop the agent; soft
/// limits are advisory wrap-up signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionBudget {
    pub max_tokens: u64,
    pub max_cost: f64,
    pub max_duration_ms: u64,
    pub max_iterations: u64,
    pub soft_token_limit: Option<u64>,
    pub soft_cost_limit: Option<f64>,
    pub soft_duration_limit: Option<u64>,
    pub target_iterations: Option<u64>,
}

impl ExecutionBudget {
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.max_tokens == 0 || self.max_cost <= 0.0 || self.max_duration_ms == 0 || self.max_iterations == 0 {
            return Err(BudgetError::InvalidBudget(
                "every hard limit must be > 0".to_string(),
            ));
        }
        if let Some(soft) = self.soft_token_limit {
            if soft > self.max_tokens {
                return Err(BudgetError::InvalidBudget(
                    "softTokenLimit exceeds maxTokens".to_string(),
                ));
            }
        }
        if let Some(soft) = self.soft_cost_limit {
            if soft > self.max_cost {
                return Err(BudgetError::InvalidBudget(
                    "softCostLimit exceeds maxCost".to_string(),
                ));
            }
        }
        if let Some(soft) = self.soft_duration_limit {
            if soft > self.max_duration_ms {
                return Err(BudgetError::InvalidBudget(
                    "softDurationLimit exceeds maxDuration".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Component-wise increase only — an extension grant never decreases a limit.
    pub fn extend(&mut self, delta: &BudgetDelta) {
        if let Some(d) = delta.tokens {
            self.max_tokens = self.max_tokens.max(self.max_tokens.saturating_add(d));
        }
        if let Some(d) = delta.cost {
            self.max_cost += d.max(0.0);
        }
        if let Some(d) = delta.duration_ms {
            self.max_duration_ms = self.max_duration_ms.saturating_add(d);
        }
        if let Some(d) = delta.iterations {
            self.max_iterations = self.max_iterations.saturating_add(d);
        }
    }
}

/// A partial budget increase granted by an extension handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetDelta {
    pub tokens: Option<u64>,
    pub cost: Option<f64>,
    pub duration_ms: Option<u64>,
    pub iterations: Option<u64>,
}

/// Four named presets with strictly increasing hard limits Quick < Standard <
/// Large; Subagent and Swarm-worker are smaller than Large on every dimension.
pub mod presets {
    use super::ExecutionBudget;

    pub fn quick() -> ExecutionBudget {
        ExecutionBudget {
            max_tokens: 50_000,
            max_cost: 1.0,
            max_duration_ms: 5 * 60_000,
            max_iterations: 10,
            soft_token_limit: Some(40_000),
            soft_cost_limit: Some(0.8),
            soft_duration_limit: Some(4 * 60_000),
            target_iterations: Some(8),
        }
    }

    pub fn standard() -> ExecutionBudget {
        ExecutionBudget {
            max_tokens: 200_000,
            max_cost: 5.0,
            max_duration_ms: 20 * 60_000,
            max_iterations: 40,
            soft_token_limit: Some(160_000),
            soft_cost_limit: Some(4.0),
            soft_duration_limit: Some(16 * 60_000),
            target_iterations: Some(30),
        }
    }

    pub fn large() -> ExecutionBudget {
        ExecutionBudget {
            max_tokens: 800_000,
            max_cost: 20.0,
            max_duration_ms: 60 * 60_000,
            max_iterations: 150,
            soft_token_limit: Some(640_000),
            soft_cost_limit: Some(16.0),
            soft_duration_limit: Some(48 * 60_000),
            target_iterations: Some(120),
        }
    }

    pub fn subagent() -> ExecutionBudget {
        ExecutionBudget {
            max_tokens: 100_000,
            max_cost: 3.0,
            max_duration_ms: 15 * 60_000,
            max_iterations: 30,
            soft_token_limit: Some(80_000),
            soft_cost_limit: Some(2.4),
            soft_duration_limit: Some(12 * 60_000),
            target_iterations: Some(24),
        }
    }

    pub fn swarm_worker() -> ExecutionBudget {
        ExecutionBudget {
            max_tokens: 80_000,
            max_cost: 2.5,
            max_duration_ms: 12 * 60_000,
            max_iterations: 25,
            soft_token_limit: Some(64_000),
            soft_cost_limit: Some(2.0),
            soft_duration_limit: Some(9 * 60_000),
            target_iterations: Some(20),
        }
    }
}

/// Running counters updated monotonically by `recordLLMUsage`/`recordToolCall`.
#[derive(Debug)]
pub struct ExecutionUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub iterations: u64,
    pub llm_calls: u64,
    started_at: Instant,
    paused_at: Option<Instant>,
    accumulated_pause: Duration,
}

impl Default for ExecutionUsage {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionUsage {
    pub fn new() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            iterations: 0,
            llm_calls: 0,
            started_at: Instant::now(),
            paused_at: None,
            accumulated_pause: Duration::ZERO,
        }
    }

    pub fn tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn duration_ms(&self) -> u64 {
        let now = Instant::now();
        let pause = self.accumulated_pause
            + self
                .paused_at
                .map(|p| now.saturating_duration_since(p))
                .unwrap_or(Duration::ZERO);
        now.saturating_duration_since(self.started_at)
            .saturating_sub(pause)
            .as_millis() as u64
    }

    /// Excludes the paused interval from effective duration. Idempotent.
    pub fn pause_duration(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    /// No-op if not currently paused.
    pub fn resume_duration(&mut self) {
        if let Some(p) = self.paused_at.take() {
            self.accumulated_pause += Instant::now().saturating_duration_since(p);
        }
    }

    pub fn record_llm_usage(
        &mut self,
        input_tokens: u64,
        output_tokens: u64,
        model: Option<&str>,
        actual_cost: Option<f64>,
    ) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.llm_calls += 1;
        self.cost += actual_cost.unwrap_or_else(|| pricing::estimate_cost(input_tokens, output_tokens, model));
    }

    pub fn record_tool_call(&mut self) {
        self.iterations += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Sets/counters used for stuckness detection.
#[derive(Debug)]
pub struct ProgressState {
    pub files_read: HashSet<String>,
    pub files_modified: HashSet<String>,
    pub commands_run: u64,
    fingerprints: VecDeque<String>,
    last_meaningful_progress: Instant,
    pub stuck_count: u32,
}

const FINGERPRINT_WINDOW: usize = 10;

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressState {
    pub fn new() -> Self {
        Self {
            files_read: HashSet::new(),
            files_modified: HashSet::new(),
            commands_run: 0,
            fingerprints: VecDeque::with_capacity(FINGERPRINT_WINDOW),
            last_meaningful_progress: Instant::now(),
            stuck_count: 0,
        }
    }

    pub fn record_file_read(&mut self, path: impl Into<String>) {
        self.files_read.insert(path.into());
    }

    pub fn record_file_modified(&mut self, path: impl Into<String>) {
        self.files_modified.insert(path.into());
        self.mark_progress();
    }

    pub fn record_command(&mut self) {
        self.commands_run += 1;
    }

    pub fn mark_progress(&mut self) {
        self.last_meaningful_progress = Instant::now();
        self.stuck_count = 0;
    }

    /// Pushes a fingerprint (e.g. `tool_name(args)`) into the last-10 window.
    pub fn push_fingerprint(&mut self, fingerprint: impl Into<String>) {
        if self.fingerprints.len() == FINGERPRINT_WINDOW {
            self.fingerprints.pop_front();
        }
        self.fingerprints.push_back(fingerprint.into());
    }

    /// True if the last 3 (or more) fingerprints are identical — a doom loop.
    pub fn has_repeated_tool_call(&self, repeat_count: usize) -> bool {
        if self.fingerprints.len() < repeat_count {
            return false;
        }
        let last = self.fingerprints.back().unwrap();
        self.fingerprints
            .iter()
            .rev()
            .take(repeat_count)
            .all(|f| f == last)
    }

    pub fn seconds_since_progress(&self) -> u64 {
        Instant::now()
            .saturating_duration_since(self.last_meaningful_progress)
            .as_secs()
    }
}

/// `exploring → acting → verifying`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Exploring,
    Acting,
    Verifying,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Exploring => "exploring",
            Phase::Acting => "acting",
            Phase::Verifying => "verifying",
        }
    }
}

#[derive(Debug)]
pub struct PhaseState {
    pub phase: Phase,
    pub unique_files_read: HashSet<String>,
    pub tests_run: u32,
    pub consecutive_test_failures: u32,
    pub last_test_passed: Option<bool>,
    pub in_test_fix_cycle: bool,
    /// Tool-call iterations recorded while `phase == Exploring`, for the
    /// exploration-iteration-share phase-budget check.
    pub exploration_iterations: u64,
    edit_since_last_phase_check: bool,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Exploring,
            unique_files_read: HashSet::new(),
            tests_run: 0,
            consecutive_test_failures: 0,
            last_test_passed: None,
            in_test_fix_cycle: false,
            exploration_iterations: 0,
            edit_since_last_phase_check: false,
        }
    }

    /// Returns `Some((from, to))` if the tool call caused a phase transition.
    pub fn on_file_read(&mut self, path: impl Into<String>) {
        self.unique_files_read.insert(path.into());
    }

    /// Bumps the exploration-iteration counter if still exploring. Called
    /// once per tool-call iteration.
    pub fn on_iteration(&mut self) {
        if self.phase == Phase::Exploring {
            self.exploration_iterations += 1;
        }
    }

    /// Whether a file has been mutated since the last test-triggered phase
    /// check — used to tell a genuine test-fix cycle from test failures that
    /// predate any edit at all.
    pub fn has_pending_edit(&self) -> bool {
        self.edit_since_last_phase_check
    }

    pub fn on_file_mutated(&mut self) -> Option<(Phase, Phase)> {
        self.edit_since_last_phase_check = true;
        if self.phase == Phase::Exploring {
            let from = self.phase;
            self.phase = Phase::Acting;
            Some((from, self.phase))
        } else {
            None
        }
    }

    pub fn on_test_like_shell(&mut self, passed: bool) -> Option<(Phase, Phase)> {
        self.tests_run += 1;
        if passed {
            self.consecutive_test_failures = 0;
            self.in_test_fix_cycle = false;
        } else {
            self.consecutive_test_failures += 1;
        }
        self.last_test_passed = Some(passed);

        if self.edit_since_last_phase_check && self.phase != Phase::Verifying {
            let from = self.phase;
            self.phase = Phase::Verifying;
            Some((from, self.phase))
        } else {
            None
        }
    }
}
