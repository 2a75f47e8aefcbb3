//! `EconomicsManager`: the decision engine wrapping budget, usage, progress,
//! and phase state into a single `check_budget` call.
//!
//! Grounded on `escalation/engine.rs`'s staged decision function (evaluate
//! counters in a fixed order, return the first decisive outcome) and
//! `memory/budget.rs`'s threshold-percentage event emission.

use std::sync::Mutex;

use crate::core_events::{CoreEvent, EventBus};

use super::types::{BudgetDelta, ExecutionBudget, ExecutionUsage, Phase, PhaseState, ProgressState};

/// Repeated identical tool-call fingerprints within the window before the
/// agent is considered doom-looping.
const STUCK_REPEAT_THRESHOLD: usize = 3;
/// Seconds without meaningful progress before the agent is considered idle-stuck.
const STUCK_IDLE_SECONDS: u64 = 60;
/// Idle-timeout stuckness only fires once at least this many iterations have
/// run — a fresh agent hasn't made "no progress", it just hasn't started.
const STUCK_MIN_ITERATIONS: u64 = 5;
/// Consecutive same-tests-failing runs before a test-fix cycle is flagged.
const TEST_FIX_CYCLE_THRESHOLD: u32 = 3;
/// Unique files read while still exploring, with zero edits, before the
/// agent is nudged to start making changes.
const EXPLORATION_SATURATION_FILES: usize = 10;
/// Fraction of a hard limit at which wrap-up becomes urgent (forceTextOnly).
const SOFT_URGENT_PERCENT: f64 = 0.8;
/// Fraction of a hard limit at which an extension is worth requesting.
const SOFT_WARN_PERCENT: f64 = 0.67;
/// Extension requests are granted at 1.5x the caller-suggested delta, capped
/// to this many grants per manager lifetime.
const MAX_EXTENSIONS: u32 = 2;

const MAX_ITERATIONS_PROMPT: &str =
    "Maximum steps reached. Summarize your work and finalize your answer now. Do NOT call any more tools.";
const DOOM_LOOP_PROMPT: &str =
    "You appear to be repeating the same action without making progress. Stop, reconsider your approach, and try something different.";
const START_EDITING_PROMPT: &str =
    "You've read many files without making any changes. Start editing now.";
const DIFFERENT_STRATEGY_PROMPT: &str =
    "Tests have failed repeatedly despite edits. Try a different strategy rather than repeating the same fix.";
const EXPLORATION_BUDGET_PROMPT: &str =
    "You're spending too much of your budget exploring. Move to making changes.";
const RESERVE_VERIFICATION_PROMPT: &str =
    "Little budget remains and no tests have been run yet. Leave room to verify your changes before finishing.";

/// Which dimension a budget decision pertains to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetType {
    Tokens,
    Cost,
    Duration,
    Iterations,
}

impl BudgetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetType::Tokens => "tokens",
            BudgetType::Cost => "cost",
            BudgetType::Duration => "duration",
            BudgetType::Iterations => "iterations",
        }
    }
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestedAction {
    Continue,
    Stop,
    RequestExtension,
}

/// The full shape of a `check_budget` decision.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDecision {
    pub can_continue: bool,
    pub is_hard_limit: bool,
    pub is_soft_limit: bool,
    pub budget_type: Option<BudgetType>,
    pub suggested_action: SuggestedAction,
    pub force_text_only: bool,
    pub injected_prompt: Option<String>,
}

impl BudgetDecision {
    fn continue_now() -> Self {
        Self {
            can_continue: true,
            is_hard_limit: false,
            is_soft_limit: false,
            budget_type: None,
            suggested_action: SuggestedAction::Continue,
            force_text_only: false,
            injected_prompt: None,
        }
    }

    fn with_prompt(prompt: &str) -> Self {
        Self {
            injected_prompt: Some(prompt.to_string()),
            ..Self::continue_now()
        }
    }
}

/// Governs the exploration/verification balance of a single execution.
#[derive(Debug, Clone, Copy)]
pub struct PhaseBudgetConfig {
    /// Share of all recorded iterations that may be spent exploring before
    /// the agent is nudged toward editing.
    pub max_exploration_percent: f64,
    /// Fraction of total budget that must be reserved for verification; if
    /// less than this remains and no tests have run yet, the agent is warned.
    pub reserved_verification_percent: f64,
}

impl Default for PhaseBudgetConfig {
    fn default() -> Self {
        Self {
            max_exploration_percent: 0.5,
            reserved_verification_percent: 0.2,
        }
    }
}

pub struct EconomicsManager {
    budget: Mutex<ExecutionBudget>,
    usage: Mutex<ExecutionUsage>,
    progress: Mutex<ProgressState>,
    phase: Mutex<PhaseState>,
    events: EventBus,
    extensions_granted: Mutex<u32>,
    phase_budget: PhaseBudgetConfig,
}

impl EconomicsManager {
    pub fn new(budget: ExecutionBudget, events: EventBus) -> Self {
        Self {
            budget: Mutex::new(budget),
            usage: Mutex::new(ExecutionUsage::new()),
            progress: Mutex::new(ProgressState::new()),
            phase: Mutex::new(PhaseState::new()),
            events,
            extensions_granted: Mutex::new(0),
            phase_budget: PhaseBudgetConfig::default(),
        }
    }

    pub fn with_phase_budget(mut self, phase_budget: PhaseBudgetConfig) -> Self {
        self.phase_budget = phase_budget;
        self
    }

    pub fn record_llm_usage(&self, input_tokens: u64, output_tokens: u64, model: Option<&str>, actual_cost: Option<f64>) {
        self.usage.lock().unwrap().record_llm_usage(input_tokens, output_tokens, model, actual_cost);
    }

    pub fn record_tool_call(&self, fingerprint: impl Into<String>) {
        self.usage.lock().unwrap().record_tool_call();
        self.progress.lock().unwrap().push_fingerprint(fingerprint);
        self.phase.lock().unwrap().on_iteration();
    }

    pub fn record_file_read(&self, path: impl Into<String>) {
        let path = path.into();
        self.progress.lock().unwrap().record_file_read(path.clone());
        self.phase.lock().unwrap().on_file_read(path);
    }

    pub fn record_file_modified(&self, path: impl Into<String>) {
        self.progress.lock().unwrap().record_file_modified(path);
        if let Some((from, to)) = self.phase.lock().unwrap().on_file_mutated() {
            self.events.publish(CoreEvent::PhaseTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
    }

    pub fn record_command(&self) {
        self.progress.lock().unwrap().record_command();
    }

    /// Records a test-like shell command's outcome and emits a phase
    /// transition event if this pushed the agent into `verifying`.
    pub fn record_test_result(&self, passed: bool) {
        let mut phase = self.phase.lock().unwrap();
        let transitioned = phase.on_test_like_shell(passed);
        let stuck_fix_cycle = phase.consecutive_test_failures >= TEST_FIX_CYCLE_THRESHOLD;
        if stuck_fix_cycle {
            phase.in_test_fix_cycle = true;
        }
        drop(phase);
        if let Some((from, to)) = transitioned {
            self.events.publish(CoreEvent::PhaseTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
    }

    pub fn pause_duration(&self) {
        self.usage.lock().unwrap().pause_duration();
    }

    pub fn resume_duration(&self) {
        self.usage.lock().unwrap().resume_duration();
    }

    fn hard_limit_type(usage: &ExecutionUsage, budget: &ExecutionBudget) -> Option<BudgetType> {
        if usage.tokens() >= budget.max_tokens {
            return Some(BudgetType::Tokens);
        }
        if usage.cost >= budget.max_cost {
            return Some(BudgetType::Cost);
        }
        if usage.duration_ms() >= budget.max_duration_ms {
            return Some(BudgetType::Duration);
        }
        None
    }

    /// The dimension closest to its hard limit, and that limit's fraction used.
    fn worst_percent(usage: &ExecutionUsage, budget: &ExecutionBudget) -> (BudgetType, f64) {
        let candidates = [
            (BudgetType::Tokens, usage.tokens() as f64 / budget.max_tokens.max(1) as f64),
            (BudgetType::Cost, usage.cost / budget.max_cost.max(f64::MIN_POSITIVE)),
            (
                BudgetType::Duration,
                usage.duration_ms() as f64 / budget.max_duration_ms.max(1) as f64,
            ),
        ];
        candidates
            .into_iter()
            .fold((BudgetType::Tokens, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best })
    }

    /// The 9-step decision order: hard limits first, then max-iterations
    /// wrap-up, then the two soft-limit tiers, then stuckness, exploration
    /// saturation, test-fix cycling, phase-budget violations, else continue.
    pub fn check_budget(&self) -> BudgetDecision {
        let budget = *self.budget.lock().unwrap();
        let usage = self.usage.lock().unwrap();
        let progress = self.progress.lock().unwrap();
        let phase = self.phase.lock().unwrap();

        // 1. hard token/cost/duration limits
        if let Some(budget_type) = Self::hard_limit_type(&usage, &budget) {
            self.events.publish(CoreEvent::BudgetExceeded {
                budget_type: budget_type.as_str().to_string(),
            });
            return BudgetDecision {
                can_continue: false,
                is_hard_limit: true,
                is_soft_limit: false,
                budget_type: Some(budget_type),
                suggested_action: SuggestedAction::Stop,
                force_text_only: false,
                injected_prompt: None,
            };
        }

        // 2. max iterations — wrap up instead of a hard kill
        if usage.iterations >= budget.max_iterations {
            return BudgetDecision {
                can_continue: true,
                is_hard_limit: true,
                is_soft_limit: false,
                budget_type: Some(BudgetType::Iterations),
                suggested_action: SuggestedAction::Continue,
                force_text_only: true,
                injected_prompt: Some(MAX_ITERATIONS_PROMPT.to_string()),
            };
        }

        let (worst_type, worst_pct) = Self::worst_percent(&usage, &budget);

        // 3. soft limit, urgent tier (>=80% of the hard limit)
        if worst_pct >= SOFT_URGENT_PERCENT {
            self.events.publish(CoreEvent::BudgetWarning {
                budget_type: worst_type.as_str().to_string(),
                percent: worst_pct,
            });
            return BudgetDecision {
                can_continue: true,
                is_hard_limit: false,
                is_soft_limit: true,
                budget_type: Some(worst_type),
                suggested_action: SuggestedAction::Stop,
                force_text_only: true,
                injected_prompt: None,
            };
        }

        // 4. soft limit, warning tier (67-79%)
        if worst_pct >= SOFT_WARN_PERCENT {
            self.events.publish(CoreEvent::BudgetWarning {
                budget_type: worst_type.as_str().to_string(),
                percent: worst_pct,
            });
            return BudgetDecision {
                can_continue: true,
                is_hard_limit: false,
                is_soft_limit: true,
                budget_type: Some(worst_type),
                suggested_action: SuggestedAction::RequestExtension,
                force_text_only: false,
                injected_prompt: None,
            };
        }

        // 5. stuckness: repeated identical calls, or idle too long with
        // enough iterations behind it to mean something
        let idle_stuck = progress.seconds_since_progress() >= STUCK_IDLE_SECONDS && usage.iterations >= STUCK_MIN_ITERATIONS;
        let repeated = progress.has_repeated_tool_call(STUCK_REPEAT_THRESHOLD);
        if repeated || idle_stuck {
            self.events.publish(CoreEvent::ProgressStuck {
                reason: if repeated { "repeated_tool_call".to_string() } else { "idle_timeout".to_string() },
            });
            return BudgetDecision {
                can_continue: true,
                is_hard_limit: false,
                is_soft_limit: false,
                budget_type: None,
                suggested_action: SuggestedAction::RequestExtension,
                force_text_only: false,
                injected_prompt: Some(DOOM_LOOP_PROMPT.to_string()),
            };
        }

        // 6. exploration saturation: lots of reading, no edits yet
        if phase.phase == Phase::Exploring
            && phase.unique_files_read.len() >= EXPLORATION_SATURATION_FILES
            && progress.files_modified.is_empty()
        {
            self.events.publish(CoreEvent::ExplorationSaturation {
                unique_files_read: phase.unique_files_read.len(),
            });
            return BudgetDecision::with_prompt(START_EDITING_PROMPT);
        }

        // 7. stuck in a test-fix cycle with edits in between failures
        if phase.consecutive_test_failures >= TEST_FIX_CYCLE_THRESHOLD && phase.has_pending_edit() {
            return BudgetDecision::with_prompt(DIFFERENT_STRATEGY_PROMPT);
        }

        // 8. phase-budget violations
        if usage.iterations > 0 {
            let exploration_share = phase.exploration_iterations as f64 / usage.iterations as f64;
            if exploration_share > self.phase_budget.max_exploration_percent {
                return BudgetDecision::with_prompt(EXPLORATION_BUDGET_PROMPT);
            }
        }
        let remaining_fraction = 1.0 - worst_pct;
        if remaining_fraction <= self.phase_budget.reserved_verification_percent && phase.tests_run == 0 {
            return BudgetDecision::with_prompt(RESERVE_VERIFICATION_PROMPT);
        }

        // 9. nothing tripped
        BudgetDecision::continue_now()
    }

    /// Requests an extension. Grants `1.5x` the caller-suggested delta on
    /// each dimension, component-wise, up to `MAX_EXTENSIONS` grants.
    pub fn request_extension(&self, reason: &str, suggested: BudgetDelta) -> bool {
        self.events.publish(CoreEvent::ExtensionRequested { reason: reason.to_string() });
        let mut granted = self.extensions_granted.lock().unwrap();
        if *granted >= MAX_EXTENSIONS {
            self.events.publish(CoreEvent::ExtensionDenied { reason: reason.to_string() });
            return false;
        }
        *granted += 1;
        let scaled = BudgetDelta {
            tokens: suggested.tokens.map(|t| (t as f64 * 1.5) as u64),
            cost: suggested.cost.map(|c| c * 1.5),
            duration_ms: suggested.duration_ms.map(|d| (d as f64 * 1.5) as u64),
            iterations: suggested.iterations.map(|i| (i as f64 * 1.5) as u64),
        };
        self.budget.lock().unwrap().extend(&scaled);
        self.events.publish(CoreEvent::ExtensionGranted { reason: reason.to_string() });
        true
    }

    pub fn phase(&self) -> Phase {
        self.phase.lock().unwrap().phase
    }

    pub fn usage_snapshot(&self) -> (u64, f64, u64, u64) {
        let usage = self.usage.lock().unwrap();
        (usage.tokens(), usage.cost, usage.duration_ms(), usage.iterations)
    }

    pub fn reset_usage(&self) {
        self.usage.lock().unwrap().reset();
    }
}
