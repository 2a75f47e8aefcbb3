//! Component G: configures, isolates, and runs one child agent to
//! completion.

mod closure;
mod dedup;
mod prompt;

pub use closure::{parse_closure_report, ClosureReport};
pub use dedup::{DedupConfig, DedupTracker};
pub use prompt::{build_prompt, BlackboardFinding, SpawnConstraints};

use std::sync::Arc;

use crate::budget_pool::BudgetPool;
use crate::cancel::{CancellationToken, GracefulTimeout, GracefulTimeoutConfig, LinkedSource};
use crate::core_events::{CoreEvent, EventBus};
use crate::error::SpawnError;
use crate::pending_plan::PendingPlanManager;
use crate::policy::{resolve_policy, PolicyResolutionInput, ResolvedPolicy, ToolAccessMode};
use crate::traits::{Agent, AgentConfig, AgentFactory};

const MAX_TOOLS_BEFORE_RANKING: usize = 15;
const DEFAULT_SUBAGENT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_WRAPUP_WINDOW_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureKind {
    Completed,
    TimeoutGraceful,
    TimeoutHard,
    Cancelled,
}

pub struct SpawnResult {
    pub success: bool,
    pub output: String,
    pub files_modified: Vec<String>,
    pub structured: Option<ClosureReport>,
    pub closure_kind: ClosureKind,
}

#[derive(Default)]
pub struct SpawnConstraintsInput {
    pub max_tokens: Option<u64>,
    pub prompt: Option<SpawnConstraints>,
}

pub struct TimeoutPrecedence {
    pub agent_def: Option<u64>,
    pub per_type_config: Option<u64>,
    pub per_type_default: Option<u64>,
    pub global_config: Option<u64>,
}

impl TimeoutPrecedence {
    /// Resolves `subagentTimeout` in precedence order, falling back to 300s.
    pub fn resolve(&self) -> u64 {
        self.agent_def
            .or(self.per_type_config)
            .or(self.per_type_default)
            .or(self.global_config)
            .unwrap_or(DEFAULT_SUBAGENT_TIMEOUT_SECS)
    }
}

/// Filters the parent's tool universe down to what the spawned agent may
/// use: intersect with the agent's declared set, optionally rank down to
/// a task-type top-N if over threshold, then enforce the resolved policy.
pub fn filter_tools(
    parent_tools: &[String],
    agent_declared_tools: &[String],
    always_keep: &[String],
    ranked_for_task_type: Option<&[String]>,
    policy: &ResolvedPolicy,
    agent_name: &str,
) -> Result<Vec<String>, SpawnError> {
    let mut candidates: Vec<String> =
        parent_tools.iter().filter(|t| agent_declared_tools.contains(t)).cloned().collect();

    if candidates.len() > MAX_TOOLS_BEFORE_RANKING {
        if let Some(ranked) = ranked_for_task_type {
            let mut reduced: Vec<String> = ranked.iter().filter(|t| candidates.contains(t)).cloned().collect();
            for keep in always_keep {
                if candidates.contains(keep) && !reduced.contains(keep) {
                    reduced.push(keep.clone());
                }
            }
            for allowed in &policy.profile.allowed_tools {
                if candidates.contains(allowed) && !reduced.contains(allowed) {
                    reduced.push(allowed.clone());
                }
            }
            candidates = reduced;
        }
    }

    let filtered: Vec<String> = if policy.profile.tool_access_mode == ToolAccessMode::Whitelist {
        candidates.into_iter().filter(|t| policy.profile.allowed_tools.contains(t)).collect()
    } else {
        candidates.into_iter().filter(|t| !policy.profile.denied_tools.contains(t)).collect()
    };

    if filtered.is_empty() {
        return Err(SpawnError::NoToolsRemaining { agent_name: agent_name.to_string() });
    }
    Ok(filtered)
}

pub struct BudgetAllocation {
    pub token_budget: u64,
    pub cost_budget: f64,
    /// `Some(id)` if this allocation came from a pool reservation that
    /// must be released on finalization.
    pub pool_allocation_id: Option<String>,
}

/// Budget allocation precedence: explicit constraint, then a pool
/// reservation, then the static `Subagent` preset.
pub fn allocate_budget(
    allocation_id: &str,
    constraint_max_tokens: Option<u64>,
    pool: Option<&BudgetPool>,
) -> Result<BudgetAllocation, SpawnError> {
    if let Some(max_tokens) = constraint_max_tokens {
        return Ok(BudgetAllocation { token_budget: max_tokens, cost_budget: f64::MAX, pool_allocation_id: None });
    }
    if let Some(pool) = pool {
        if let Some(child_budget) = pool.reserve(allocation_id) {
            return Ok(BudgetAllocation {
                token_budget: child_budget.token_budget,
                cost_budget: child_budget.cost_budget,
                pool_allocation_id: Some(allocation_id.to_string()),
            });
        }
        return Err(SpawnError::BudgetAllocationFailed("pool exhausted below floor".to_string()));
    }
    let preset = crate::economics::presets::subagent();
    Ok(BudgetAllocation { token_budget: preset.max_tokens, cost_budget: preset.max_cost, pool_allocation_id: None })
}

/// Builds the graceful-timeout source for a spawned child. Returns the
/// timeout handle plus the token to actually run the child under — linked
/// to any parent cancellation source, so the child still observes a
/// parent-triggered cancel even though `GracefulTimeout` owns its own
/// independent hard-deadline source.
pub fn build_graceful_timeout(
    precedence: &TimeoutPrecedence,
    parent: Option<&CancellationToken>,
) -> (Arc<GracefulTimeout>, CancellationToken) {
    let config = GracefulTimeoutConfig::new(
        precedence.resolve() * 1000,
        DEFAULT_IDLE_TIMEOUT_SECS * 1000,
        DEFAULT_WRAPUP_WINDOW_SECS * 1000,
    );
    let timeout = GracefulTimeout::start(config);
    let effective_token = match parent {
        Some(p) => LinkedSource::new(vec![p.clone(), timeout.token()]).token(),
        None => timeout.token(),
    };
    (timeout, effective_token)
}

pub struct Spawner {
    factory: AgentFactory,
    events: EventBus,
    dedup: std::sync::Mutex<DedupTracker>,
    dedup_config: DedupConfig,
}

impl Spawner {
    pub fn new(factory: AgentFactory, events: EventBus, dedup_config: DedupConfig) -> Self {
        Self { factory, events, dedup: std::sync::Mutex::new(DedupTracker::new()), dedup_config }
    }

    /// Resolves policy for a spawn request and emits the resolution
    /// events, delegating entirely to the policy engine.
    pub fn resolve_policy_for_spawn(&self, input: &PolicyResolutionInput) -> ResolvedPolicy {
        let resolved = resolve_policy(input);
        self.events.publish(CoreEvent::PolicyProfileResolved {
            profile_name: resolved.profile_name.clone(),
            source: format!("{:?}", resolved.metadata.source),
        });
        for field in &resolved.metadata.legacy_fields_used {
            self.events.publish(CoreEvent::PolicyLegacyFallbackUsed { field: field.clone() });
        }
        resolved
    }

    /// One call: checks for a duplicate spawn first, then constructs and
    /// runs the child through its full lifecycle under a graceful timeout
    /// linked to any parent cancellation.
    pub async fn spawn(
        &self,
        agent_name: &str,
        task: &str,
        mut config: AgentConfig,
        timeout_precedence: &TimeoutPrecedence,
        parent_token: Option<&CancellationToken>,
    ) -> Result<SpawnResult, SpawnError> {
        {
            let mut dedup = self.dedup.lock().unwrap();
            if let Some(existing) = dedup.find_duplicate(agent_name, task, self.dedup_config) {
                return Ok(SpawnResult {
                    success: true,
                    output: format!(
                        "(duplicate suppressed) {} — {} plan change(s) already queued",
                        existing.result_summary, existing.queued_plan_changes
                    ),
                    files_modified: Vec::new(),
                    structured: None,
                    closure_kind: ClosureKind::Completed,
                });
            }
        }

        let (timeout, effective_token) = build_graceful_timeout(timeout_precedence, parent_token);
        config.cancellation_token = effective_token.clone();

        let agent_name_owned = agent_name.to_string();
        let events = self.events.clone();
        timeout.on_wrapup_warning({
            let agent_name_owned = agent_name_owned.clone();
            let events = events.clone();
            move || events.publish(CoreEvent::SubagentWrapupStarted { agent_name: agent_name_owned.clone() })
        });

        self.events.publish(CoreEvent::AgentSpawn { agent_name: agent_name.to_string(), task: task.to_string() });
        let mut agent = (self.factory)(config).await;
        let run_result = agent.run().await;
        timeout.dispose();

        let timeout_fired = timeout.token().is_cancellation_requested();
        let parent_cancelled = parent_token.is_some_and(|p| p.is_cancellation_requested());
        let closure_kind = if timeout_fired {
            self.events.publish(CoreEvent::SubagentTimeoutHardKill { agent_name: agent_name_owned.clone() });
            ClosureKind::TimeoutHard
        } else if timeout.has_wrapup_fired() {
            ClosureKind::TimeoutGraceful
        } else if parent_cancelled {
            ClosureKind::Cancelled
        } else {
            ClosureKind::Completed
        };
        let structured = parse_closure_report(&run_result.output);

        self.events.publish(CoreEvent::AgentComplete {
            agent_name: agent_name.to_string(),
            success: run_result.success,
        });

        if closure_kind == ClosureKind::Completed {
            let mut dedup = self.dedup.lock().unwrap();
            dedup.record(agent_name, task, &run_result.output, run_result.pending_plan_changes);
        }

        Ok(SpawnResult {
            success: run_result.success,
            output: run_result.output,
            files_modified: run_result.files_modified,
            structured,
            closure_kind,
        })
    }
}

/// Merges a completed child's pending-plan changes into the parent's
/// active plan, rewriting `reason` to credit the subagent.
pub fn merge_child_plan(parent: &mut PendingPlanManager, agent_name: &str, child_changes: Vec<crate::pending_plan::ProposedChange>) {
    for change in child_changes {
        parent.add_proposed_change(
            change.tool,
            change.args,
            format!("[{agent_name}] {}", change.reason),
            change.tool_call_id,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{BashMode, BashWriteProtection, PolicyProfile, ResolutionMetadata, ResolutionSource};

    fn resolved_policy(whitelist: bool, allowed: &[&str], denied: &[&str]) -> ResolvedPolicy {
        ResolvedPolicy {
            profile_name: "test".to_string(),
            profile: PolicyProfile {
                tool_access_mode: if whitelist { ToolAccessMode::Whitelist } else { ToolAccessMode::All },
                allowed_tools: allowed.iter().map(|s| s.to_string()).collect(),
                denied_tools: denied.iter().map(|s| s.to_string()).collect(),
                bash_mode: BashMode::Disabled,
                bash_write_protection: BashWriteProtection::Off,
                approval: None,
            },
            metadata: ResolutionMetadata { source: ResolutionSource::Default, legacy_fields_used: Vec::new() },
        }
    }

    #[test]
    fn tool_filtering_enforces_whitelist() {
        let parent_tools = vec!["read_file".to_string(), "edit_file".to_string(), "bash".to_string()];
        let declared = parent_tools.clone();
        let policy = resolved_policy(true, &["read_file"], &[]);
        let result = filter_tools(&parent_tools, &declared, &[], None, &policy, "coder").unwrap();
        assert_eq!(result, vec!["read_file".to_string()]);
    }

    #[test]
    fn zero_remaining_tools_is_an_error() {
        let parent_tools = vec!["bash".to_string()];
        let policy = resolved_policy(true, &["read_file"], &[]);
        let result = filter_tools(&parent_tools, &parent_tools, &[], None, &policy, "coder");
        assert!(matches!(result, Err(SpawnError::NoToolsRemaining { .. })));
    }

    #[test]
    fn denylist_mode_removes_only_denied_tools() {
        let parent_tools = vec!["read_file".to_string(), "bash".to_string()];
        let policy = resolved_policy(false, &[], &["bash"]);
        let result = filter_tools(&parent_tools, &parent_tools, &[], None, &policy, "coder").unwrap();
        assert_eq!(result, vec!["read_file".to_string()]);
    }

    #[test]
    fn timeout_precedence_prefers_agent_def() {
        let precedence = TimeoutPrecedence {
            agent_def: Some(600),
            per_type_config: Some(400),
            per_type_default: Some(300),
            global_config: Some(500),
        };
        assert_eq!(precedence.resolve(), 600);
    }

    #[test]
    fn timeout_precedence_falls_back_to_default() {
        let precedence =
            TimeoutPrecedence { agent_def: None, per_type_config: None, per_type_default: None, global_config: None };
        assert_eq!(precedence.resolve(), DEFAULT_SUBAGENT_TIMEOUT_SECS);
    }

    #[test]
    fn budget_allocation_prefers_explicit_constraint() {
        let allocation = allocate_budget("child-1", Some(12_345), None).unwrap();
        assert_eq!(allocation.token_budget, 12_345);
        assert!(allocation.pool_allocation_id.is_none());
    }

    #[test]
    fn budget_allocation_falls_back_to_subagent_preset() {
        let allocation = allocate_budget("child-1", None, None).unwrap();
        let preset = crate::economics::presets::subagent();
        assert_eq!(allocation.token_budget, preset.max_tokens);
    }

    #[test]
    fn budget_allocation_uses_pool_when_available() {
        let pool = BudgetPool::new(10_000, 10.0, 2);
        let allocation = allocate_budget("child-1", None, Some(&pool)).unwrap();
        assert_eq!(allocation.pool_allocation_id, Some("child-1".to_string()));
    }
}
