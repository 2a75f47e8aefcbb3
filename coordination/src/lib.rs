//! Coordination core for a hierarchical autonomous-agent swarm.
//!
//! Provides the orchestration primitives an embedding application wires
//! together: cooperative cancellation, policy resolution, economics and
//! budget accounting, goal decomposition, subagent spawning, a
//! supervisor for running handles, the swarm wave orchestrator itself,
//! and the logging/persistence adapters a CLI binary needs around it.
//!
//! The concrete LLM client, tool implementations, and verification/
//! escalation loop built on top of this core live in the `agent-cli`
//! binary crate — this library never depends on an LLM SDK.

#![allow(dead_code)]
#![allow(clippy::uninlined_format_args)]

pub mod budget_pool;
pub mod cancel;
pub mod core_events;
pub mod decompose;
pub mod economics;
pub mod error;
pub mod json_parse;
pub mod logging;
pub mod orchestrator;
pub mod pending_plan;
pub mod persistence;
pub mod policy;
pub mod pricing;
pub mod queue;
pub mod spawn;
pub mod supervisor;
pub mod traits;

// Re-export the orchestration core's own types at the crate root so callers
// don't need to know which module backs them.
pub use budget_pool::{BudgetPool, ChildBudget};
pub use cancel::{CancellationSource, CancellationToken, GracefulTimeout, GracefulTimeoutConfig, LinkedSource};
pub use core_events::{CoreEvent, EventBus as CoreEventBus};
pub use decompose::{decompose_heuristic, finalize as finalize_decomposition, DecomposeConfig, SmartDecompositionResult, SmartSubtask};
pub use economics::{BudgetDecision, BudgetType, EconomicsManager, ExecutionBudget, ExecutionUsage, PhaseBudgetConfig, SuggestedAction};
pub use error::CoreError;
pub use logging::init_subscriber;
pub use orchestrator::{
    DispatchOutcome, GoalDecomposer, Orchestrator, OrchestratorConfig, SwarmCheckpoint, SwarmStatus,
    TaskDispatcher,
};
pub use pending_plan::{PendingPlan, PendingPlanManager, ProposedChange};
pub use persistence::{
    FileChangeLogEntry, FsSessionStore, PersistenceError, PredictionLogEntry, SessionStore,
    WorkerResultRecord,
};
pub use policy::{resolve_policy, PolicyProfile, ResolvedPolicy};
pub use queue::{QueueCheckpoint, QueueStats, QueuedTask, TaskQueue};
pub use spawn::{
    allocate_budget, build_graceful_timeout, filter_tools, merge_child_plan, BudgetAllocation,
    ClosureKind, ClosureReport, DedupConfig, Spawner, SpawnConstraints, SpawnConstraintsInput,
    SpawnResult, TimeoutPrecedence,
};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisedHandle};
pub use traits::{Agent, AgentConfig, AgentFactory, AgentRunResult, Message, Planner, PlannerResponse, Tool};
