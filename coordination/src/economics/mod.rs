//! Budget tracking, progress/stuckness detection, and phase inference for a
//! single running agent.

mod engine;
mod types;

pub use engine::{BudgetDecision, BudgetType, EconomicsManager, PhaseBudgetConfig, SuggestedAction};
pub use types::{presets, BudgetDelta, ExecutionBudget, ExecutionUsage, Phase, PhaseState, ProgressState};
