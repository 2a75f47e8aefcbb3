//! Crate-wide error types.
//!
//! Each subsystem gets its own `thiserror` enum so callers can match on the
//! failure mode that matters to them; [`CoreError`] is the unifying type for
//! call sites (mainly the CLI) that just need one error to bubble up.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CancellationError {
    #[error("operation cancelled: {reason}")]
    Cancelled { reason: String },
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("tool '{tool}' denied: {reason}")]
    ToolDenied { tool: String, reason: String },
    #[error("unknown policy profile: {0}")]
    UnknownProfile(String),
}

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("invalid budget: {0}")]
    InvalidBudget(String),
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("no tools remain after policy filtering for agent '{agent_name}'")]
    NoToolsRemaining { agent_name: String },
    #[error("budget allocation failed: {0}")]
    BudgetAllocationFailed(String),
    #[error("subagent factory failed: {0}")]
    FactoryFailed(String),
}

#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("decomposition produced zero subtasks after all retries")]
    Empty,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown task id: {0}")]
    UnknownTask(String),
    #[error("checkpoint restore failed: {0}")]
    RestoreFailed(String),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Cancellation(#[from] CancellationError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Budget(#[from] BudgetError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Decompose(#[from] DecomposeError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}
