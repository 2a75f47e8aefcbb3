//! External interfaces: the seams this crate calls through but does not
//! implement an opinion about (the LLM provider, individual tools, and the
//! concrete agent type the spawner instantiates).
//!
//! Grounded on `registry/mod.rs`'s `ProviderEntry`/capability-trait split
//! (a small trait at the provider boundary, a registry keyed by name) and
//! `harness/tools.rs`'s tool-execution signature.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone)]
pub struct PlannerResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner call failed: {0}")]
    CallFailed(String),
    #[error("planner call cancelled")]
    Cancelled,
}

/// The core's only outbound call to a language model. Implemented by the
/// embedding application, never by this crate.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn chat(&self, messages: &[Message]) -> Result<PlannerResponse, PlannerError>;
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),
}

pub type ToolResult = Result<serde_json::Value, ToolError>;

/// A single callable tool. The executor serializes `ToolResult` into the
/// transcript as a string (structured results JSON-encoded).
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> &serde_json::Value;
    fn execute<'a>(&'a self, args: serde_json::Value) -> BoxFuture<'a, ToolResult>;
}

/// Static configuration for one agent instance, as constructed by the
/// spawner before handing it to the injected factory.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub planner_model: String,
    pub max_iterations: u64,
    pub system_prompt: String,
    pub tool_names: Vec<String>,
    pub plan_mode: bool,
    /// Cancelled when the spawner's graceful timeout (or a linked parent
    /// cancellation) fires. The agent's own run loop is responsible for
    /// checking this between steps; this crate never reaches into a
    /// running agent to stop it.
    pub cancellation_token: crate::cancel::CancellationToken,
}

/// A running agent instance, as produced by an `AgentFactory`. The
/// spawner only ever interacts with agents through this trait, never a
/// concrete type, to avoid a cycle between the spawner and the agent
/// implementation.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&mut self) -> AgentRunResult;
    fn request_wrapup(&mut self, reason: &str);
    fn is_running(&self) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct AgentRunResult {
    pub success: bool,
    pub output: String,
    pub files_modified: Vec<String>,
    pub pending_plan_changes: usize,
}

/// An injected factory producing a new agent instance for a given
/// configuration. Prevents a dependency cycle between the spawner and the
/// concrete agent implementation.
pub type AgentFactory = Arc<dyn Fn(AgentConfig) -> BoxFuture<'static, Box<dyn Agent>> + Send + Sync>;
