mod agents;
mod beads_bridge;
mod cli;
mod config;
mod prompts;
mod tools;
mod worktree_bridge;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use rig::completion::Prompt;
use rig::tool::Tool as RigTool;
use tracing::{debug, error, info, warn};

use agents::coder::OaiAgent;
use agents::reviewer::ReviewResult;
use agents::AgentFactory;
use beads_bridge::IssueTracker;
use cli::{Cli, Command, Isolation, ResumeTarget, RunArgs};
use config::{check_endpoint, SwarmConfig};
use coordination::{
    decompose::RawSubtask, BudgetPool, ChildBudget, CoreEventBus, DecomposeConfig,
    DispatchOutcome, FsSessionStore, GoalDecomposer, Orchestrator, SessionStore, SmartSubtask,
    SwarmStatus, TaskDispatcher,
};
use tools::verifier_tool::{RunVerifierArgs, RunVerifierTool};

/// Format a subtask into a prompt a worker agent can act on directly.
fn format_task_prompt(task: &SmartSubtask) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# Task: {}\n\n", task.description));
    prompt.push_str(&format!(
        "**ID:** {} | **Type:** {} | **Complexity:** {}/10\n\n",
        task.id, task.task_type, task.complexity
    ));

    if !task.relevant_files.is_empty() {
        prompt.push_str("## Relevant Files\n");
        for f in &task.relevant_files {
            prompt.push_str(&format!("- `{f}`\n"));
        }
        prompt.push('\n');
    }

    if !task.modifies.is_empty() {
        prompt.push_str("## Files You Will Modify\n");
        for f in &task.modifies {
            prompt.push_str(&format!("- `{f}`\n"));
        }
        prompt.push('\n');
    }

    if !task.reads.is_empty() && task.reads != task.modifies {
        prompt.push_str("## Files to Read First\n");
        for f in &task.reads {
            prompt.push_str(&format!("- `{f}`\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str("Implement this subtask completely. Run `cargo check` before reporting done.\n");

    prompt
}

/// Stage and commit all changes in the worktree.
///
/// Returns `true` if there were changes to commit, `false` if clean.
fn git_commit_changes(wt_path: &Path, iteration: u32) -> Result<bool> {
    let add = std::process::Command::new("git")
        .args(["add", "-A"])
        .current_dir(wt_path)
        .output()?;
    if !add.status.success() {
        let stderr = String::from_utf8_lossy(&add.stderr);
        anyhow::bail!("git add failed: {stderr}");
    }

    let status = std::process::Command::new("git")
        .args(["diff", "--cached", "--quiet"])
        .current_dir(wt_path)
        .output()?;

    if status.status.success() {
        return Ok(false);
    }

    let msg = format!("swarm: iteration {iteration} changes");
    let commit = std::process::Command::new("git")
        .args(["commit", "-m", &msg])
        .current_dir(wt_path)
        .output()?;
    if !commit.status.success() {
        let stderr = String::from_utf8_lossy(&commit.stderr);
        anyhow::bail!("git commit failed: {stderr}");
    }

    Ok(true)
}

/// Get the git diff of the worktree vs its parent commit.
fn git_diff(worktree_path: &Path) -> Result<String> {
    let output = std::process::Command::new("git")
        .args(["diff", "HEAD~1..HEAD"])
        .current_dir(worktree_path)
        .output()?;

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Count files touched by the worktree's last commit, used as a proxy for
/// how much work a dispatch actually did (rig's `Prompt::prompt` doesn't
/// surface the underlying tool-call count).
fn count_changed_files(wt_path: &Path) -> usize {
    let output = std::process::Command::new("git")
        .args(["diff", "--name-only", "HEAD~1..HEAD"])
        .current_dir(wt_path)
        .output();
    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count(),
        _ => 0,
    }
}

/// Rough chars-per-token estimate. Rig's simple `prompt()` call doesn't
/// return usage metadata, so this is the best the dispatcher can do without
/// instrumenting every worker agent's completion client directly.
fn approx_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(1)
}

/// Prompt an agent with exponential backoff retry for transient HTTP errors.
///
/// Retries on connection errors, 502, 503, 429 with backoff: 2s, 4s, 8s, ...
/// Non-transient errors fail immediately.
async fn prompt_with_retry(
    agent: &impl Prompt,
    prompt: &str,
    max_retries: u32,
) -> Result<String, rig::completion::PromptError> {
    let mut last_err = None;
    for attempt in 0..=max_retries {
        match agent.prompt(prompt).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                let err_str = format!("{e}");
                let err_lower = err_str.to_ascii_lowercase();
                let is_transient = err_str.contains("502")
                    || err_str.contains("503")
                    || err_str.contains("429")
                    || err_lower.contains("connection")
                    || err_lower.contains("timed out")
                    || err_lower.contains("timeout");

                if !is_transient || attempt == max_retries {
                    return Err(e);
                }

                let backoff = std::time::Duration::from_secs(2u64.pow(attempt + 1));
                warn!(
                    attempt = attempt + 1,
                    max_retries,
                    backoff_secs = backoff.as_secs(),
                    error = %err_str,
                    "Transient error — retrying"
                );
                last_err = Some(e);
                tokio::time::sleep(backoff).await;
            }
        }
    }
    Err(last_err.unwrap())
}

/// Decomposes a goal via a single completion call against the reasoning
/// model, parsed as JSON. Falls back to the heuristic skeleton on any LLM
/// or parse failure rather than reporting failure to the caller — the
/// orchestrator's own retry-then-single-task fallback exists for total
/// decomposer unavailability, not for a model that simply mangled its JSON.
struct LlmGoalDecomposer {
    agent: OaiAgent,
    events: CoreEventBus,
}

impl LlmGoalDecomposer {
    async fn try_llm_decompose(&self, goal: &str) -> Option<Vec<SmartSubtask>> {
        let response = match self.agent.prompt(goal).await {
            Ok(r) => r,
            Err(e) => {
                warn!("decomposer agent call failed: {e}");
                return None;
            }
        };

        let parsed = coordination::json_parse::parse_lenient(&response)?;
        let raw_value = parsed.value.get("subtasks")?.clone();
        let raw: Vec<RawSubtask> = serde_json::from_value(raw_value).ok()?;
        if raw.is_empty() {
            return None;
        }

        let result = coordination::finalize_decomposition(raw, DecomposeConfig::default(), &self.events);
        if result.subtasks.is_empty() {
            None
        } else {
            Some(result.subtasks)
        }
    }
}

#[async_trait]
impl GoalDecomposer for LlmGoalDecomposer {
    async fn decompose(&self, goal: &str) -> Option<Vec<SmartSubtask>> {
        if let Some(tasks) = self.try_llm_decompose(goal).await {
            return Some(tasks);
        }
        info!("goal decomposer: LLM decomposition unavailable, falling back to heuristic skeleton");
        let result = coordination::decompose_heuristic(goal, DecomposeConfig::default(), &self.events);
        Some(result.subtasks)
    }
}

/// Dispatches a single subtask to a worktree-isolated worker, gates the
/// result through the verifier and blind reviewer, and merges on success.
struct SwarmDispatcher {
    factory: AgentFactory,
    worktree_bridge: worktree_bridge::WorktreeBridge,
    repo_root: PathBuf,
    isolation: Isolation,
    max_retries: u32,
    verifier_packages: Vec<String>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl SwarmDispatcher {
    fn next_attempt(&self, task_id: &str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap();
        let count = attempts.entry(task_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Routes to the Manager for high-complexity tasks, the Rust specialist
    /// for Rust-flavored fix/refactor work, and the general coder otherwise.
    fn pick_agent(&self, task: &SmartSubtask, wt_path: &Path) -> OaiAgent {
        if task.complexity >= 7 {
            self.factory.build_manager(wt_path)
        } else if task.task_type == "fix"
            || task.task_type == "refactor"
            || task.relevant_files.iter().any(|f| f.ends_with(".rs"))
        {
            self.factory.build_rust_coder(wt_path)
        } else {
            self.factory.build_general_coder(wt_path)
        }
    }

    fn failed_outcome(&self, retries_left: u32, tokens_used: u64) -> DispatchOutcome {
        DispatchOutcome {
            success: false,
            retries_left,
            tool_calls: 0,
            output_len: 0,
            tokens_used,
            cost_used: 0.0,
        }
    }
}

#[async_trait]
impl TaskDispatcher for SwarmDispatcher {
    async fn dispatch(&self, task: &SmartSubtask, _budget: ChildBudget) -> DispatchOutcome {
        let attempt = self.next_attempt(&task.id);
        let retries_left = self.max_retries.saturating_sub(attempt);

        let wt_path = match self.isolation {
            Isolation::Worktree => match self.worktree_bridge.create(&task.id) {
                Ok(p) => p,
                Err(e) => {
                    error!(task_id = %task.id, "failed to create worktree: {e}");
                    return self.failed_outcome(retries_left, 0);
                }
            },
            Isolation::Docker | Isolation::None => self.repo_root.clone(),
        };

        let agent = self.pick_agent(task, &wt_path);
        let prompt_text = format_task_prompt(task);

        let response = match prompt_with_retry(&agent, &prompt_text, 2).await {
            Ok(r) => r,
            Err(e) => {
                error!(task_id = %task.id, "agent failed: {e}");
                if self.isolation == Isolation::Worktree {
                    let _ = std::fs::remove_dir_all(&wt_path);
                }
                return self.failed_outcome(retries_left, approx_tokens(&prompt_text));
            }
        };

        let has_changes = git_commit_changes(&wt_path, attempt).unwrap_or(false);
        let changed_files = if has_changes { count_changed_files(&wt_path) } else { 0 };

        let mut success = false;
        if has_changes {
            let verifier = RunVerifierTool::new(&wt_path).with_packages(self.verifier_packages.clone());
            match verifier.call(RunVerifierArgs { mode: Some("full".to_string()) }).await {
                Ok(report) if report.contains("ALL GREEN") => {
                    success = self.review_gate(task, &wt_path).await;
                }
                Ok(_) => warn!(task_id = %task.id, "verifier gate failed"),
                Err(e) => warn!(task_id = %task.id, "verifier tool error: {e}"),
            }
        } else {
            warn!(task_id = %task.id, "agent produced no file changes");
        }

        if self.isolation == Isolation::Worktree {
            if success {
                if let Err(e) = self.worktree_bridge.merge_and_remove(&task.id) {
                    error!(task_id = %task.id, "merge failed: {e}");
                    success = false;
                }
            } else {
                let _ = std::fs::remove_dir_all(&wt_path);
            }
        }

        let prompt_tokens = approx_tokens(&prompt_text);
        let response_tokens = approx_tokens(&response);
        DispatchOutcome {
            success,
            retries_left,
            tool_calls: changed_files as u32,
            output_len: response.len(),
            tokens_used: prompt_tokens + response_tokens,
            cost_used: coordination::pricing::estimate_cost(prompt_tokens, response_tokens, None),
        }
    }
}

impl SwarmDispatcher {
    /// Sends the committed diff to the blind reviewer. An unreachable
    /// reviewer doesn't block a verifier-green result — it's a second
    /// opinion, not a required gate.
    async fn review_gate(&self, task: &SmartSubtask, wt_path: &Path) -> bool {
        let diff = match git_diff(wt_path) {
            Ok(d) => d,
            Err(e) => {
                warn!(task_id = %task.id, "failed to compute diff for review: {e}");
                return true;
            }
        };
        if diff.is_empty() {
            return true;
        }

        let reviewer = self.factory.build_reviewer();
        match reviewer.prompt(&diff).await {
            Ok(response) => ReviewResult::parse(&response).passed,
            Err(e) => {
                warn!(task_id = %task.id, "reviewer unreachable: {e} — accepting verifier-only result");
                true
            }
        }
    }
}

/// Resolves the goal text for a fresh (non-resume) run: the CLI argument if
/// given, otherwise the highest-priority open beads issue as a fallback
/// goal source.
fn resolve_goal(goal: Option<&str>) -> Result<String> {
    if let Some(g) = goal {
        return Ok(g.to_string());
    }

    let beads = beads_bridge::BeadsBridge::new();
    let mut issues = beads
        .list_open()
        .context("no goal given on the command line, and beads is unavailable as a fallback goal source")?;
    issues.sort_by_key(|i| i.priority.unwrap_or(4));
    let issue = issues
        .into_iter()
        .next()
        .context("no goal given and no open beads issues to fall back to")?;

    info!(id = %issue.id, title = %issue.title, "No goal given — using highest-priority open beads issue");
    Ok(format!("{}: {}", issue.id, issue.title))
}

/// Rough token ceiling for a session's `BudgetPool`, derived from the cost
/// limit. The pricing table has no rates for the cluster's local models, so
/// this is a conservative ballpark rather than a cost-derived figure.
fn token_budget_for(cost_limit: f64, parallelism: usize) -> u64 {
    let from_cost = (cost_limit * 50_000.0) as u64;
    from_cost.max(parallelism as u64 * 20_000)
}

fn spawn_event_logger(events: &CoreEventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            debug!(?event, "swarm event");
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    coordination::init_subscriber("info");

    let cli = Cli::parse();

    match &cli.command {
        Command::Run(args) => {
            let resolved = match args.resolve(cli.config.as_ref()) {
                Ok(resolved) => resolved,
                Err(e) => {
                    error!("Configuration error: {e}");
                    std::process::exit(cli::exit_code::CONFIG_ERROR);
                }
            };
            info!(
                parallelism = resolved.parallelism,
                isolation = ?resolved.isolation,
                cost_limit = resolved.cost_limit,
                resume = ?resolved.resume,
                session_dir = %resolved.session_dir.display(),
                "Resolved run configuration"
            );

            if let Err(e) = run_swarm(args, resolved).await {
                error!("Orchestrator run failed: {e}");
                std::process::exit(cli::exit_code::FAILURE);
            }
            Ok(())
        }
        Command::List => {
            let store_root = PathBuf::from(".swarm-sessions");
            match std::fs::read_dir(&store_root) {
                Ok(entries) => {
                    for entry in entries.filter_map(|e| e.ok()) {
                        if entry.path().is_dir() {
                            println!("{}", entry.file_name().to_string_lossy());
                        }
                    }
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!("No sessions recorded yet");
                    Ok(())
                }
                Err(e) => {
                    error!("Failed to read session directory: {e}");
                    std::process::exit(cli::exit_code::FAILURE);
                }
            }
        }
        Command::Grade(_) | Command::Compare { .. } => {
            error!("This subcommand is not implemented by this binary yet");
            std::process::exit(cli::exit_code::FAILURE);
        }
    }
}

/// Builds and drives the swarm `Orchestrator`: plan the goal into a subtask
/// DAG (or resume one from a checkpoint), run waves to completion, and
/// persist a final checkpoint either way.
async fn run_swarm(args: &RunArgs, resolved: cli::CliConfig) -> Result<()> {
    let config = SwarmConfig::default();
    info!(
        fast = %config.fast_endpoint.url,
        coder = %config.coder_endpoint.url,
        reasoning = %config.reasoning_endpoint.url,
        "Swarm orchestrator starting"
    );

    let local_ok = check_endpoint(&config.fast_endpoint.url, Some(&config.fast_endpoint.api_key)).await;
    let reasoning_ok = check_endpoint(&config.reasoning_endpoint.url, Some(&config.reasoning_endpoint.api_key)).await;
    info!(local_ok, reasoning_ok, "Endpoint health check");
    if !local_ok && !reasoning_ok {
        anyhow::bail!("No inference endpoints available");
    }

    let factory = AgentFactory::new(&config)?;
    let repo_root = std::env::current_dir()?;
    let worktree_bridge = worktree_bridge::WorktreeBridge::new(config.worktree_base.clone(), &repo_root)?;

    let session_store = FsSessionStore::new(resolved.session_dir.clone());
    let session_id = match &resolved.resume {
        Some(ResumeTarget::Id(id)) => id.clone(),
        _ => "default".to_string(),
    };

    let events = CoreEventBus::new();
    spawn_event_logger(&events);

    let pool = BudgetPool::new(
        token_budget_for(resolved.cost_limit, resolved.parallelism),
        resolved.cost_limit,
        resolved.parallelism as u32,
    );

    let orch_config = resolved.to_orchestrator_config();
    let mut orchestrator = Orchestrator::new(orch_config, events.clone(), pool);

    let decomposer = LlmGoalDecomposer { agent: factory.build_decomposer(), events: events.clone() };

    let dispatcher = SwarmDispatcher {
        factory,
        worktree_bridge,
        repo_root,
        isolation: resolved.isolation,
        max_retries: orch_config.max_retries,
        verifier_packages: config.verifier_packages.clone(),
        attempts: Mutex::new(HashMap::new()),
    };

    if resolved.resume.is_some() {
        let checkpoint = session_store
            .latest_checkpoint(&session_id)
            .context("no checkpoint found to resume from")?;
        info!(wave = checkpoint.wave, session_id = %session_id, "Resuming from checkpoint");
        orchestrator.resume(checkpoint);
    } else {
        let goal = resolve_goal(args.goal.as_deref())?;
        info!(%goal, "Planning swarm run");
        orchestrator.plan(&goal, &decomposer).await;
    }

    orchestrator.run(&dispatcher, &decomposer).await;

    if let Err(e) = session_store.write_checkpoint(&session_id, &orchestrator.checkpoint()) {
        warn!("failed to persist checkpoint: {e}");
    }

    match orchestrator.status() {
        SwarmStatus::Completed => {
            info!("Swarm run completed");
            Ok(())
        }
        SwarmStatus::Failed => anyhow::bail!("swarm run failed: a foundation task did not complete"),
        SwarmStatus::Running => anyhow::bail!("swarm run ended while still marked running (unexpected)"),
    }
}
