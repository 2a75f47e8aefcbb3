//! Component K: the CLI surface — argument parsing, config resolution,
//! and wiring the resolved config into the orchestrator's event bus.
//!
//! Grounded on `config.rs`'s existing env/default layering for
//! `SwarmConfig` (generalized here to the three-layer TOML/env/flags
//! precedence clap itself doesn't give you for free), and on
//! `coordination::orchestrator`'s `OrchestratorConfig` as the run
//! config this module ultimately has to produce.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use coordination::OrchestratorConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Parser)]
#[command(name = "swarm-agents", about = "Hierarchical autonomous agent swarm")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Optional path to a TOML config file. Flags override its values.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a swarm session over a dataset or a single goal.
    Run(RunArgs),
    /// Grade a completed session's results.
    Grade(SessionSelectorArgs),
    /// Compare two sessions.
    Compare {
        left: String,
        right: String,
    },
    /// List known sessions.
    List,
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    /// Max number of tasks dispatched concurrently within a wave.
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Isolation mode workers run under.
    #[arg(long, value_enum)]
    pub isolation: Option<Isolation>,

    /// Hard cost ceiling in dollars for the whole session.
    #[arg(long = "cost-limit")]
    pub cost_limit: Option<f64>,

    /// Resume the most recent (or a named) checkpoint. Implies swarm mode.
    #[arg(long, num_args = 0..=1, default_missing_value = "latest")]
    pub resume: Option<String>,

    /// Alias for `--resume` used by older tooling; same semantics.
    #[arg(long = "swarm-resume", num_args = 0..=1, default_missing_value = "latest")]
    pub swarm_resume: Option<String>,

    /// Comma-separated subset of task ids to run instead of the full plan.
    #[arg(long = "task-ids", value_delimiter = ',')]
    pub task_ids: Vec<String>,

    /// Directory holding this session's persisted state.
    #[arg(long = "session-dir")]
    pub session_dir: Option<PathBuf>,

    /// The goal to decompose and run, when not resuming.
    pub goal: Option<String>,
}

#[derive(Debug, Clone, clap::Args)]
pub struct SessionSelectorArgs {
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Isolation {
    Worktree,
    Docker,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeTarget {
    Latest,
    Id(String),
}

/// The fully resolved configuration a `run` invocation executes with:
/// TOML file values, overridden by environment variables, overridden by
/// flags.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub parallelism: usize,
    pub isolation: Isolation,
    pub cost_limit: f64,
    pub resume: Option<ResumeTarget>,
    pub task_ids: Vec<String>,
    pub session_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    parallelism: Option<usize>,
    isolation: Option<String>,
    cost_limit: Option<f64>,
    session_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum CliConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("unknown isolation mode {0:?} in config file (expected worktree, docker, or none)")]
    UnknownIsolation(String),
}

const DEFAULT_PARALLELISM: usize = 4;
const DEFAULT_COST_LIMIT: f64 = 25.0;

fn parse_isolation(raw: &str) -> Result<Isolation, CliConfigError> {
    match raw {
        "worktree" => Ok(Isolation::Worktree),
        "docker" => Ok(Isolation::Docker),
        "none" => Ok(Isolation::None),
        other => Err(CliConfigError::UnknownIsolation(other.to_string())),
    }
}

impl RunArgs {
    /// Resolves this invocation's config by layering, low to high
    /// precedence: built-in defaults, an optional TOML file, environment
    /// variables, then the flags parsed onto `self`.
    pub fn resolve(&self, config_path: Option<&PathBuf>) -> Result<CliConfig, CliConfigError> {
        let file = match config_path {
            Some(path) => {
                let body = std::fs::read_to_string(path)
                    .map_err(|source| CliConfigError::Read { path: path.clone(), source })?;
                toml::from_str::<FileConfig>(&body)
                    .map_err(|source| CliConfigError::Parse { path: path.clone(), source })?
            }
            None => FileConfig::default(),
        };

        let parallelism = self
            .parallelism
            .or_else(|| std::env::var("SWARM_PARALLELISM").ok().and_then(|v| v.parse().ok()))
            .or(file.parallelism)
            .unwrap_or(DEFAULT_PARALLELISM);

        let isolation = match &self.isolation {
            Some(i) => *i,
            None => match std::env::var("SWARM_ISOLATION").ok() {
                Some(v) => parse_isolation(&v)?,
                None => match &file.isolation {
                    Some(v) => parse_isolation(v)?,
                    None => Isolation::Worktree,
                },
            },
        };

        let cost_limit = self
            .cost_limit
            .or_else(|| std::env::var("SWARM_COST_LIMIT").ok().and_then(|v| v.parse().ok()))
            .or(file.cost_limit)
            .unwrap_or(DEFAULT_COST_LIMIT);

        let session_dir = self
            .session_dir
            .clone()
            .or_else(|| std::env::var("SWARM_SESSION_DIR").ok().map(PathBuf::from))
            .or(file.session_dir)
            .unwrap_or_else(|| PathBuf::from(".swarm-sessions"));

        let resume = self
            .resume
            .clone()
            .or_else(|| self.swarm_resume.clone())
            .map(|id| if id == "latest" { ResumeTarget::Latest } else { ResumeTarget::Id(id) });

        Ok(CliConfig {
            parallelism,
            isolation,
            cost_limit,
            resume,
            task_ids: self.task_ids.clone(),
            session_dir,
        })
    }
}

impl CliConfig {
    /// Builds the orchestrator's own run config from the resolved CLI
    /// config. Isolation mode and cost limit don't map onto
    /// `OrchestratorConfig` directly today (isolation is a dispatcher
    /// concern, cost limit is enforced by the `BudgetPool` the caller
    /// constructs separately) — only `parallelism` feeds the wave engine.
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrency: self.parallelism,
            ..OrchestratorConfig::default()
        }
    }
}

/// Process exit codes for the `run`/`grade`/`compare`/`list` subcommands.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn resume_flag_without_value_defaults_to_latest() {
        // A bare trailing --resume (nothing after it) takes no value to
        // consume, so it falls back to default_missing_value.
        let cli = Cli::parse_from(["swarm-agents", "run", "--resume"]);
        let Command::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.resume, Some("latest".to_string()));
        assert!(args.goal.is_none());
    }

    #[test]
    fn resume_flag_does_not_consume_a_following_flag_as_its_value() {
        let cli = Cli::parse_from(["swarm-agents", "run", "--resume", "--parallelism", "8"]);
        let Command::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.resume, Some("latest".to_string()));
        assert_eq!(args.parallelism, Some(8));
    }

    #[test]
    fn resume_flag_with_explicit_id_is_respected() {
        let cli = Cli::parse_from(["swarm-agents", "run", "--resume", "session-42"]);
        let Command::Run(args) = cli.command else { panic!("expected run") };
        let resolved = args.resolve(None).unwrap();
        assert_eq!(resolved.resume, Some(ResumeTarget::Id("session-42".to_string())));
    }

    #[test]
    fn task_ids_split_on_comma() {
        let cli = Cli::parse_from(["swarm-agents", "run", "--task-ids", "a,b,c", "goal"]);
        let Command::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.task_ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cli = Cli::parse_from(["swarm-agents", "run"]);
        let Command::Run(args) = cli.command else { panic!("expected run") };
        let resolved = args.resolve(None).unwrap();
        assert_eq!(resolved.parallelism, DEFAULT_PARALLELISM);
        assert_eq!(resolved.isolation, Isolation::Worktree);
        assert_eq!(resolved.cost_limit, DEFAULT_COST_LIMIT);
        assert!(resolved.resume.is_none());
    }

    #[test]
    fn flags_override_file_config() {
        let dir = std::env::temp_dir().join(format!("agent-cli-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("swarm.toml");
        std::fs::write(&path, "parallelism = 2\ncost_limit = 5.0\n").unwrap();

        let cli = Cli::parse_from(["swarm-agents", "run", "--parallelism", "9"]);
        let Command::Run(args) = cli.command else { panic!("expected run") };
        let resolved = args.resolve(Some(&path)).unwrap();
        assert_eq!(resolved.parallelism, 9);
        assert_eq!(resolved.cost_limit, 5.0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unknown_isolation_in_file_is_a_config_error() {
        let dir = std::env::temp_dir().join(format!("agent-cli-test-iso-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("swarm.toml");
        std::fs::write(&path, "isolation = \"sandbox\"\n").unwrap();

        let cli = Cli::parse_from(["swarm-agents", "run"]);
        let Command::Run(args) = cli.command else { panic!("expected run") };
        let err = args.resolve(Some(&path)).unwrap_err();
        assert!(matches!(err, CliConfigError::UnknownIsolation(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn to_orchestrator_config_carries_parallelism() {
        let resolved = CliConfig {
            parallelism: 7,
            isolation: Isolation::None,
            cost_limit: 10.0,
            resume: None,
            task_ids: vec![],
            session_dir: PathBuf::from("/tmp"),
        };
        assert_eq!(resolved.to_orchestrator_config().max_concurrency, 7);
    }
}
