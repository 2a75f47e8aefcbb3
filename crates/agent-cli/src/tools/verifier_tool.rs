//! Rig tool wrapper around a self-contained cargo quality-gate pipeline.
//!
//! Shells straight out to `cargo fmt --check`, `cargo clippy`, `cargo
//! check`, and `cargo test` so the Manager agent can request a gate run
//! via tool calling without any dependency on the swarm engine itself.

use std::path::{Path, PathBuf};
use std::process::Output;

use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde::Deserialize;

use super::ToolError;

#[derive(Deserialize)]
pub struct RunVerifierArgs {
    /// Which gates to run: "quick" (fmt+check), "compile" (clippy+check), or "full" (all).
    pub mode: Option<String>,
}

struct GateResult {
    name: &'static str,
    passed: bool,
    output: String,
}

/// Run cargo's quality gates directly and return a structured report.
pub struct RunVerifierTool {
    pub working_dir: PathBuf,
    /// Scope cargo commands to specific packages (empty = whole workspace).
    pub packages: Vec<String>,
}

impl RunVerifierTool {
    pub fn new(working_dir: &Path) -> Self {
        Self {
            working_dir: working_dir.to_path_buf(),
            packages: Vec::new(),
        }
    }

    pub fn with_packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }

    fn package_args(&self) -> Vec<String> {
        self.packages
            .iter()
            .flat_map(|p| vec!["-p".to_string(), p.clone()])
            .collect()
    }

    fn run_cargo(&self, args: &[String]) -> std::io::Result<Output> {
        std::process::Command::new("cargo")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
    }

    fn gate(&self, name: &'static str, args: Vec<String>) -> GateResult {
        match self.run_cargo(&args) {
            Ok(out) => GateResult {
                name,
                passed: out.status.success(),
                output: String::from_utf8_lossy(&out.stderr).to_string(),
            },
            Err(e) => GateResult {
                name,
                passed: false,
                output: format!("failed to spawn cargo: {e}"),
            },
        }
    }

    fn fmt_gate(&self) -> GateResult {
        self.gate("fmt", vec!["fmt".into(), "--check".into()])
    }

    fn check_gate(&self) -> GateResult {
        let mut args = vec!["check".into()];
        args.extend(self.package_args());
        self.gate("check", args)
    }

    fn clippy_gate(&self) -> GateResult {
        let mut args = vec!["clippy".into()];
        args.extend(self.package_args());
        args.push("--".into());
        args.push("-D".into());
        args.push("warnings".into());
        self.gate("clippy", args)
    }

    fn test_gate(&self) -> GateResult {
        let mut args = vec!["test".into()];
        args.extend(self.package_args());
        self.gate("test", args)
    }
}

impl Tool for RunVerifierTool {
    const NAME: &'static str = "run_verifier";
    type Error = ToolError;
    type Args = RunVerifierArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: "run_verifier".into(),
            description: "Run the Rust quality gate pipeline: cargo fmt, clippy, check, test. \
                          Returns a structured pass/fail report."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "mode": {
                        "type": "string",
                        "enum": ["quick", "compile", "full"],
                        "description": "Gate selection: quick (fmt+check), compile (clippy+check), full (all gates). Defaults to full."
                    }
                }
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let gates: Vec<GateResult> = match args.mode.as_deref() {
            Some("quick") => vec![self.fmt_gate(), self.check_gate()],
            Some("compile") => vec![self.clippy_gate(), self.check_gate()],
            _ => vec![
                self.fmt_gate(),
                self.clippy_gate(),
                self.check_gate(),
                self.test_gate(),
            ],
        };

        let passed = gates.iter().filter(|g| g.passed).count();
        let total = gates.len();
        let all_green = passed == total;

        let mut output = String::new();
        output.push_str("## Verifier Report\n\n");
        output.push_str(&format!(
            "**Result:** {}\n",
            if all_green { "ALL GREEN" } else { "FAILED" }
        ));
        output.push_str(&format!("**Gates:** {passed}/{total} passed\n\n"));

        for gate in &gates {
            if !gate.passed {
                output.push_str(&format!("### {} FAILED\n\n", gate.name));
                let truncated: String = gate.output.chars().take(4000).collect();
                output.push_str(&truncated);
                output.push_str("\n\n");
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_run_verifier_args_deserialize_full() {
        let json = r#"{"mode": "full"}"#;
        let args: RunVerifierArgs = serde_json::from_str(json).unwrap();
        assert_eq!(args.mode.as_deref(), Some("full"));
    }

    #[test]
    fn test_run_verifier_args_deserialize_quick() {
        let json = r#"{"mode": "quick"}"#;
        let args: RunVerifierArgs = serde_json::from_str(json).unwrap();
        assert_eq!(args.mode.as_deref(), Some("quick"));
    }

    #[test]
    fn test_run_verifier_args_deserialize_none() {
        let json = r#"{}"#;
        let args: RunVerifierArgs = serde_json::from_str(json).unwrap();
        assert!(args.mode.is_none());
    }

    #[test]
    fn test_run_verifier_tool_new() {
        let tool = RunVerifierTool::new(Path::new("/tmp/test"));
        assert_eq!(tool.working_dir, PathBuf::from("/tmp/test"));
        assert!(tool.packages.is_empty());
    }

    #[test]
    fn test_run_verifier_tool_with_packages() {
        let tool = RunVerifierTool::new(Path::new("/tmp/test"))
            .with_packages(vec!["swarm-agents".to_string(), "coordination".to_string()]);
        assert_eq!(tool.packages.len(), 2);
        assert_eq!(tool.package_args(), vec!["-p", "swarm-agents", "-p", "coordination"]);
    }

    #[test]
    fn test_run_verifier_args_invalid_mode_still_deserializes() {
        let json = r#"{"mode": "invalid"}"#;
        let args: RunVerifierArgs = serde_json::from_str(json).unwrap();
        assert_eq!(args.mode.as_deref(), Some("invalid"));
    }
}
