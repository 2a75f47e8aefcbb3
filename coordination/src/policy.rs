//! Policy engine — resolves the effective tool/bash/approval profile for an agent.
//!
//! Grounded on the staged-decision style of `reviewer_policy.rs` (an ordered
//! pipeline producing a traceable decision) and the bash-argument heuristics
//! of `shell_safety.rs`, generalized here to the tool-whitelist/bash-mode
//! model this orchestration core actually needs (no single source file in
//! the reference codebase implements this exact data model — see DESIGN.md).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// How a profile decides which tools are callable at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAccessMode {
    Whitelist,
    All,
}

/// Bash execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BashMode {
    Disabled,
    ReadOnly,
    Full,
    TaskScoped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BashWriteProtection {
    Off,
    BlockFileMutation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    pub require_for_writes: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            require_for_writes: false,
        }
    }
}

/// A fully-merged tool/bash/approval bundle applied to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyProfile {
    pub tool_access_mode: ToolAccessMode,
    pub allowed_tools: HashSet<String>,
    pub denied_tools: HashSet<String>,
    pub bash_mode: BashMode,
    pub bash_write_protection: BashWriteProtection,
    pub approval: Option<ApprovalConfig>,
}

/// Additive extension applied on top of a base profile: adds/removes tool names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileExtension {
    pub add_allowed: HashSet<String>,
    pub remove_allowed: HashSet<String>,
    pub add_denied: HashSet<String>,
    pub remove_denied: HashSet<String>,
    pub bash_mode: Option<BashMode>,
    pub bash_write_protection: Option<BashWriteProtection>,
}

impl PolicyProfile {
    fn apply_extension(&mut self, ext: &ProfileExtension) {
        for t in &ext.add_allowed {
            self.allowed_tools.insert(t.clone());
        }
        for t in &ext.remove_allowed {
            self.allowed_tools.remove(t);
        }
        for t in &ext.add_denied {
            self.denied_tools.insert(t.clone());
        }
        for t in &ext.remove_denied {
            self.denied_tools.remove(t);
        }
        if let Some(mode) = ext.bash_mode {
            self.bash_mode = mode;
        }
        if let Some(p) = ext.bash_write_protection {
            self.bash_write_protection = p;
        }
    }

    /// Worker `extraTools` are added to allowed *and* removed from denied —
    /// explicit opt-in overrides denial.
    fn grant_extra_tools(&mut self, extra: &[String]) {
        for t in extra {
            self.allowed_tools.insert(t.clone());
            self.denied_tools.remove(t);
        }
    }
}

/// Named built-in defaults.
pub fn default_profiles() -> Vec<(&'static str, PolicyProfile)> {
    vec![
        (
            "research-safe",
            PolicyProfile {
                tool_access_mode: ToolAccessMode::Whitelist,
                allowed_tools: ["read_file", "search", "list_dir"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                denied_tools: HashSet::new(),
                bash_mode: BashMode::ReadOnly,
                bash_write_protection: BashWriteProtection::BlockFileMutation,
                approval: None,
            },
        ),
        (
            "code-strict-bash",
            PolicyProfile {
                tool_access_mode: ToolAccessMode::All,
                allowed_tools: HashSet::new(),
                denied_tools: HashSet::new(),
                bash_mode: BashMode::TaskScoped,
                bash_write_protection: BashWriteProtection::BlockFileMutation,
                approval: None,
            },
        ),
        (
            "code-full",
            PolicyProfile {
                tool_access_mode: ToolAccessMode::All,
                allowed_tools: HashSet::new(),
                denied_tools: HashSet::new(),
                bash_mode: BashMode::Full,
                bash_write_protection: BashWriteProtection::Off,
                approval: None,
            },
        ),
        (
            "review-safe",
            PolicyProfile {
                tool_access_mode: ToolAccessMode::Whitelist,
                allowed_tools: ["read_file", "search", "list_dir", "bash"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                denied_tools: HashSet::new(),
                bash_mode: BashMode::ReadOnly,
                bash_write_protection: BashWriteProtection::BlockFileMutation,
                approval: Some(ApprovalConfig {
                    require_for_writes: true,
                }),
            },
        ),
    ]
}

pub fn base_default_profile() -> PolicyProfile {
    default_profiles()
        .into_iter()
        .find(|(name, _)| *name == "code-strict-bash")
        .map(|(_, p)| p)
        .expect("code-strict-bash is a built-in default")
}

/// Worker capability fields that may request an explicit profile or extra tools.
#[derive(Debug, Clone, Default)]
pub struct WorkerCapabilities {
    pub requested_profile: Option<String>,
    pub extra_tools: Vec<String>,
    pub legacy_allowed_tools: Option<Vec<String>>,
    pub legacy_denied_tools: Option<Vec<String>>,
}

/// Old-style sandbox config fields promoted by legacy fallback.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub legacy_fallback: bool,
    pub bash_mode: Option<BashMode>,
    pub bash_write_protection: Option<BashWriteProtection>,
    pub block_file_creation_via_bash: bool,
    pub global_denied_tools: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionSource {
    Explicit,
    WorkerCapability,
    TaskType,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionMetadata {
    pub source: ResolutionSource,
    pub legacy_fields_used: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    pub profile_name: String,
    pub profile: PolicyProfile,
    pub metadata: ResolutionMetadata,
}

pub struct PolicyResolutionInput<'a> {
    pub explicit_profile: Option<&'a str>,
    pub worker: Option<&'a WorkerCapabilities>,
    pub task_type: Option<&'a str>,
    pub sandbox: Option<&'a SandboxConfig>,
    pub swarm_context: bool,
    pub extensions: Option<&'a ProfileExtension>,
}

fn lookup_profile(name: &str) -> Option<PolicyProfile> {
    default_profiles()
        .into_iter()
        .find(|(n, _)| *n == name)
        .map(|(_, p)| p)
}

/// Resolve the effective `{profileName, profile, metadata}`.
///
/// Order: base default ← requested profile ← profile extensions (additive) ← legacy fallback.
pub fn resolve_policy(input: &PolicyResolutionInput) -> ResolvedPolicy {
    let mut legacy_fields_used = Vec::new();

    let (profile_name, source) = if let Some(name) = input.explicit_profile {
        (name.to_string(), ResolutionSource::Explicit)
    } else if let Some(worker) = input.worker {
        if let Some(name) = &worker.requested_profile {
            (name.clone(), ResolutionSource::WorkerCapability)
        } else if let Some(task_type) = input.task_type {
            (
                task_type_default_profile(task_type).to_string(),
                ResolutionSource::TaskType,
            )
        } else {
            ("code-strict-bash".to_string(), ResolutionSource::Default)
        }
    } else if let Some(task_type) = input.task_type {
        (
            task_type_default_profile(task_type).to_string(),
            ResolutionSource::TaskType,
        )
    } else {
        ("code-strict-bash".to_string(), ResolutionSource::Default)
    };

    let mut profile = lookup_profile(&profile_name).unwrap_or_else(base_default_profile);

    if let Some(ext) = input.extensions {
        profile.apply_extension(ext);
    }

    if let Some(worker) = input.worker {
        if !worker.extra_tools.is_empty() {
            profile.grant_extra_tools(&worker.extra_tools);
        }
    }

    if let Some(sandbox) = input.sandbox {
        if sandbox.legacy_fallback {
            if !sandbox.global_denied_tools.is_empty() {
                for t in &sandbox.global_denied_tools {
                    profile.denied_tools.insert(t.clone());
                }
                legacy_fields_used.push("sandbox.globalDeniedTools".to_string());
            }
            if let Some(mode) = sandbox.bash_mode {
                profile.bash_mode = mode;
                legacy_fields_used.push("sandbox.bashMode".to_string());
            }
            if let Some(p) = sandbox.bash_write_protection {
                profile.bash_write_protection = p;
                legacy_fields_used.push("sandbox.bashWriteProtection".to_string());
            }
            if sandbox.block_file_creation_via_bash {
                profile.bash_write_protection = BashWriteProtection::BlockFileMutation;
                legacy_fields_used.push("sandbox.blockFileCreationViaBash".to_string());
            }
            if let Some(worker) = input.worker {
                if let Some(allowed) = &worker.legacy_allowed_tools {
                    for t in allowed {
                        profile.allowed_tools.insert(t.clone());
                    }
                    legacy_fields_used.push("worker.allowedTools".to_string());
                }
                if let Some(denied) = &worker.legacy_denied_tools {
                    for t in denied {
                        profile.denied_tools.insert(t.clone());
                    }
                    legacy_fields_used.push("worker.deniedTools".to_string());
                }
            }
        }
    }

    ResolvedPolicy {
        profile_name,
        profile,
        metadata: ResolutionMetadata {
            source,
            legacy_fields_used,
        },
    }
}

fn task_type_default_profile(task_type: &str) -> &'static str {
    match task_type {
        "research" | "analysis" => "research-safe",
        "review" => "review-safe",
        _ => "code-strict-bash",
    }
}

/// Reason a tool call was allowed or denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDecision {
    Allowed,
    Denied { reason: String },
}

/// `isToolAllowed(name, profile)`.
pub fn is_tool_allowed(name: &str, profile: &PolicyProfile) -> ToolDecision {
    if profile.tool_access_mode == ToolAccessMode::Whitelist
        && !profile.allowed_tools.contains(name)
    {
        return ToolDecision::Denied {
            reason: format!("'{name}' is not in the whitelist for this profile"),
        };
    }
    if profile.denied_tools.contains(name) {
        return ToolDecision::Denied {
            reason: format!("'{name}' is explicitly denied for this profile"),
        };
    }
    ToolDecision::Allowed
}

const TASK_SCOPED_READ_ONLY_TYPES: &[&str] = &[
    "implement",
    "test",
    "refactor",
    "integrate",
    "deploy",
    "document",
];

/// `evaluateBash(command, profile, taskType)`.
pub fn evaluate_bash(command: &str, profile: &PolicyProfile, task_type: &str) -> ToolDecision {
    let effective_mode = match profile.bash_mode {
        BashMode::TaskScoped => {
            if TASK_SCOPED_READ_ONLY_TYPES.contains(&task_type) {
                BashMode::ReadOnly
            } else {
                BashMode::Disabled
            }
        }
        other => other,
    };

    match effective_mode {
        BashMode::Disabled => ToolDecision::Denied {
            reason: "bash is disabled for this profile".to_string(),
        },
        BashMode::Full => ToolDecision::Allowed,
        BashMode::ReadOnly => {
            if is_read_only_command(command) {
                ToolDecision::Allowed
            } else {
                ToolDecision::Denied {
                    reason: "bash is read-only for this profile and the command is not a recognized read".to_string(),
                }
            }
        }
        BashMode::TaskScoped => unreachable!("expanded above"),
    }
}

fn is_read_only_command(command: &str) -> bool {
    bash_file_target(command).is_some()
}

const READ_ONLY_VERBS: &[&str] = &["cat", "head", "tail", "grep"];

/// Heuristic extraction of a single file target from a bash command, used
/// both for read-only verification and for `bashWriteProtection`. Only
/// recognizes `cat|head|tail|grep <single-path>` with no pipes/redirects.
pub fn bash_file_target(command: &str) -> Option<String> {
    let command = command.trim();
    if command.contains('|') || command.contains('>') || command.contains('<') {
        return None;
    }
    let mut parts = command.split_whitespace();
    let verb = parts.next()?;
    if !READ_ONLY_VERBS.contains(&verb) {
        return None;
    }
    let mut remaining: Vec<&str> = parts.collect();
    // grep needs a pattern argument before the path; drop flags and the pattern.
    if verb == "grep" {
        remaining.retain(|tok| !tok.starts_with('-'));
        if remaining.len() < 2 {
            return None;
        }
        remaining.remove(0);
    } else {
        remaining.retain(|tok| !tok.starts_with('-'));
    }
    if remaining.len() != 1 {
        return None;
    }
    Some(remaining[0].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_denies_unlisted_tool() {
        let profile = lookup_profile("research-safe").unwrap();
        assert_eq!(
            is_tool_allowed("write_file", &profile),
            ToolDecision::Denied {
                reason: "'write_file' is not in the whitelist for this profile".to_string()
            }
        );
        assert_eq!(is_tool_allowed("read_file", &profile), ToolDecision::Allowed);
    }

    #[test]
    fn all_mode_denies_only_explicit_denials() {
        let mut profile = lookup_profile("code-full").unwrap();
        profile.denied_tools.insert("dangerous_tool".to_string());
        assert_eq!(is_tool_allowed("anything", &profile), ToolDecision::Allowed);
        assert!(matches!(
            is_tool_allowed("dangerous_tool", &profile),
            ToolDecision::Denied { .. }
        ));
    }

    #[test]
    fn extra_tools_override_denial() {
        let mut profile = lookup_profile("code-strict-bash").unwrap();
        profile.denied_tools.insert("bash".to_string());
        profile.grant_extra_tools(&["bash".to_string()]);
        assert!(!profile.denied_tools.contains("bash"));
        assert!(profile.allowed_tools.contains("bash"));
    }

    #[test]
    fn task_scoped_bash_expands_for_implement() {
        let profile = lookup_profile("code-strict-bash").unwrap();
        assert_eq!(
            evaluate_bash("cat src/main.rs", &profile, "implement"),
            ToolDecision::Allowed
        );
        assert!(matches!(
            evaluate_bash("rm -rf /", &profile, "implement"),
            ToolDecision::Denied { .. }
        ));
    }

    #[test]
    fn task_scoped_bash_disabled_for_unlisted_type() {
        let profile = lookup_profile("code-strict-bash").unwrap();
        assert!(matches!(
            evaluate_bash("cat src/main.rs", &profile, "design"),
            ToolDecision::Denied { .. }
        ));
    }

    #[test]
    fn bash_file_target_extraction() {
        assert_eq!(bash_file_target("cat src/main.rs"), Some("src/main.rs".to_string()));
        assert_eq!(
            bash_file_target("grep -n foo src/main.rs"),
            Some("src/main.rs".to_string())
        );
        assert_eq!(bash_file_target("cat a.txt | grep x"), None);
        assert_eq!(bash_file_target("cat a.txt > b.txt"), None);
        assert_eq!(bash_file_target("rm -rf /"), None);
        assert_eq!(bash_file_target("cat a.txt b.txt"), None);
    }

    #[test]
    fn legacy_fallback_promotes_fields_and_emits_warnings() {
        let sandbox = SandboxConfig {
            legacy_fallback: true,
            bash_mode: Some(BashMode::Full),
            bash_write_protection: None,
            block_file_creation_via_bash: true,
            global_denied_tools: vec!["nuke".to_string()],
        };
        let input = PolicyResolutionInput {
            explicit_profile: Some("code-strict-bash"),
            worker: None,
            task_type: None,
            sandbox: Some(&sandbox),
            swarm_context: false,
            extensions: None,
        };
        let resolved = resolve_policy(&input);
        assert_eq!(resolved.profile.bash_mode, BashMode::Full);
        assert_eq!(
            resolved.profile.bash_write_protection,
            BashWriteProtection::BlockFileMutation
        );
        assert!(resolved.profile.denied_tools.contains("nuke"));
        assert!(!resolved.metadata.legacy_fields_used.is_empty());
    }

    #[test]
    fn legacy_fallback_skipped_when_disabled() {
        let sandbox = SandboxConfig {
            legacy_fallback: false,
            bash_mode: Some(BashMode::Full),
            ..Default::default()
        };
        let input = PolicyResolutionInput {
            explicit_profile: Some("code-strict-bash"),
            worker: None,
            task_type: None,
            sandbox: Some(&sandbox),
            swarm_context: false,
            extensions: None,
        };
        let resolved = resolve_policy(&input);
        assert_eq!(resolved.profile.bash_mode, BashMode::TaskScoped);
        assert!(resolved.metadata.legacy_fields_used.is_empty());
    }

    #[test]
    fn monotonicity_adding_denied_never_allows() {
        let mut profile = lookup_profile("code-full").unwrap();
        assert_eq!(is_tool_allowed("x", &profile), ToolDecision::Allowed);
        profile.denied_tools.insert("x".to_string());
        assert!(matches!(
            is_tool_allowed("x", &profile),
            ToolDecision::Denied { .. }
        ));
    }

    #[test]
    fn monotonicity_removing_allowed_under_whitelist_never_allows() {
        let mut profile = lookup_profile("research-safe").unwrap();
        assert_eq!(is_tool_allowed("read_file", &profile), ToolDecision::Allowed);
        profile.allowed_tools.remove("read_file");
        assert!(matches!(
            is_tool_allowed("read_file", &profile),
            ToolDecision::Denied { .. }
        ));
    }
}
