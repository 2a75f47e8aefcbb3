//! Ordered prompt construction for a spawned child agent.
//!
//! Grounded on `work_packet/generator.rs`'s section-by-section context
//! assembly (append a block only if its source data is present, join with
//! blank lines) applied to the spawner's prompt sections instead of a
//! work-packet's review context.

/// One finding surfaced by a sibling agent, used to build the blackboard
/// context block.
pub struct BlackboardFinding {
    pub agent_name: String,
    pub summary: String,
    pub confidence: f64,
}

pub struct SpawnConstraints {
    pub focus: Option<String>,
    pub exclude: Option<String>,
    pub deliverables: Option<String>,
    pub timebox_minutes: Option<u32>,
}

/// Concatenates, in order: system prompt, plan-mode addition, blackboard
/// context, pending-plan file list, resource-awareness block,
/// constraints block, delegation spec, quality prompt.
#[allow(clippy::too_many_arguments)]
pub fn build_prompt(
    system_prompt: &str,
    plan_mode: bool,
    blackboard: &[BlackboardFinding],
    pending_plan_files: &[String],
    tokens_remaining: u64,
    seconds_remaining: u64,
    constraints: Option<&SpawnConstraints>,
    parent_complexity_nontrivial: bool,
) -> String {
    let mut sections = vec![system_prompt.to_string()];

    if plan_mode {
        sections.push(
            "You are operating in plan mode: queue write-intent tool calls as proposed \
             changes rather than applying them directly."
                .to_string(),
        );
    }

    if !blackboard.is_empty() {
        let mut block = String::from("Recent findings from sibling agents:\n");
        for finding in blackboard.iter().filter(|f| f.confidence >= 0.6).take(5) {
            block.push_str(&format!("- [{}] {}\n", finding.agent_name, finding.summary));
        }
        sections.push(block);
    }

    if !pending_plan_files.is_empty() {
        let mut block = String::from("Files already queued by pending changes (avoid duplicating this work):\n");
        for file in pending_plan_files {
            block.push_str(&format!("- {file}\n"));
        }
        sections.push(block);
    }

    sections.push(format!(
        "Resource budget: approximately {tokens_remaining} tokens and {seconds_remaining} seconds remain. \
         Wrap up with a structured summary before either runs out."
    ));

    if let Some(c) = constraints {
        let mut block = String::from("Constraints:\n");
        if let Some(focus) = &c.focus {
            block.push_str(&format!("- Focus: {focus}\n"));
        }
        if let Some(exclude) = &c.exclude {
            block.push_str(&format!("- Exclude: {exclude}\n"));
        }
        if let Some(deliverables) = &c.deliverables {
            block.push_str(&format!("- Deliverables: {deliverables}\n"));
        }
        if let Some(timebox) = c.timebox_minutes {
            block.push_str(&format!("- Timebox: {timebox} minutes\n"));
        }
        sections.push(block);
    }

    if parent_complexity_nontrivial {
        sections.push(
            "This task was delegated because the parent judged it nontrivial; \
             be thorough rather than fast."
                .to_string(),
        );
    }

    sections.push(
        "When you finish, end your response with a JSON object containing findings, \
         actionsTaken, failures, remainingWork, and suggestedNextSteps."
            .to_string(),
    );

    sections.join("\n\n")
}
