//! Goal decomposer agent: turns a goal into a subtask JSON document.

use rig::client::CompletionClient;
use rig::providers::openai;

use crate::prompts;

use super::coder::OaiAgent;

/// Build the goal decomposer agent.
///
/// NO tools — a single completion call whose response is parsed as JSON,
/// not executed. Low temperature favors the requested schema over creative
/// phrasing.
pub fn build_decomposer(client: &openai::CompletionsClient, model: &str) -> OaiAgent {
    client
        .agent(model)
        .name("decomposer")
        .description("Breaks a goal down into a dependency-ordered subtask list.")
        .preamble(prompts::DECOMPOSER_PREAMBLE)
        .temperature(0.2)
        .build()
}
