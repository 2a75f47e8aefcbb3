//! Parses the structured closure report an agent is asked to emit at the
//! tail of its final response.

use serde::{Deserialize, Serialize};

use crate::json_parse::parse_lenient;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureReport {
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub actions_taken: Vec<String>,
    #[serde(default)]
    pub failures: Vec<String>,
    #[serde(default)]
    pub remaining_work: Vec<String>,
    #[serde(default)]
    pub suggested_next_steps: Vec<String>,
}

/// Parses a closure report from the tail of an agent's text output. A
/// completed run is allowed to produce none; this returns `None` rather
/// than an error in that case.
pub fn parse_closure_report(output: &str) -> Option<ClosureReport> {
    let parsed = parse_lenient(output)?;
    serde_json::from_value(parsed.value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_report() {
        let output = r#"I finished the work.

        {"findings": ["the bug was in parser.rs"], "actionsTaken": ["fixed the off-by-one"], "failures": [], "remainingWork": [], "suggestedNextSteps": ["add a regression test"]}"#;
        let report = parse_closure_report(output).unwrap();
        assert_eq!(report.findings, vec!["the bug was in parser.rs".to_string()]);
        assert_eq!(report.suggested_next_steps, vec!["add a regression test".to_string()]);
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let report = parse_closure_report(r#"{"findings": ["x"]}"#).unwrap();
        assert!(report.failures.is_empty());
    }

    #[test]
    fn absence_of_any_json_returns_none() {
        assert!(parse_closure_report("I finished the work with no structured summary.").is_none());
    }
}
