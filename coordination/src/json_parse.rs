//! Three-level lenient JSON parsing for LLM-emitted structured output: the
//! planner's raw text rarely comes back as a bare JSON document.
//!
//! Grounded on `feedback/error_parser.rs`'s staged-fallback parsing (try the
//! strict path, then progressively looser recovery, annotating how far it
//! had to fall back rather than silently treating a recovered parse as
//! pristine).

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryLevel {
    /// The whole input parsed as JSON with no massaging.
    Strict,
    /// A balanced-brace substring of the input parsed as JSON.
    BalancedBraceExtraction,
    /// The extracted substring needed lenient repair (trailing commas,
    /// unquoted-ish keys, etc.) before it would parse.
    Lenient,
}

pub struct ParsedJson {
    pub value: Value,
    pub level: RecoveryLevel,
}

/// Attempts strict parse, then balanced-brace substring extraction, then a
/// lenient repair pass. Returns `None` if none of the three levels produce
/// valid JSON.
pub fn parse_lenient(input: &str) -> Option<ParsedJson> {
    if let Ok(value) = serde_json::from_str(input.trim()) {
        return Some(ParsedJson { value, level: RecoveryLevel::Strict });
    }

    let candidate = extract_balanced_braces(input)?;
    if let Ok(value) = serde_json::from_str(&candidate) {
        return Some(ParsedJson { value, level: RecoveryLevel::BalancedBraceExtraction });
    }

    let repaired = lenient_repair(&candidate);
    serde_json::from_str(&repaired)
        .ok()
        .map(|value| ParsedJson { value, level: RecoveryLevel::Lenient })
}

/// Finds the first top-level `{...}` span with balanced braces, tracking
/// string literals so a brace inside a quoted value doesn't miscount.
fn extract_balanced_braces(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let start = input.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(input[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Repairs the common LLM-output defects: trailing commas before `}`/`]`,
/// and single-quoted strings where JSON requires double quotes.
fn lenient_repair(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                // Skip the comma if the next non-whitespace char closes a
                // collection, i.e. a trailing comma.
                let mut lookahead = chars.clone();
                while let Some(&next) = lookahead.peek() {
                    if next.is_whitespace() {
                        lookahead.next();
                    } else {
                        break;
                    }
                }
                if matches!(lookahead.peek(), Some('}') | Some(']')) {
                    // drop the comma
                } else {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parse_succeeds_on_clean_json() {
        let parsed = parse_lenient(r#"{"a": 1}"#).unwrap();
        assert_eq!(parsed.level, RecoveryLevel::Strict);
    }

    #[test]
    fn extracts_json_embedded_in_prose() {
        let text = "Here is my summary:\n\n```json\n{\"findings\": [\"a\"]}\n```\nThanks.";
        let parsed = parse_lenient(text).unwrap();
        assert_eq!(parsed.level, RecoveryLevel::BalancedBraceExtraction);
        assert_eq!(parsed.value["findings"][0], "a");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let text = r#"prefix {"note": "contains a } brace"} suffix"#;
        let parsed = parse_lenient(text).unwrap();
        assert_eq!(parsed.value["note"], "contains a } brace");
    }

    #[test]
    fn repairs_trailing_commas() {
        let text = r#"{"a": 1, "b": [1, 2,],}"#;
        let parsed = parse_lenient(text).unwrap();
        assert_eq!(parsed.level, RecoveryLevel::Lenient);
        assert_eq!(parsed.value["b"][1], 2);
    }

    #[test]
    fn returns_none_for_unrecoverable_garbage() {
        assert!(parse_lenient("not json at all, no braces").is_none());
    }
}
