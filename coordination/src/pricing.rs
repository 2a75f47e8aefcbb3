//! Model-pricing table: the one piece of process-wide immutable state the
//! core depends on besides the default policy profiles.

/// Per-1k-token rates for one model.
#[derive(Debug, Clone, Copy)]
pub struct ModelRate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

const RATES: &[(&str, ModelRate)] = &[
    (
        "claude-opus",
        ModelRate {
            input_per_1k: 0.015,
            output_per_1k: 0.075,
        },
    ),
    (
        "claude-sonnet",
        ModelRate {
            input_per_1k: 0.003,
            output_per_1k: 0.015,
        },
    ),
    (
        "claude-haiku",
        ModelRate {
            input_per_1k: 0.0008,
            output_per_1k: 0.004,
        },
    ),
    (
        "gpt-4o",
        ModelRate {
            input_per_1k: 0.0025,
            output_per_1k: 0.01,
        },
    ),
    (
        "gpt-4o-mini",
        ModelRate {
            input_per_1k: 0.00015,
            output_per_1k: 0.0006,
        },
    ),
];

/// Looks up pricing for `model`. Unknown models return `None`, which callers
/// treat as a zero-cost contribution, never an error.
pub fn lookup(model: &str) -> Option<ModelRate> {
    RATES
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, rate)| *rate)
}

/// `cost += in/1000 * inputRate + out/1000 * outputRate`, or 0 for an unknown model.
pub fn estimate_cost(input_tokens: u64, output_tokens: u64, model: Option<&str>) -> f64 {
    let Some(model) = model else { return 0.0 };
    match lookup(model) {
        Some(rate) => {
            (input_tokens as f64 / 1000.0) * rate.input_per_1k
                + (output_tokens as f64 / 1000.0) * rate.output_per_1k
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_computes_cost() {
        let cost = estimate_cost(1000, 1000, Some("claude-sonnet"));
        assert!((cost - 0.018).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_is_zero_cost_not_error() {
        assert_eq!(estimate_cost(1000, 1000, Some("no-such-model")), 0.0);
    }

    #[test]
    fn no_model_is_zero_cost() {
        assert_eq!(estimate_cost(1000, 1000, None), 0.0);
    }
}
