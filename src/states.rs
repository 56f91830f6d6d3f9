//! State Inference Engine: assign an initial qualitative state to every stock.
//!
//! Never fails hard. When the backend misbehaves the original model comes
//! back untouched with a summary that says so; downstream phases tolerate
//! missing states, so this is a degradation rather than an error.

use crate::llm::{self, TextGenerator};
use crate::model::{QualitativeStateMap, SystemModel};

/// Summary text used when inference cannot be applied.
pub const INFERENCE_FAILED_SUMMARY: &str =
    "State inference failed; stock states are unset.";

/// Result of initial state inference.
#[derive(Debug, Clone)]
pub struct StateInference {
    /// The input model with `qualitative_state` populated where inference
    /// succeeded. The stock-name set is always identical to the input's.
    pub model: SystemModel,
    /// Short natural-language description of the inferred starting point.
    pub summary: String,
}

const SYSTEM_PROMPT: &str = "You are a system-dynamics analyst. Given an assertion \
    and a system model, assign each stock a short qualitative state label such as \
    \"Strong\", \"Depleted\", or \"Volatile\" describing its condition at the moment \
    the assertion takes hold. Respond with a single JSON object: \
    {\"stockStates\": {\"<stock name>\": \"<state>\", ...}, \
    \"initialStatesSummary\": \"<one or two sentences>\"}. \
    Use the stock names exactly as given. Return only the JSON object.";

fn build_prompt(assertion: &str, model: &SystemModel) -> String {
    let stock_lines: Vec<String> = model
        .stocks
        .iter()
        .map(|s| match &s.description {
            Some(d) => format!("- {} ({})", s.name, d),
            None => format!("- {}", s.name),
        })
        .collect();
    format!(
        "Assertion: {assertion}\n\nStocks:\n{}\n\n\
         Assign every stock exactly one state label.",
        stock_lines.join("\n")
    )
}

/// Infer initial qualitative states for every stock in `model`.
///
/// Contract: the output model's stock-name set is identical to the input's;
/// only `qualitative_state` fields change. State labels returned for
/// unknown stock names are ignored with a warning.
pub fn infer_initial_states(
    backend: &dyn TextGenerator,
    assertion: &str,
    model: &SystemModel,
) -> StateInference {
    let payload = match llm::generate_object(backend, &build_prompt(assertion, model), Some(SYSTEM_PROMPT))
    {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "state inference backend call failed");
            return StateInference {
                model: model.clone(),
                summary: INFERENCE_FAILED_SUMMARY.into(),
            };
        }
    };

    let Some(states_obj) = payload.get("stockStates").and_then(|v| v.as_object()) else {
        tracing::warn!("state inference response missing stockStates object");
        return StateInference {
            model: model.clone(),
            summary: INFERENCE_FAILED_SUMMARY.into(),
        };
    };

    let mut states = QualitativeStateMap::new();
    for (name, value) in states_obj {
        let Some(state) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            tracing::warn!(stock = %name, "ignoring non-string state label");
            continue;
        };
        if model.stock(name).is_none() {
            tracing::warn!(stock = %name, "ignoring state for unknown stock");
            continue;
        }
        states.insert(name.clone(), state.to_string());
    }

    if states.is_empty() {
        tracing::warn!("state inference produced no usable states");
        return StateInference {
            model: model.clone(),
            summary: INFERENCE_FAILED_SUMMARY.into(),
        };
    }

    let mut inferred = model.clone();
    inferred.apply_states(&states);

    let summary = payload
        .get("initialStatesSummary")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("Inferred initial states for {} stock(s).", states.len()));

    tracing::info!(states = states.len(), "inferred initial stock states");

    StateInference {
        model: inferred,
        summary,
    }
}
