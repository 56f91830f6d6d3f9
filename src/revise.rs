//! Model revision: fold free-text user feedback into an existing model.
//!
//! Additive by default: elements the feedback does not target should
//! survive the revision. Degrades to the unchanged model when the backend
//! output is malformed or structurally broken beyond edge repair.

use crate::llm::{self, TextGenerator};
use crate::model::SystemModel;

/// Summary text used when a revision cannot be applied.
pub const REVISION_FAILED_SUMMARY: &str =
    "The revision could not be applied; the model is unchanged.";

/// Result of a model revision.
#[derive(Debug, Clone)]
pub struct Revision {
    pub model: SystemModel,
    pub summary: String,
}

const SYSTEM_PROMPT: &str = "You are a system-dynamics analyst revising an existing \
    system model based on user feedback. Preserve every stock, agent, incentive, and \
    flow the feedback does not ask you to change. Any newly added stock or agent must \
    be connected to the rest of the model through at least one incentive or stock \
    flow. Respond with a single JSON object: {\"revisedSystemModel\": {stocks, agents, \
    incentives, stockFlows}, \"revisionSummary\": \"<what changed and why>\"}. Use the \
    same field shapes as the input model. Return only the JSON object.";

fn build_prompt(model: &SystemModel, feedback: &str) -> String {
    let model_json =
        serde_json::to_string_pretty(model).unwrap_or_else(|_| "{}".into());
    format!("Current system model:\n{model_json}\n\nUser feedback:\n{feedback}")
}

/// Revise `model` according to `feedback`.
///
/// The revised model satisfies the same referential invariant as a freshly
/// built one: dangling edges in the backend output are dropped with a
/// warning, and anything worse falls back to the original model. Additions
/// left structurally isolated are flagged in the summary.
pub fn revise_model(backend: &dyn TextGenerator, model: &SystemModel, feedback: &str) -> Revision {
    let payload = match llm::generate_object(backend, &build_prompt(model, feedback), Some(SYSTEM_PROMPT))
    {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "revision backend call failed");
            return Revision {
                model: model.clone(),
                summary: REVISION_FAILED_SUMMARY.into(),
            };
        }
    };

    let Some(revised_value) = payload.get("revisedSystemModel") else {
        tracing::warn!("revision response missing revisedSystemModel");
        return Revision {
            model: model.clone(),
            summary: REVISION_FAILED_SUMMARY.into(),
        };
    };

    let mut revised: SystemModel = match serde_json::from_value(revised_value.clone()) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "revised model did not match schema");
            return Revision {
                model: model.clone(),
                summary: REVISION_FAILED_SUMMARY.into(),
            };
        }
    };

    if revised.stocks.is_empty() {
        tracing::warn!("revised model has no stocks; keeping original");
        return Revision {
            model: model.clone(),
            summary: REVISION_FAILED_SUMMARY.into(),
        };
    }

    match revised.repair() {
        Ok(dropped) if dropped > 0 => {
            tracing::warn!(dropped, "repaired revised model by dropping dangling edges");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "revised model structurally invalid; keeping original");
            return Revision {
                model: model.clone(),
                summary: REVISION_FAILED_SUMMARY.into(),
            };
        }
    }

    let mut summary = payload
        .get("revisionSummary")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "Model revised per feedback.".into());

    // New elements with no incentive/flow touching them are a modeling
    // defect; surface them rather than letting them vanish into the UI.
    let previously_known: std::collections::BTreeSet<String> = model
        .stock_names()
        .into_iter()
        .chain(model.agent_names())
        .map(String::from)
        .collect();
    let isolated_additions: Vec<String> = revised
        .isolated_names()
        .into_iter()
        .filter(|n| !previously_known.contains(n))
        .collect();
    if !isolated_additions.is_empty() {
        tracing::warn!(
            isolated = isolated_additions.len(),
            "revision added structurally isolated elements"
        );
        summary.push_str(&format!(
            " Note: newly added element(s) not yet connected to the rest of the model: {}.",
            isolated_additions.join(", ")
        ));
    }

    tracing::info!(
        stocks = revised.stocks.len(),
        agents = revised.agents.len(),
        "model revision applied"
    );

    Revision {
        model: revised,
        summary,
    }
}
