//! Tension Analyzer: stakeholder frictions, resource constraints, trade-offs.
//!
//! Computed once per assertion+model pair and treated as immutable context
//! by the phase generator. This is the one component where missing structure
//! is a hard failure: later phases depend on all three sub-lists being
//! present (empty is fine, absent is not).

use serde::{Deserialize, Serialize};

use crate::error::TensionError;
use crate::llm::{self, TextGenerator};
use crate::model::SystemModel;

/// One side of a stakeholder's possible reaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StakeholderResponse {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reasoning: String,
}

/// How one agent may both support and resist the asserted change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompetingStakeholderResponse {
    pub agent_name: String,
    #[serde(default)]
    pub supportive_response: StakeholderResponse,
    #[serde(default)]
    pub resistant_response: StakeholderResponse,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_assumptions: Vec<String>,
}

/// A resource under competing demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConstraint {
    pub resource_name: String,
    #[serde(default)]
    pub demands_on_resource: String,
    #[serde(default)]
    pub potential_scarcity_impact: String,
}

/// A positive outcome paired with its cost or forgone alternative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeOff {
    pub primary_positive_outcome: String,
    pub potential_negative_consequence_or_opportunity_cost: String,
    #[serde(default)]
    pub explanation: String,
}

/// The full tension analysis for one assertion+model pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TensionAnalysis {
    pub competing_stakeholder_responses: Vec<CompetingStakeholderResponse>,
    pub resource_constraints: Vec<ResourceConstraint>,
    pub identified_trade_offs: Vec<TradeOff>,
}

impl TensionAnalysis {
    /// Render the analysis as compact context lines for phase prompts.
    pub fn context_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for r in &self.competing_stakeholder_responses {
            lines.push(format!(
                "Stakeholder {}: support = {}; resist = {}",
                r.agent_name, r.supportive_response.description, r.resistant_response.description
            ));
        }
        for c in &self.resource_constraints {
            lines.push(format!(
                "Resource {}: {} (scarcity impact: {})",
                c.resource_name, c.demands_on_resource, c.potential_scarcity_impact
            ));
        }
        for t in &self.identified_trade_offs {
            lines.push(format!(
                "Trade-off: {} vs {}",
                t.primary_positive_outcome, t.potential_negative_consequence_or_opportunity_cost
            ));
        }
        lines
    }
}

const SYSTEM_PROMPT: &str = "You are a system-dynamics analyst. Given an assertion \
    and a system model, identify the tensions the change creates. Respond with a \
    single JSON object with exactly these fields: competingStakeholderResponses \
    (array of {agentName, supportiveResponse: {description, reasoning}, \
    resistantResponse: {description, reasoning}, keyAssumptions}), \
    resourceConstraints (array of {resourceName, demandsOnResource, \
    potentialScarcityImpact}), identifiedTradeOffs (array of \
    {primaryPositiveOutcome, potentialNegativeConsequenceOrOpportunityCost, \
    explanation}). All three fields must be present even if empty. \
    Return only the JSON object.";

fn build_prompt(assertion: &str, model: &SystemModel) -> String {
    let agents: Vec<&str> = model.agents.iter().map(|a| a.name.as_str()).collect();
    let stocks: Vec<&str> = model.stocks.iter().map(|s| s.name.as_str()).collect();
    format!(
        "Assertion: {assertion}\n\nAgents: {}\nStocks: {}\n\n\
         Derive the stakeholder responses, resource constraints, and trade-offs \
         that will shape how consequences unfold.",
        agents.join(", "),
        stocks.join(", ")
    )
}

const REQUIRED_FIELDS: [&str; 3] = [
    "competingStakeholderResponses",
    "resourceConstraints",
    "identifiedTradeOffs",
];

/// Analyze the tensions an assertion creates in a system model.
///
/// Fails with [`TensionError::IncompleteAnalysis`] if any of the three
/// required sub-lists is absent from the backend output.
pub fn analyze_tensions(
    backend: &dyn TextGenerator,
    assertion: &str,
    model: &SystemModel,
) -> Result<TensionAnalysis, TensionError> {
    let payload = llm::generate_object(backend, &build_prompt(assertion, model), Some(SYSTEM_PROMPT))?;

    for field in REQUIRED_FIELDS {
        if payload.get(field).is_none() {
            return Err(TensionError::IncompleteAnalysis {
                field: field.into(),
            });
        }
    }

    let analysis: TensionAnalysis =
        serde_json::from_value(payload).map_err(|e| TensionError::IncompleteAnalysis {
            field: format!("(malformed) {e}"),
        })?;

    tracing::info!(
        stakeholders = analysis.competing_stakeholder_responses.len(),
        constraints = analysis.resource_constraints.len(),
        trade_offs = analysis.identified_trade_offs.len(),
        "tension analysis complete"
    );

    Ok(analysis)
}
