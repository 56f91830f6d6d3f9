//! Phased Impact Generator: the core consequence-generation protocol.
//!
//! A pure transition function invoked once per phase by the session. Each
//! call sees the cumulative system state (the qualitative-state map after
//! all prior deltas were folded in) plus the tension context, which is what
//! makes a phase-2 call meaningfully different from running phase 1 twice.
//!
//! This component never fails hard: a misbehaving backend degrades to an
//! empty phase result so the cascade can still present partial results.

use crate::impact::{Impact, Phase};
use crate::llm::{self, TextGenerator};
use crate::model::{QualitativeStateMap, SystemModel};
use crate::tension::TensionAnalysis;

/// Output of one phase-generation call.
#[derive(Debug, Clone, Default)]
pub struct PhaseResult {
    /// Impacts generated this phase, in backend order.
    pub impacts: Vec<Impact>,
    /// Stock-state changes caused by this phase's impacts.
    ///
    /// `None` means no stock states changed; invalid backend deltas are
    /// discarded entirely rather than partially applied, so a `Some` value
    /// is always a validated, non-empty string-to-string map.
    pub state_delta: Option<QualitativeStateMap>,
    /// Reinforcing/balancing dynamics noticed during generation.
    pub feedback_insights: Vec<String>,
}

impl PhaseResult {
    /// The degraded "no new consequences this round" result.
    pub fn empty() -> PhaseResult {
        PhaseResult::default()
    }
}

const SYSTEM_PROMPT: &str = "You are a system-dynamics analyst tracing the cascading \
    consequences of an assertion through a modeled system. Respond with a single \
    JSON object: {\"impacts\": [{id, label, description, validity (high|medium|low), \
    reasoning, parentId, keyConcepts, attributes, causalReasoning}, ...], \
    \"updatedSystemQualitativeStates\": {\"<stock name>\": \"<new state>\", ...}, \
    \"feedbackLoopInsights\": [\"...\", ...]}. \
    Include updatedSystemQualitativeStates only when an impact genuinely shifts a \
    stock's state; omit the field when nothing changes. Return only the JSON object.";

fn phase_guidance(phase: Phase, parent_count: usize) -> String {
    match phase {
        Phase::First => "Generate 3-5 first-order impacts: direct consequences of the \
             assertion itself. Leave parentId out."
            .into(),
        Phase::Second => format!(
            "Generate 2-3 second-order impacts per parent impact ({parent_count} parents). \
             Each impact must set parentId to the id of the first-order impact it follows from."
        ),
        Phase::Third => format!(
            "Generate 1-2 third-order impacts per parent impact ({parent_count} parents). \
             Each impact must set parentId to the id of the second-order impact it follows from."
        ),
    }
}

fn build_prompt(
    assertion: &str,
    phase: Phase,
    parents: &[Impact],
    states: &QualitativeStateMap,
    tensions: Option<&TensionAnalysis>,
    model: &SystemModel,
) -> String {
    let mut sections = vec![format!("Assertion: {assertion}")];

    let stocks: Vec<&str> = model.stocks.iter().map(|s| s.name.as_str()).collect();
    let agents: Vec<&str> = model.agents.iter().map(|a| a.name.as_str()).collect();
    sections.push(format!(
        "System model stocks: {}\nSystem model agents: {}",
        stocks.join(", "),
        agents.join(", ")
    ));

    if !states.is_empty() {
        let lines: Vec<String> = states.iter().map(|(k, v)| format!("- {k}: {v}")).collect();
        sections.push(format!("Current qualitative stock states:\n{}", lines.join("\n")));
    }

    if let Some(t) = tensions {
        let lines = t.context_lines();
        if !lines.is_empty() {
            sections.push(format!("Identified tensions:\n{}", lines.join("\n")));
        }
    }

    if !parents.is_empty() {
        let lines: Vec<String> = parents
            .iter()
            .map(|p| format!("- [{}] {}: {}", p.id, p.label, p.description))
            .collect();
        sections.push(format!(
            "Parent impacts from the previous phase:\n{}",
            lines.join("\n")
        ));
    }

    sections.push(phase_guidance(phase, parents.len()));
    sections.join("\n\n")
}

/// Validate a raw backend state delta into the canonical form.
///
/// Only a flat string-to-string object is acceptable. Anything else (array,
/// nested object, non-string value) discards the delta entirely; partial
/// application of unvalidated state changes is not allowed. An empty object
/// also normalizes to `None`: "nothing changed" is expressed by absence.
pub fn normalize_state_delta(raw: Option<&serde_json::Value>) -> Option<QualitativeStateMap> {
    let value = raw?;
    let Some(obj) = value.as_object() else {
        tracing::warn!("discarding state delta: not a JSON object");
        return None;
    };

    let mut delta = QualitativeStateMap::new();
    for (name, state) in obj {
        match state.as_str() {
            Some(s) if !s.trim().is_empty() => {
                delta.insert(name.clone(), s.trim().to_string());
            }
            _ => {
                tracing::warn!(stock = %name, "discarding state delta: non-string state value");
                return None;
            }
        }
    }

    if delta.is_empty() {
        None
    } else {
        Some(delta)
    }
}

/// Generate one phase of consequence impacts.
///
/// Guard: phases 2/3 with no parent impacts short-circuit to an empty
/// result without touching the backend, so no orphaned lineage can be
/// produced. Backend failure likewise degrades to an empty result.
pub fn generate_phase(
    backend: &dyn TextGenerator,
    assertion: &str,
    phase: Phase,
    parents: &[Impact],
    states: &QualitativeStateMap,
    tensions: Option<&TensionAnalysis>,
    model: &SystemModel,
) -> PhaseResult {
    if phase.requires_parents() && parents.is_empty() {
        tracing::debug!(%phase, "no parent impacts; skipping phase generation");
        return PhaseResult::empty();
    }

    let prompt = build_prompt(assertion, phase, parents, states, tensions, model);
    let payload = match llm::generate_object(backend, &prompt, Some(SYSTEM_PROMPT)) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(%phase, error = %e, "phase generation failed; returning empty result");
            return PhaseResult::empty();
        }
    };

    let impacts = decode_impacts(&payload, phase, parents);
    let state_delta = normalize_state_delta(payload.get("updatedSystemQualitativeStates"));
    let feedback_insights: Vec<String> = payload
        .get("feedbackLoopInsights")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    tracing::info!(
        %phase,
        impacts = impacts.len(),
        delta = state_delta.as_ref().map(|d| d.len()).unwrap_or(0),
        insights = feedback_insights.len(),
        "phase generation complete"
    );

    PhaseResult {
        impacts,
        state_delta,
        feedback_insights,
    }
}

fn decode_impacts(payload: &serde_json::Value, phase: Phase, parents: &[Impact]) -> Vec<Impact> {
    let Some(raw) = payload.get("impacts").and_then(|v| v.as_array()) else {
        tracing::warn!(%phase, "phase response missing impacts array");
        return Vec::new();
    };

    let parent_ids: Vec<&str> = parents.iter().map(|p| p.id.as_str()).collect();
    let mut seen_ids = std::collections::BTreeSet::new();
    let mut impacts = Vec::new();

    for (i, value) in raw.iter().enumerate() {
        let fallback_id = format!("p{}-{}", phase.as_number(), i + 1);
        let Some(mut impact) = Impact::from_backend_value(value, phase, &fallback_id) else {
            tracing::warn!(%phase, index = i, "skipping impact with no label or description");
            continue;
        };

        // Batch-internal id uniqueness.
        while !seen_ids.insert(impact.id.clone()) {
            impact.id.push_str("-dup");
        }

        if phase.requires_parents() {
            match &impact.parent_id {
                None => {
                    // Lenient by decision: the impact stays, unlinked.
                    tracing::warn!(
                        %phase,
                        impact_id = %impact.id,
                        "impact missing parentId; keeping it unlinked"
                    );
                }
                Some(pid) if !parent_ids.contains(&pid.as_str()) => {
                    tracing::warn!(
                        %phase,
                        impact_id = %impact.id,
                        parent_id = %pid,
                        "parentId does not match any supplied parent; clearing link"
                    );
                    impact.parent_id = None;
                }
                Some(_) => {}
            }
        } else if impact.parent_id.take().is_some() {
            tracing::debug!(impact_id = %impact.id, "first-order impact cannot have a parent; cleared");
        }

        impacts.push(impact);
    }

    impacts
}
