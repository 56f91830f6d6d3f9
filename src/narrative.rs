//! Narrative Synthesizer: one prose account of the whole cascade.

use crate::impact::Impact;
use crate::llm::{self, TextGenerator};
use crate::model::QualitativeStateMap;

/// Returned when there is no assertion text to narrate.
pub const EMPTY_ASSERTION_MESSAGE: &str =
    "No assertion text was provided, so there is no cascade to narrate.";

/// Returned when the backend produces no usable narrative.
pub const NARRATIVE_UNAVAILABLE_MESSAGE: &str =
    "A narrative summary could not be generated for this cascade.";

/// Everything the synthesizer needs, gathered by the session.
///
/// Optional list inputs are plain slices; callers pass empty slices rather
/// than wrapping them in `Option`, which keeps the formatting single-path.
#[derive(Debug, Clone, Default)]
pub struct NarrativeRequest<'a> {
    pub assertion_summary: &'a str,
    pub assertion_text: &'a str,
    pub phase1_impacts: &'a [Impact],
    pub phase2_impacts: &'a [Impact],
    pub phase3_impacts: &'a [Impact],
    pub feedback_insights: &'a [String],
    pub initial_states_summary: Option<&'a str>,
    pub final_states: Option<&'a QualitativeStateMap>,
}

const SYSTEM_PROMPT: &str = "You are a system-dynamics analyst writing the closing \
    narrative of a consequence-cascade exploration. Weave the assertion, the three \
    rounds of impacts, the feedback loops, and the shift from initial to final stock \
    states into a single coherent account of how the system evolved. Respond with a \
    single JSON object: {\"narrative\": \"<the full narrative text>\"}. \
    Return only the JSON object.";

fn impact_lines(label: &str, impacts: &[Impact]) -> String {
    if impacts.is_empty() {
        return format!("{label}: none");
    }
    let lines: Vec<String> = impacts
        .iter()
        .map(|i| {
            let lineage = i
                .parent_id
                .as_deref()
                .map(|p| format!(" (follows {p})"))
                .unwrap_or_default();
            format!("- [{}] {} ({:?}): {}{lineage}", i.id, i.label, i.validity, i.description)
        })
        .collect();
    format!("{label}:\n{}", lines.join("\n"))
}

fn build_prompt(request: &NarrativeRequest<'_>) -> String {
    let mut sections = Vec::new();

    if !request.assertion_summary.trim().is_empty() {
        sections.push(format!("Assertion (short): {}", request.assertion_summary));
    }
    sections.push(format!("Assertion (full): {}", request.assertion_text));

    if let Some(initial) = request.initial_states_summary {
        if !initial.trim().is_empty() {
            sections.push(format!("Initial system state: {initial}"));
        }
    }

    sections.push(impact_lines("First-order impacts", request.phase1_impacts));
    sections.push(impact_lines("Second-order impacts", request.phase2_impacts));
    sections.push(impact_lines("Third-order impacts", request.phase3_impacts));

    if request.feedback_insights.is_empty() {
        sections.push("Feedback-loop insights: none".into());
    } else {
        sections.push(format!(
            "Feedback-loop insights:\n{}",
            request
                .feedback_insights
                .iter()
                .map(|s| format!("- {s}"))
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }

    if let Some(states) = request.final_states {
        if !states.is_empty() {
            let lines: Vec<String> = states.iter().map(|(k, v)| format!("- {k}: {v}")).collect();
            sections.push(format!("Final qualitative stock states:\n{}", lines.join("\n")));
        }
    }

    sections.push("Write the narrative of how this system evolved.".into());
    sections.join("\n\n")
}

/// Synthesize the cascade narrative.
///
/// Guard: an empty assertion text returns a fixed message with zero backend
/// calls. A backend response without a usable `narrative` field returns the
/// fixed unavailable message rather than failing the pipeline.
pub fn synthesize_narrative(backend: &dyn TextGenerator, request: &NarrativeRequest<'_>) -> String {
    if request.assertion_text.trim().is_empty() {
        tracing::debug!("empty assertion text; skipping narrative synthesis");
        return EMPTY_ASSERTION_MESSAGE.into();
    }

    let payload = match llm::generate_object(backend, &build_prompt(request), Some(SYSTEM_PROMPT)) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "narrative synthesis failed");
            return NARRATIVE_UNAVAILABLE_MESSAGE.into();
        }
    };

    payload
        .get("narrative")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            tracing::warn!("narrative response missing narrative field");
            NARRATIVE_UNAVAILABLE_MESSAGE.into()
        })
}
