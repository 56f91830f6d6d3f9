//! Consolidation Advisor: propose merges of semantically redundant impacts.
//!
//! Purely advisory. Suggestions never mutate the impact set; applying one is
//! a separate, explicit operation ([`apply_consolidation`]) that removes the
//! merged impacts atomically and remaps any lineage pointing at them.

use serde::{Deserialize, Serialize};

use crate::error::ConsolidateError;
use crate::impact::{Impact, Phase, Validity};
use crate::llm::{self, TextGenerator};

/// A proposed merge of two or more impacts into one replacement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationSuggestion {
    /// Ids of the impacts to replace (at least 2).
    pub original_impact_ids: Vec<String>,
    /// The synthesized replacement impact.
    pub consolidated_impact: Impact,
    /// Which phase the replacement belongs to.
    pub target_order: Phase,
    #[serde(default)]
    pub confidence: Validity,
    #[serde(default)]
    pub reasoning_for_consolidation: String,
}

const SYSTEM_PROMPT: &str = "You are reviewing generated consequence impacts for \
    semantic redundancy. Propose merges only where impacts genuinely describe the \
    same consequence. Respond with a single JSON object: \
    {\"consolidationSuggestions\": [{\"originalImpactIds\": [\"...\", \"...\"], \
    \"consolidatedImpact\": {id, label, description, validity, reasoning}, \
    \"targetOrder\": \"1\"|\"2\"|\"3\", \"confidence\": \"high\"|\"medium\"|\"low\", \
    \"reasoningForConsolidation\": \"...\"}]}. An empty array is a valid answer. \
    Return only the JSON object.";

fn build_prompt(impacts: &[Impact]) -> String {
    let mut sections = Vec::new();
    for phase in Phase::ALL {
        let lines: Vec<String> = impacts
            .iter()
            .filter(|i| i.order == phase)
            .map(|i| format!("- [{}] {}: {}", i.id, i.label, i.description))
            .collect();
        if !lines.is_empty() {
            sections.push(format!("Order-{phase} impacts:\n{}", lines.join("\n")));
        }
    }
    sections.push(
        "Identify sets of impacts that are semantically redundant and propose a \
         single consolidated replacement for each set."
            .into(),
    );
    sections.join("\n\n")
}

/// Propose consolidations over the full flattened impact set.
///
/// Guard: an empty impact set short-circuits to an empty suggestion list
/// without invoking the backend. Malformed suggestions (fewer than two
/// originals, or ids not present in the input set) are dropped with a
/// warning; a failed backend call degrades to no suggestions.
pub fn suggest_consolidations(
    backend: &dyn TextGenerator,
    impacts: &[Impact],
) -> Vec<ConsolidationSuggestion> {
    if impacts.is_empty() {
        tracing::debug!("no impacts to consolidate");
        return Vec::new();
    }

    let payload = match llm::generate_object(backend, &build_prompt(impacts), Some(SYSTEM_PROMPT)) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "consolidation call failed; returning no suggestions");
            return Vec::new();
        }
    };

    let Some(raw) = payload.get("consolidationSuggestions").and_then(|v| v.as_array()) else {
        tracing::warn!("consolidation response missing consolidationSuggestions array");
        return Vec::new();
    };

    let known_ids: std::collections::BTreeSet<&str> =
        impacts.iter().map(|i| i.id.as_str()).collect();

    let mut suggestions = Vec::new();
    for value in raw {
        let Ok(suggestion) = serde_json::from_value::<ConsolidationSuggestion>(value.clone())
        else {
            tracing::warn!("skipping malformed consolidation suggestion");
            continue;
        };
        if suggestion.original_impact_ids.len() < 2 {
            tracing::warn!(
                count = suggestion.original_impact_ids.len(),
                "skipping suggestion merging fewer than two impacts"
            );
            continue;
        }
        if let Some(unknown) = suggestion
            .original_impact_ids
            .iter()
            .find(|id| !known_ids.contains(id.as_str()))
        {
            tracing::warn!(id = %unknown, "skipping suggestion referencing unknown impact id");
            continue;
        }
        suggestions.push(suggestion);
    }

    tracing::info!(suggestions = suggestions.len(), "consolidation advice ready");
    suggestions
}

/// Apply one suggestion: remove all merged impacts, insert the replacement.
///
/// Atomic over the returned set: every `original_impact_id` is removed, the
/// consolidated impact (with its declared target order) is inserted at the
/// position of the first removed impact, and any surviving impact whose
/// `parent_id` pointed at a merged impact is remapped to the new id.
pub fn apply_consolidation(
    impacts: &[Impact],
    suggestion: &ConsolidationSuggestion,
) -> Result<Vec<Impact>, ConsolidateError> {
    if suggestion.original_impact_ids.len() < 2 {
        return Err(ConsolidateError::TooFewImpacts {
            count: suggestion.original_impact_ids.len(),
        });
    }

    let merged: std::collections::BTreeSet<&str> = suggestion
        .original_impact_ids
        .iter()
        .map(String::as_str)
        .collect();

    for id in &merged {
        if !impacts.iter().any(|i| i.id == *id) {
            return Err(ConsolidateError::UnknownImpact { id: (*id).into() });
        }
    }

    let new_id = &suggestion.consolidated_impact.id;
    if impacts
        .iter()
        .any(|i| &i.id == new_id && !merged.contains(i.id.as_str()))
    {
        return Err(ConsolidateError::IdCollision { id: new_id.clone() });
    }

    let mut replacement = suggestion.consolidated_impact.clone();
    replacement.order = suggestion.target_order;

    let mut result = Vec::with_capacity(impacts.len() - merged.len() + 1);
    let mut inserted = false;
    for impact in impacts {
        if merged.contains(impact.id.as_str()) {
            if !inserted {
                result.push(replacement.clone());
                inserted = true;
            }
            continue;
        }
        let mut kept = impact.clone();
        if let Some(pid) = &kept.parent_id {
            if merged.contains(pid.as_str()) {
                kept.parent_id = Some(new_id.clone());
            }
        }
        result.push(kept);
    }

    tracing::info!(
        merged = merged.len(),
        new_id = %new_id,
        "applied consolidation"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use std::cell::Cell;

    struct Scripted {
        body: String,
        calls: Cell<usize>,
    }

    impl Scripted {
        fn new(body: &str) -> Self {
            Self {
                body: body.into(),
                calls: Cell::new(0),
            }
        }
    }

    impl TextGenerator for Scripted {
        fn generate(&self, _: &str, _: Option<&str>) -> Result<String, LlmError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.body.clone())
        }
    }

    fn impact(id: &str, phase: Phase, parent: Option<&str>) -> Impact {
        Impact {
            id: id.into(),
            label: format!("impact {id}"),
            description: "desc".into(),
            validity: Validity::Medium,
            reasoning: String::new(),
            order: phase,
            parent_id: parent.map(String::from),
            key_concepts: vec![],
            attributes: vec![],
            causal_reasoning: String::new(),
        }
    }

    #[test]
    fn empty_impact_set_short_circuits() {
        let backend = Scripted::new("{}");
        let suggestions = suggest_consolidations(&backend, &[]);
        assert!(suggestions.is_empty());
        assert_eq!(backend.calls.get(), 0, "guard must not invoke the backend");
    }

    #[test]
    fn suggestions_referencing_only_known_ids_survive() {
        let body = r#"{"consolidationSuggestions": [
            {"originalImpactIds": ["a", "b"],
             "consolidatedImpact": {"id": "m", "label": "merged", "description": "d", "order": "1"},
             "targetOrder": "1", "confidence": "high",
             "reasoningForConsolidation": "same consequence"},
            {"originalImpactIds": ["a", "ghost"],
             "consolidatedImpact": {"id": "n", "label": "x", "description": "d", "order": "1"},
             "targetOrder": "1"},
            {"originalImpactIds": ["a"],
             "consolidatedImpact": {"id": "o", "label": "y", "description": "d", "order": "1"},
             "targetOrder": "1"}
        ]}"#;
        let impacts = [impact("a", Phase::First, None), impact("b", Phase::First, None)];
        let suggestions = suggest_consolidations(&Scripted::new(body), &impacts);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].original_impact_ids, vec!["a", "b"]);
        // Idempotence: suggestions only reference ids present in the input.
        for s in &suggestions {
            for id in &s.original_impact_ids {
                assert!(impacts.iter().any(|i| &i.id == id));
            }
        }
    }

    fn merge_ab() -> ConsolidationSuggestion {
        ConsolidationSuggestion {
            original_impact_ids: vec!["a".into(), "b".into()],
            consolidated_impact: impact("merged", Phase::First, None),
            target_order: Phase::First,
            confidence: Validity::High,
            reasoning_for_consolidation: "overlapping".into(),
        }
    }

    #[test]
    fn apply_removes_originals_and_remaps_children() {
        let impacts = [
            impact("a", Phase::First, None),
            impact("b", Phase::First, None),
            impact("c", Phase::First, None),
            impact("child-of-a", Phase::Second, Some("a")),
            impact("child-of-c", Phase::Second, Some("c")),
        ];
        let result = apply_consolidation(&impacts, &merge_ab()).unwrap();
        let ids: Vec<&str> = result.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["merged", "c", "child-of-a", "child-of-c"]);
        assert_eq!(result[2].parent_id.as_deref(), Some("merged"));
        assert_eq!(result[3].parent_id.as_deref(), Some("c"));
    }

    #[test]
    fn apply_rejects_unknown_original_id() {
        let impacts = [impact("a", Phase::First, None)];
        let err = apply_consolidation(&impacts, &merge_ab()).unwrap_err();
        assert!(matches!(err, ConsolidateError::UnknownImpact { .. }));
    }

    #[test]
    fn apply_rejects_colliding_replacement_id() {
        let impacts = [
            impact("a", Phase::First, None),
            impact("b", Phase::First, None),
            impact("merged", Phase::First, None),
        ];
        let err = apply_consolidation(&impacts, &merge_ab()).unwrap_err();
        assert!(matches!(err, ConsolidateError::IdCollision { .. }));
    }

    #[test]
    fn apply_forces_declared_target_order() {
        let impacts = [
            impact("a", Phase::First, None),
            impact("b", Phase::First, None),
        ];
        let mut suggestion = merge_ab();
        suggestion.consolidated_impact.order = Phase::Third; // backend claim
        suggestion.target_order = Phase::First;
        let result = apply_consolidation(&impacts, &suggestion).unwrap();
        assert_eq!(result[0].order, Phase::First);
    }
}
