//! Session orchestration: the one owner of mutable cascade state.
//!
//! A [`Session`] holds the current qualitative-state map and the growing
//! impact collection; every other component is a pure function over the
//! inputs it is handed. Phases run strictly in sequence, and each phase's
//! state delta is folded in before the next phase is issued, so phase N+1
//! always sees the cumulative effect of phases 1..N.

use crate::builder;
use crate::consolidate::{self, ConsolidationSuggestion};
use crate::error::{BuildError, TensionError};
use crate::impact::{Impact, Phase};
use crate::llm::TextGenerator;
use crate::model::{QualitativeStateMap, SystemModel};
use crate::narrative::{self, NarrativeRequest};
use crate::phases;
use crate::revise;
use crate::states;
use crate::tension::{self, TensionAnalysis};

/// One consequence-cascade exploration for a single assertion.
#[derive(Debug, Clone)]
pub struct Session {
    assertion: String,
    model: SystemModel,
    tensions: Option<TensionAnalysis>,
    /// Current stock states; the single source of truth threaded through
    /// each phase call.
    states: QualitativeStateMap,
    initial_states_summary: Option<String>,
    /// All impacts across phases, in generation order.
    impacts: Vec<Impact>,
    feedback_insights: Vec<String>,
    narrative: Option<String>,
}

impl Session {
    /// Start a session by building the system model for `assertion`.
    ///
    /// The model build is the only step that must succeed before a session
    /// exists; everything after it degrades rather than fails.
    pub fn start(backend: &dyn TextGenerator, assertion: &str) -> Result<Session, BuildError> {
        let model = builder::build_system_model(backend, assertion)?;
        Ok(Session {
            assertion: assertion.to_string(),
            model,
            tensions: None,
            states: QualitativeStateMap::new(),
            initial_states_summary: None,
            impacts: Vec::new(),
            feedback_insights: Vec::new(),
            narrative: None,
        })
    }

    pub fn assertion(&self) -> &str {
        &self.assertion
    }

    pub fn model(&self) -> &SystemModel {
        &self.model
    }

    pub fn tensions(&self) -> Option<&TensionAnalysis> {
        self.tensions.as_ref()
    }

    pub fn states(&self) -> &QualitativeStateMap {
        &self.states
    }

    pub fn initial_states_summary(&self) -> Option<&str> {
        self.initial_states_summary.as_deref()
    }

    /// All impacts across phases, in generation order.
    pub fn impacts(&self) -> &[Impact] {
        &self.impacts
    }

    /// Impacts belonging to one phase.
    pub fn impacts_for(&self, phase: Phase) -> Vec<&Impact> {
        self.impacts.iter().filter(|i| i.order == phase).collect()
    }

    pub fn feedback_insights(&self) -> &[String] {
        &self.feedback_insights
    }

    pub fn narrative(&self) -> Option<&str> {
        self.narrative.as_deref()
    }

    /// Infer initial qualitative states for every stock (degrades in place).
    pub fn infer_states(&mut self, backend: &dyn TextGenerator) {
        let inference = states::infer_initial_states(backend, &self.assertion, &self.model);
        self.model = inference.model;
        self.states = self.model.state_map();
        self.initial_states_summary = Some(inference.summary);
    }

    /// Run the tension analysis; hard failure leaves the session usable
    /// (phases then run without tension context).
    pub fn analyze_tensions(&mut self, backend: &dyn TextGenerator) -> Result<(), TensionError> {
        let analysis = tension::analyze_tensions(backend, &self.assertion, &self.model)?;
        self.tensions = Some(analysis);
        Ok(())
    }

    /// Run one generation phase and fold its results into the session.
    ///
    /// Parents are the recorded impacts of the preceding phase. Returns the
    /// number of impacts added.
    pub fn run_phase(&mut self, backend: &dyn TextGenerator, phase: Phase) -> usize {
        let parents: Vec<Impact> = match phase.parent() {
            Some(prev) => self.impacts_for(prev).into_iter().cloned().collect(),
            None => Vec::new(),
        };

        let result = phases::generate_phase(
            backend,
            &self.assertion,
            phase,
            &parents,
            &self.states,
            self.tensions.as_ref(),
            &self.model,
        );

        // Fold the state delta before anything else can observe the session.
        if let Some(delta) = &result.state_delta {
            for (name, state) in delta {
                self.states.insert(name.clone(), state.clone());
            }
            self.model.apply_states(delta);
        }

        let added = result.impacts.len();
        for impact in result.impacts {
            self.record_impact(impact);
        }
        self.feedback_insights.extend(result.feedback_insights);

        added
    }

    /// Record an impact, re-keying its id if it collides with one already
    /// in the session. Re-keying happens before any child phase runs, so no
    /// lineage can reference the discarded id.
    fn record_impact(&mut self, mut impact: Impact) {
        if self.impacts.iter().any(|i| i.id == impact.id) {
            let base = impact.id.clone();
            let mut n = 2;
            while self.impacts.iter().any(|i| i.id == format!("{base}-{n}")) {
                n += 1;
            }
            tracing::warn!(old = %base, new = %format!("{base}-{n}"), "re-keyed colliding impact id");
            impact.id = format!("{base}-{n}");
        }
        self.impacts.push(impact);
    }

    /// Run all three phases in order.
    pub fn run_all_phases(&mut self, backend: &dyn TextGenerator) {
        for phase in Phase::ALL {
            self.run_phase(backend, phase);
        }
    }

    /// Advisory consolidation pass over everything generated so far.
    pub fn suggest_consolidations(
        &self,
        backend: &dyn TextGenerator,
    ) -> Vec<ConsolidationSuggestion> {
        consolidate::suggest_consolidations(backend, &self.impacts)
    }

    /// Synthesize and record the closing narrative.
    pub fn synthesize_narrative(&mut self, backend: &dyn TextGenerator) -> &str {
        let phase1: Vec<Impact> = self.impacts_for(Phase::First).into_iter().cloned().collect();
        let phase2: Vec<Impact> = self.impacts_for(Phase::Second).into_iter().cloned().collect();
        let phase3: Vec<Impact> = self.impacts_for(Phase::Third).into_iter().cloned().collect();

        let summary: String = self.assertion.chars().take(80).collect();
        let request = NarrativeRequest {
            assertion_summary: &summary,
            assertion_text: &self.assertion,
            phase1_impacts: &phase1,
            phase2_impacts: &phase2,
            phase3_impacts: &phase3,
            feedback_insights: &self.feedback_insights,
            initial_states_summary: self.initial_states_summary.as_deref(),
            final_states: if self.states.is_empty() {
                None
            } else {
                Some(&self.states)
            },
        };

        let text = narrative::synthesize_narrative(backend, &request);
        self.narrative = Some(text);
        self.narrative.as_deref().unwrap_or_default()
    }

    /// Revise the session's model from user feedback, keeping everything
    /// else (impacts, states for still-existing stocks) intact.
    pub fn revise_model(&mut self, backend: &dyn TextGenerator, feedback: &str) -> String {
        let revision = revise::revise_model(backend, &self.model, feedback);
        self.model = revision.model;
        // States for stocks the revision removed no longer apply.
        let names: std::collections::BTreeSet<String> =
            self.model.stock_names().into_iter().map(String::from).collect();
        self.states.retain(|name, _| names.contains(name));
        revision.summary
    }

    /// Run the full cascade: states, tensions, three phases, narrative.
    ///
    /// A failed tension analysis is downgraded to "run without tension
    /// context", matching the valid alternative path the protocol allows.
    pub fn run_cascade(backend: &dyn TextGenerator, assertion: &str) -> Result<Session, BuildError> {
        let mut session = Session::start(backend, assertion)?;
        session.infer_states(backend);
        if let Err(e) = session.analyze_tensions(backend) {
            tracing::warn!(error = %e, "proceeding without tension analysis");
        }
        session.run_all_phases(backend);
        session.synthesize_narrative(backend);
        Ok(session)
    }

    /// Plain-data snapshot of the whole session for a presentation layer.
    pub fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "assertion": self.assertion,
            "systemModel": self.model,
            "tensionAnalysis": self.tensions,
            "initialStatesSummary": self.initial_states_summary,
            "qualitativeStates": self.states,
            "impacts": {
                "firstOrder": self.impacts_for(Phase::First),
                "secondOrder": self.impacts_for(Phase::Second),
                "thirdOrder": self.impacts_for(Phase::Third),
            },
            "feedbackLoopInsights": self.feedback_insights,
            "narrative": self.narrative,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Plays back a fixed sequence of responses, one per backend call.
    struct Playback {
        responses: RefCell<VecDeque<String>>,
        calls: std::cell::Cell<usize>,
    }

    impl Playback {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: RefCell::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: std::cell::Cell::new(0),
            }
        }
    }

    impl TextGenerator for Playback {
        fn generate(&self, _: &str, _: Option<&str>) -> Result<String, LlmError> {
            self.calls.set(self.calls.get() + 1);
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or(LlmError::RequestFailed {
                    message: "playback exhausted".into(),
                })
        }
    }

    const MODEL: &str = r#"{
        "stocks": [{"name": "Office Real Estate Demand"}, {"name": "Home Energy Use"}],
        "agents": [{"name": "Employers"}],
        "incentives": [{"agentName": "Employers",
                        "targetStockName": "Office Real Estate Demand",
                        "description": "Cut lease costs"}],
        "stockFlows": []
    }"#;

    const STATES: &str = r#"{
        "stockStates": {"Office Real Estate Demand": "High", "Home Energy Use": "Moderate"},
        "initialStatesSummary": "Offices are full."
    }"#;

    #[test]
    fn start_builds_model_and_owns_empty_state() {
        let backend = Playback::new(&[MODEL]);
        let session = Session::start(&backend, "Remote work becomes universal").unwrap();
        assert_eq!(session.model().stocks.len(), 2);
        assert!(session.states().is_empty());
        assert!(session.impacts().is_empty());
    }

    #[test]
    fn infer_states_populates_state_map() {
        let backend = Playback::new(&[MODEL, STATES]);
        let mut session = Session::start(&backend, "Remote work becomes universal").unwrap();
        session.infer_states(&backend);
        assert_eq!(
            session.states().get("Office Real Estate Demand").map(String::as_str),
            Some("High")
        );
        assert_eq!(session.initial_states_summary(), Some("Offices are full."));
    }

    #[test]
    fn phase_delta_is_folded_before_next_phase() {
        let phase1 = r#"{
            "impacts": [{"id": "p1-1", "label": "Demand falls", "description": "d"}],
            "updatedSystemQualitativeStates": {"Office Real Estate Demand": "Collapsing"}
        }"#;
        let backend = Playback::new(&[MODEL, STATES, phase1]);
        let mut session = Session::start(&backend, "a").unwrap();
        session.infer_states(&backend);
        session.run_phase(&backend, Phase::First);

        assert_eq!(
            session.states().get("Office Real Estate Demand").map(String::as_str),
            Some("Collapsing")
        );
        assert_eq!(
            session
                .model()
                .stock("Office Real Estate Demand")
                .unwrap()
                .qualitative_state
                .as_deref(),
            Some("Collapsing")
        );
    }

    #[test]
    fn phases_two_and_three_without_parents_are_free() {
        let phase1_empty = r#"{"impacts": []}"#;
        // Exactly 2 calls after model build: states skipped, phase 1 only.
        let backend = Playback::new(&[MODEL, phase1_empty]);
        let mut session = Session::start(&backend, "a").unwrap();
        session.run_all_phases(&backend);
        assert!(session.impacts().is_empty());
        assert_eq!(backend.calls.get(), 2, "phases 2/3 must not call the backend");
    }

    #[test]
    fn second_phase_parents_are_first_phase_impacts() {
        let phase1 = r#"{"impacts": [
            {"id": "a", "label": "A", "description": "d"},
            {"id": "b", "label": "B", "description": "d"}
        ]}"#;
        let phase2 = r#"{"impacts": [
            {"id": "a1", "label": "A1", "description": "d", "parentId": "a"},
            {"id": "b1", "label": "B1", "description": "d", "parentId": "b"}
        ]}"#;
        let phase3 = r#"{"impacts": [
            {"id": "a2", "label": "A2", "description": "d", "parentId": "a1"}
        ]}"#;
        let backend = Playback::new(&[MODEL, phase1, phase2, phase3]);
        let mut session = Session::start(&backend, "a").unwrap();
        session.run_all_phases(&backend);

        let phase1_ids: Vec<&str> = session
            .impacts_for(Phase::First)
            .iter()
            .map(|i| i.id.as_str())
            .collect();
        for impact in session.impacts_for(Phase::Second) {
            let pid = impact.parent_id.as_deref().unwrap();
            assert!(phase1_ids.contains(&pid));
        }
        assert_eq!(session.impacts_for(Phase::Third).len(), 1);
    }

    #[test]
    fn colliding_impact_ids_are_rekeyed() {
        let phase1 = r#"{"impacts": [{"id": "x", "label": "A", "description": "d"}]}"#;
        let phase2 = r#"{"impacts": [{"id": "x", "label": "B", "description": "d", "parentId": "x"}]}"#;
        let phase3 = r#"{"impacts": []}"#;
        let backend = Playback::new(&[MODEL, phase1, phase2, phase3]);
        let mut session = Session::start(&backend, "a").unwrap();
        session.run_all_phases(&backend);

        let ids: Vec<&str> = session.impacts().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "x-2"]);
        // The lineage still points at the phase-1 impact.
        assert_eq!(session.impacts()[1].parent_id.as_deref(), Some("x"));
    }

    #[test]
    fn cascade_survives_degraded_middle_steps() {
        // States call fails (prose), tension call fails (prose -> NoJson is
        // an Llm error), phase 1 fails, phases 2/3 skip, narrative works.
        let backend = Playback::new(&[
            MODEL,
            "no json",
            "no json",
            "no json",
            r#"{"narrative": "Nothing much happened."}"#,
        ]);
        let session = Session::run_cascade(&backend, "Remote work becomes universal").unwrap();
        assert!(session.impacts().is_empty());
        assert_eq!(session.narrative(), Some("Nothing much happened."));
        assert_eq!(backend.calls.get(), 5);
    }

    #[test]
    fn revise_model_drops_states_for_removed_stocks() {
        let revision = r#"{
            "revisedSystemModel": {
                "stocks": [{"name": "Office Real Estate Demand"}],
                "agents": [{"name": "Employers"}],
                "incentives": [],
                "stockFlows": []
            },
            "revisionSummary": "Removed home energy."
        }"#;
        let backend = Playback::new(&[MODEL, STATES, revision]);
        let mut session = Session::start(&backend, "a").unwrap();
        session.infer_states(&backend);
        let summary = session.revise_model(&backend, "drop home energy");
        assert_eq!(summary, "Removed home energy.");
        assert!(!session.states().contains_key("Home Energy Use"));
        assert!(session.states().contains_key("Office Real Estate Demand"));
    }

    #[test]
    fn report_groups_impacts_by_order() {
        let phase1 = r#"{"impacts": [{"id": "a", "label": "A", "description": "d"}]}"#;
        let phase2 = r#"{"impacts": [{"id": "b", "label": "B", "description": "d", "parentId": "a"}]}"#;
        let phase3 = r#"{"impacts": []}"#;
        let backend = Playback::new(&[MODEL, phase1, phase2, phase3]);
        let mut session = Session::start(&backend, "a").unwrap();
        session.run_all_phases(&backend);

        let report = session.report();
        assert_eq!(report["impacts"]["firstOrder"][0]["id"], "a");
        assert_eq!(report["impacts"]["secondOrder"][0]["parentId"], "a");
        assert!(report["impacts"]["thirdOrder"].as_array().unwrap().is_empty());
    }
}
