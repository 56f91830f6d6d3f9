//! System Model Builder: assertion text to a qualitative system model.
//!
//! This is one of the two hard-failure components. If the backend cannot
//! produce a schema-conforming model there is nothing downstream worth
//! running, so the failure propagates instead of degrading.

use crate::error::BuildError;
use crate::llm::{self, TextGenerator};
use crate::model::SystemModel;

const SYSTEM_PROMPT: &str = "You are a system-dynamics analyst. Given an assertion \
    about the world, identify the qualitative system it perturbs. Respond with a \
    single JSON object with fields: stocks (array of {name, description}), agents \
    (array of {name, description}), incentives (array of {agentName, \
    targetStockName, description, resultingFlowDescription}), stockFlows (array of \
    {sourceStockName, targetStockName, flowDescription, drivingForceDescription}). \
    Every agentName and stock name referenced by an incentive or flow must appear \
    in the stocks/agents arrays, spelled identically. Return only the JSON object.";

fn build_prompt(assertion: &str) -> String {
    format!(
        "Assertion: {assertion}\n\n\
         Model the system this assertion disturbs. Aim for 3-6 stocks, 2-4 agents, \
         and enough incentives and stock-to-stock flows to connect every entity."
    )
}

/// Build a [`SystemModel`] from free-form assertion text.
///
/// Dangling incentives/flows in the backend output are dropped with a
/// warning rather than failing the build; a model with no stocks at all, or
/// with duplicate names, is a [`BuildError::GenerationFailure`].
pub fn build_system_model(
    backend: &dyn TextGenerator,
    assertion: &str,
) -> Result<SystemModel, BuildError> {
    let payload = llm::generate_object(backend, &build_prompt(assertion), Some(SYSTEM_PROMPT))?;

    let mut model: SystemModel =
        serde_json::from_value(payload).map_err(|e| BuildError::GenerationFailure {
            message: format!("model payload did not match schema: {e}"),
        })?;

    if model.stocks.is_empty() {
        return Err(BuildError::GenerationFailure {
            message: "model contains no stocks".into(),
        });
    }

    let dropped = model.repair().map_err(|e| BuildError::GenerationFailure {
        message: e.to_string(),
    })?;
    if dropped > 0 {
        tracing::warn!(dropped, "repaired system model by dropping dangling edges");
    }

    tracing::info!(
        stocks = model.stocks.len(),
        agents = model.agents.len(),
        incentives = model.incentives.len(),
        flows = model.stock_flows.len(),
        "built system model"
    );

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    struct Scripted(String);

    impl TextGenerator for Scripted {
        fn generate(&self, _: &str, _: Option<&str>) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl TextGenerator for Failing {
        fn generate(&self, _: &str, _: Option<&str>) -> Result<String, LlmError> {
            Err(LlmError::RequestFailed {
                message: "connection refused".into(),
            })
        }
    }

    const GOOD_MODEL: &str = r#"{
        "stocks": [
            {"name": "Office Real Estate Demand", "description": "Demand for office space"},
            {"name": "Commuter Traffic"}
        ],
        "agents": [{"name": "Employers"}],
        "incentives": [
            {"agentName": "Employers", "targetStockName": "Office Real Estate Demand",
             "description": "Cut lease costs"}
        ],
        "stockFlows": [
            {"sourceStockName": "Office Real Estate Demand",
             "targetStockName": "Commuter Traffic",
             "flowDescription": "Less office use means fewer commutes"}
        ]
    }"#;

    #[test]
    fn builds_and_validates_model() {
        let model = build_system_model(&Scripted(GOOD_MODEL.into()), "Remote work").unwrap();
        assert_eq!(model.stocks.len(), 2);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn dangling_edges_are_dropped_not_fatal() {
        let payload = r#"{
            "stocks": [{"name": "A"}],
            "agents": [{"name": "X"}],
            "incentives": [
                {"agentName": "Ghost", "targetStockName": "A", "description": "d"}
            ],
            "stockFlows": []
        }"#;
        let model = build_system_model(&Scripted(payload.into()), "test").unwrap();
        assert!(model.incentives.is_empty());
        assert!(model.validate().is_ok());
    }

    #[test]
    fn empty_stock_list_is_generation_failure() {
        let payload = r#"{"stocks": [], "agents": [], "incentives": [], "stockFlows": []}"#;
        let err = build_system_model(&Scripted(payload.into()), "test").unwrap_err();
        assert!(matches!(err, BuildError::GenerationFailure { .. }));
    }

    #[test]
    fn backend_failure_propagates() {
        let err = build_system_model(&Failing, "test").unwrap_err();
        assert!(matches!(err, BuildError::Llm(_)));
    }

    #[test]
    fn prose_response_is_hard_failure() {
        let err = build_system_model(&Scripted("I cannot do that.".into()), "test").unwrap_err();
        assert!(matches!(err, BuildError::Llm(LlmError::NoJson)));
    }
}
