//! Qualitative system-dynamics model: stocks, agents, incentives, flows.
//!
//! Linking between entities is by case-sensitive exact name match. A model is
//! structurally valid when every incentive and flow endpoint resolves to a
//! declared agent/stock and names are unique within their lists.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::StructuralError;

/// Mapping from stock name to its current qualitative state label.
///
/// The single source of truth for "current system state", owned by the
/// session and threaded read-only through each generation phase.
pub type QualitativeStateMap = BTreeMap<String, String>;

/// A state-bearing quantity in the modeled system (e.g. "Public Trust").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stock {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form state label like "Strong", "Depleted", "Volatile".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualitative_state: Option<String>,
}

/// An actor capable of exerting incentives on stocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A described causal pressure an agent exerts on a stock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Incentive {
    pub agent_name: String,
    pub target_stock_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resulting_flow_description: Option<String>,
}

/// A direct causal influence between two stocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockFlow {
    pub source_stock_name: String,
    pub target_stock_name: String,
    pub flow_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driving_force_description: Option<String>,
}

/// The aggregate system-dynamics model for one assertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemModel {
    #[serde(default)]
    pub stocks: Vec<Stock>,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub incentives: Vec<Incentive>,
    #[serde(default)]
    pub stock_flows: Vec<StockFlow>,
}

impl SystemModel {
    /// The set of declared stock names.
    pub fn stock_names(&self) -> BTreeSet<&str> {
        self.stocks.iter().map(|s| s.name.as_str()).collect()
    }

    /// The set of declared agent names.
    pub fn agent_names(&self) -> BTreeSet<&str> {
        self.agents.iter().map(|a| a.name.as_str()).collect()
    }

    /// Look up a stock by exact name.
    pub fn stock(&self, name: &str) -> Option<&Stock> {
        self.stocks.iter().find(|s| s.name == name)
    }

    /// Strict structural validation: unique names, no dangling edges.
    ///
    /// Returns the first violation found. Used where a bad model must be
    /// rejected outright; `repair` is the lenient alternative.
    pub fn validate(&self) -> Result<(), StructuralError> {
        let mut stock_names = BTreeSet::new();
        for stock in &self.stocks {
            if !stock_names.insert(stock.name.as_str()) {
                return Err(StructuralError::DuplicateStock {
                    name: stock.name.clone(),
                });
            }
        }
        let mut agent_names = BTreeSet::new();
        for agent in &self.agents {
            if !agent_names.insert(agent.name.as_str()) {
                return Err(StructuralError::DuplicateAgent {
                    name: agent.name.clone(),
                });
            }
        }

        for incentive in &self.incentives {
            if !agent_names.contains(incentive.agent_name.as_str())
                || !stock_names.contains(incentive.target_stock_name.as_str())
            {
                return Err(StructuralError::DanglingIncentive {
                    agent: incentive.agent_name.clone(),
                    stock: incentive.target_stock_name.clone(),
                });
            }
        }
        for flow in &self.stock_flows {
            if !stock_names.contains(flow.source_stock_name.as_str())
                || !stock_names.contains(flow.target_stock_name.as_str())
            {
                return Err(StructuralError::DanglingFlow {
                    source_stock: flow.source_stock_name.clone(),
                    target_stock: flow.target_stock_name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Lenient repair: drop dangling incentives/flows, logging each one.
    ///
    /// Duplicate names are not repairable here and still fail. Returns the
    /// number of edges dropped.
    pub fn repair(&mut self) -> Result<usize, StructuralError> {
        let mut stock_names = BTreeSet::new();
        for stock in &self.stocks {
            if !stock_names.insert(stock.name.clone()) {
                return Err(StructuralError::DuplicateStock {
                    name: stock.name.clone(),
                });
            }
        }
        let mut agent_names = BTreeSet::new();
        for agent in &self.agents {
            if !agent_names.insert(agent.name.clone()) {
                return Err(StructuralError::DuplicateAgent {
                    name: agent.name.clone(),
                });
            }
        }

        let before = self.incentives.len() + self.stock_flows.len();

        self.incentives.retain(|i| {
            let ok = agent_names.contains(&i.agent_name)
                && stock_names.contains(&i.target_stock_name);
            if !ok {
                tracing::warn!(
                    agent = %i.agent_name,
                    stock = %i.target_stock_name,
                    "dropping incentive with dangling endpoint"
                );
            }
            ok
        });
        self.stock_flows.retain(|f| {
            let ok = stock_names.contains(&f.source_stock_name)
                && stock_names.contains(&f.target_stock_name);
            if !ok {
                tracing::warn!(
                    source = %f.source_stock_name,
                    target = %f.target_stock_name,
                    "dropping stock flow with dangling endpoint"
                );
            }
            ok
        });

        Ok(before - (self.incentives.len() + self.stock_flows.len()))
    }

    /// Names of stocks/agents not touched by any incentive or stock flow.
    ///
    /// Used by the revision component to flag structurally isolated
    /// additions in its summary.
    pub fn isolated_names(&self) -> Vec<String> {
        let mut connected: BTreeSet<&str> = BTreeSet::new();
        for i in &self.incentives {
            connected.insert(i.agent_name.as_str());
            connected.insert(i.target_stock_name.as_str());
        }
        for f in &self.stock_flows {
            connected.insert(f.source_stock_name.as_str());
            connected.insert(f.target_stock_name.as_str());
        }

        let mut isolated = Vec::new();
        for stock in &self.stocks {
            if !connected.contains(stock.name.as_str()) {
                isolated.push(stock.name.clone());
            }
        }
        for agent in &self.agents {
            if !connected.contains(agent.name.as_str()) {
                isolated.push(agent.name.clone());
            }
        }
        isolated
    }

    /// Snapshot the current qualitative states of all stocks that have one.
    pub fn state_map(&self) -> QualitativeStateMap {
        self.stocks
            .iter()
            .filter_map(|s| {
                s.qualitative_state
                    .as_ref()
                    .map(|state| (s.name.clone(), state.clone()))
            })
            .collect()
    }

    /// Overwrite stock states from a state map. Unknown names are ignored;
    /// stocks absent from the map keep their current state.
    pub fn apply_states(&mut self, states: &QualitativeStateMap) {
        for stock in &mut self.stocks {
            if let Some(state) = states.get(&stock.name) {
                stock.qualitative_state = Some(state.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stock_model() -> SystemModel {
        SystemModel {
            stocks: vec![
                Stock {
                    name: "Trust".into(),
                    description: None,
                    qualitative_state: None,
                },
                Stock {
                    name: "Funding".into(),
                    description: Some("Available capital".into()),
                    qualitative_state: Some("Stable".into()),
                },
            ],
            agents: vec![Agent {
                name: "Regulators".into(),
                description: None,
            }],
            incentives: vec![Incentive {
                agent_name: "Regulators".into(),
                target_stock_name: "Trust".into(),
                description: "Enforce transparency".into(),
                resulting_flow_description: None,
            }],
            stock_flows: vec![StockFlow {
                source_stock_name: "Trust".into(),
                target_stock_name: "Funding".into(),
                flow_description: "Trust attracts capital".into(),
                driving_force_description: None,
            }],
        }
    }

    #[test]
    fn valid_model_passes_validation() {
        assert!(two_stock_model().validate().is_ok());
    }

    #[test]
    fn dangling_incentive_rejected() {
        let mut model = two_stock_model();
        model.incentives[0].agent_name = "Nobody".into();
        assert!(matches!(
            model.validate(),
            Err(StructuralError::DanglingIncentive { .. })
        ));
    }

    #[test]
    fn name_matching_is_case_sensitive() {
        let mut model = two_stock_model();
        model.stock_flows[0].target_stock_name = "funding".into();
        assert!(matches!(
            model.validate(),
            Err(StructuralError::DanglingFlow { .. })
        ));
    }

    #[test]
    fn duplicate_stock_rejected() {
        let mut model = two_stock_model();
        model.stocks.push(Stock {
            name: "Trust".into(),
            description: None,
            qualitative_state: None,
        });
        assert!(matches!(
            model.validate(),
            Err(StructuralError::DuplicateStock { .. })
        ));
    }

    #[test]
    fn repair_drops_dangling_edges_only() {
        let mut model = two_stock_model();
        model.incentives.push(Incentive {
            agent_name: "Ghost".into(),
            target_stock_name: "Trust".into(),
            description: "dangling".into(),
            resulting_flow_description: None,
        });
        let dropped = model.repair().unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(model.incentives.len(), 1);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn isolated_names_reports_unconnected_entities() {
        let mut model = two_stock_model();
        model.agents.push(Agent {
            name: "Bystanders".into(),
            description: None,
        });
        assert_eq!(model.isolated_names(), vec!["Bystanders".to_string()]);
    }

    #[test]
    fn apply_states_ignores_unknown_stocks() {
        let mut model = two_stock_model();
        let mut states = QualitativeStateMap::new();
        states.insert("Trust".into(), "Eroding".into());
        states.insert("Nonexistent".into(), "Whatever".into());
        model.apply_states(&states);
        assert_eq!(
            model.stock("Trust").unwrap().qualitative_state.as_deref(),
            Some("Eroding")
        );
        assert_eq!(model.stocks.len(), 2);
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let json = serde_json::to_value(two_stock_model()).unwrap();
        assert!(json["stockFlows"][0]["sourceStockName"].is_string());
        assert!(json["incentives"][0]["targetStockName"].is_string());
    }
}
