//! Impacts: generated consequences with validity, reasoning, and lineage.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// One of the three sequential consequence-generation rounds.
///
/// Serialized as the strings `"1"`, `"2"`, `"3"` to match the backend
/// protocol; deserialization also accepts bare integers since models emit
/// both forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    First,
    Second,
    Third,
}

impl Phase {
    /// The phase whose impacts serve as parents for this one, if any.
    pub fn parent(self) -> Option<Phase> {
        match self {
            Phase::First => None,
            Phase::Second => Some(Phase::First),
            Phase::Third => Some(Phase::Second),
        }
    }

    /// Whether impacts of this phase are expected to carry a parent link.
    pub fn requires_parents(self) -> bool {
        self.parent().is_some()
    }

    pub fn as_number(self) -> u8 {
        match self {
            Phase::First => 1,
            Phase::Second => 2,
            Phase::Third => 3,
        }
    }

    pub fn from_number(n: u64) -> Option<Phase> {
        match n {
            1 => Some(Phase::First),
            2 => Some(Phase::Second),
            3 => Some(Phase::Third),
            _ => None,
        }
    }

    /// All phases in generation order.
    pub const ALL: [Phase; 3] = [Phase::First, Phase::Second, Phase::Third];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_number())
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_number().to_string())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let n = match &value {
            serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
            serde_json::Value::Number(n) => n.as_u64(),
            _ => None,
        };
        n.and_then(Phase::from_number)
            .ok_or_else(|| de::Error::custom(format!("invalid phase: {value}")))
    }
}

/// Confidence in a generated impact or consolidation suggestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    High,
    #[default]
    Medium,
    Low,
}

impl Validity {
    /// Lenient parse from backend output; anything unrecognized is Medium.
    pub fn parse_lenient(s: &str) -> Validity {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Validity::High,
            "low" => Validity::Low,
            _ => Validity::Medium,
        }
    }
}

/// A single generated consequence.
///
/// Immutable once created; a consolidation replaces impacts rather than
/// editing them. `parent_id` links a phase-2/3 impact to one impact of the
/// immediately preceding phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Impact {
    /// Unique across the whole session.
    pub id: String,
    pub label: String,
    pub description: String,
    #[serde(default)]
    pub validity: Validity,
    #[serde(default)]
    pub reasoning: String,
    /// Which generation round produced this impact.
    pub order: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_concepts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub causal_reasoning: String,
}

impl Impact {
    /// Decode one impact from a raw backend value, leniently.
    ///
    /// The backend must supply at least a non-empty label or description;
    /// everything else gets a default. A missing id is filled from
    /// `fallback_id`, and `order` is forced to the phase being generated
    /// regardless of what the backend claims.
    pub fn from_backend_value(
        value: &serde_json::Value,
        phase: Phase,
        fallback_id: &str,
    ) -> Option<Impact> {
        let obj = value.as_object()?;

        let str_field = |key: &str| -> String {
            obj.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string()
        };
        let list_field = |key: &str| -> Vec<String> {
            obj.get(key)
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str())
                        .map(|s| s.to_string())
                        .collect()
                })
                .unwrap_or_default()
        };

        let label = str_field("label");
        let description = str_field("description");
        if label.is_empty() && description.is_empty() {
            return None;
        }

        let id = {
            let raw = str_field("id");
            if raw.is_empty() {
                fallback_id.to_string()
            } else {
                raw
            }
        };

        let parent_id = obj
            .get("parentId")
            .and_then(|v| v.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Some(Impact {
            id,
            label: if label.is_empty() {
                description.chars().take(60).collect()
            } else {
                label
            },
            description,
            validity: Validity::parse_lenient(&str_field("validity")),
            reasoning: str_field("reasoning"),
            order: phase,
            parent_id,
            key_concepts: list_field("keyConcepts"),
            attributes: list_field("attributes"),
            causal_reasoning: str_field("causalReasoning"),
        })
    }
}
