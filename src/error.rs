//! Rich diagnostic error types for the ripple engine.
//!
//! Only two components can fail hard: the model builder (no usable model
//! means nothing downstream can run) and the tension analyzer (later phases
//! depend on its shape). Everything else degrades to a safe value and is
//! reported through `tracing` rather than the error channel, so a cascade
//! keeps making forward progress under partial backend misbehavior.

use miette::Diagnostic;
use thiserror::Error;

use crate::llm::LlmError;

/// Top-level error type for the ripple engine.
#[derive(Debug, Error, Diagnostic)]
pub enum RippleError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Tension(#[from] TensionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Consolidate(#[from] ConsolidateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Model builder errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error("backend produced no usable system model: {message}")]
    #[diagnostic(
        code(ripple::build::generation_failure),
        help(
            "The model could not return a schema-conforming system model for \
             this assertion. Rephrase the assertion or retry the request."
        )
    )]
    GenerationFailure { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Structural(#[from] StructuralError),
}

// ---------------------------------------------------------------------------
// Tension analyzer errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TensionError {
    #[error("tension analysis missing required field: {field}")]
    #[diagnostic(
        code(ripple::tension::incomplete_analysis),
        help(
            "A tension analysis must contain competingStakeholderResponses, \
             resourceConstraints, and identifiedTradeOffs (each may be empty, \
             but all must be present). Retry the analysis, or run the cascade \
             without tension context."
        )
    )]
    IncompleteAnalysis { field: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),
}

// ---------------------------------------------------------------------------
// Structural (referential integrity) errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StructuralError {
    #[error("duplicate stock name: \"{name}\"")]
    #[diagnostic(
        code(ripple::model::duplicate_stock),
        help("Stock names must be unique within a system model (case-sensitive).")
    )]
    DuplicateStock { name: String },

    #[error("duplicate agent name: \"{name}\"")]
    #[diagnostic(
        code(ripple::model::duplicate_agent),
        help("Agent names must be unique within a system model (case-sensitive).")
    )]
    DuplicateAgent { name: String },

    #[error("incentive references unknown agent \"{agent}\" or stock \"{stock}\"")]
    #[diagnostic(
        code(ripple::model::dangling_incentive),
        help(
            "Every incentive endpoint must name a declared agent and stock. \
             Linking is by case-sensitive exact match."
        )
    )]
    DanglingIncentive { agent: String, stock: String },

    #[error("stock flow references unknown stock: \"{source_stock}\" -> \"{target_stock}\"")]
    #[diagnostic(
        code(ripple::model::dangling_flow),
        help("Both endpoints of a stock flow must name declared stocks.")
    )]
    DanglingFlow {
        source_stock: String,
        target_stock: String,
    },
}

// ---------------------------------------------------------------------------
// Consolidation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConsolidateError {
    #[error("suggestion references unknown impact id: {id}")]
    #[diagnostic(
        code(ripple::consolidate::unknown_impact),
        help(
            "All originalImpactIds must reference impacts present in the set \
             being consolidated. The suggestion may be stale — regenerate it."
        )
    )]
    UnknownImpact { id: String },

    #[error("suggestion merges {count} impact(s); at least 2 are required")]
    #[diagnostic(
        code(ripple::consolidate::too_few),
        help("A consolidation replaces two or more impacts with one.")
    )]
    TooFewImpacts { count: usize },

    #[error("consolidated impact id \"{id}\" collides with a surviving impact")]
    #[diagnostic(
        code(ripple::consolidate::id_collision),
        help("Give the consolidated impact an id not used by any impact it does not replace.")
    )]
    IdCollision { id: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    #[diagnostic(
        code(ripple::config::io),
        help("Check that the file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {message}")]
    #[diagnostic(
        code(ripple::config::parse),
        help("The config file must be valid TOML. {message}")
    )]
    Parse { path: String, message: String },
}

/// Convenience alias for functions returning ripple results.
pub type RippleResult<T> = std::result::Result<T, RippleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_converts_to_ripple_error() {
        let err = BuildError::GenerationFailure {
            message: "empty response".into(),
        };
        let top: RippleError = err.into();
        assert!(matches!(
            top,
            RippleError::Build(BuildError::GenerationFailure { .. })
        ));
    }

    #[test]
    fn structural_error_wraps_into_build_error() {
        let err = StructuralError::DanglingFlow {
            source_stock: "A".into(),
            target_stock: "B".into(),
        };
        let build: BuildError = err.into();
        assert!(matches!(build, BuildError::Structural(_)));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = TensionError::IncompleteAnalysis {
            field: "resourceConstraints".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("resourceConstraints"));
    }
}
