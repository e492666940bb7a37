use serde::{Serialize, Deserialize};
use std::fmt::{self, Display};
use thiserror::Error;

/// Identifies the analysis stage an error or progress event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Validation,
    Superimposition,
    PrincipalComponents,
    CanonicalVariates,
    GroupComparison,
    Regression
}

impl Display for Stage {

    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validation => "validation",
            Stage::Superimposition => "superimposition",
            Stage::PrincipalComponents => "principal components",
            Stage::CanonicalVariates => "canonical variates",
            Stage::GroupComparison => "group comparison",
            Stage::Regression => "regression"
        };
        write!(f, "{}", name)
    }

}

/// Errors produced by the shape-analysis engine. Validation errors abort a
/// run before any numeric work; singular-matrix errors surface only after
/// the automatic PCA-subspace recovery has failed; convergence errors are
/// attached to results as warnings rather than raised; cancellation is a
/// clean termination triggered by the caller's token, mapped to a
/// distinguished outcome at the pipeline boundary.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum EngineError {

    #[error("{stage} failed: {reason}")]
    Validation {
        stage : Stage,
        reason : String,
        objects : Vec<i64>
    },

    #[error("{stage}: singular matrix ({reason})")]
    Singular {
        stage : Stage,
        reason : String
    },

    #[error("superimposition stopped at the iteration cap ({iterations} iterations, last mean displacement {delta:e})")]
    Convergence {
        iterations : usize,
        delta : f64
    },

    #[error("analysis cancelled")]
    Cancelled

}

impl EngineError {

    pub fn validation(stage : Stage, reason : impl Into<String>) -> Self {
        EngineError::Validation { stage, reason : reason.into(), objects : Vec::new() }
    }

    pub fn validation_for(stage : Stage, reason : impl Into<String>, objects : Vec<i64>) -> Self {
        EngineError::Validation { stage, reason : reason.into(), objects }
    }

    pub fn singular(stage : Stage, reason : impl Into<String>) -> Self {
        EngineError::Singular { stage, reason : reason.into() }
    }

    /// Stage the error originated from; convergence warnings and
    /// cancellations always belong to the superimposition/pipeline loop.
    pub fn stage(&self) -> Stage {
        match self {
            EngineError::Validation { stage, .. } => *stage,
            EngineError::Singular { stage, .. } => *stage,
            EngineError::Convergence { .. } => Stage::Superimposition,
            EngineError::Cancelled => Stage::Validation
        }
    }

    /// Identifiers of the objects that triggered the error, when known.
    pub fn objects(&self) -> &[i64] {
        match self {
            EngineError::Validation { objects, .. } => &objects[..],
            _ => &[]
        }
    }

}
