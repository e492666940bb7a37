use crate::align::{Alignment, Superimposition};
use crate::error::{EngineError, Stage};
use crate::ordination::{CanonicalVariates, Manova, PrincipalComponents};
use crate::regress::ShapeRegression;
use serde::{Serialize, Deserialize};

/// Bumped whenever the serialized layout of `AnalysisResult` changes
/// incompatibly; stored alongside every persisted result.
pub const SCHEMA_VERSION : u32 = 1;

/// Failure of one optional stage, captured in the result instead of
/// aborting the run: the stages downstream of a failed CVA, say, are
/// still worth computing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage : Stage,
    pub reason : String,
    pub objects : Vec<i64>
}

impl From<EngineError> for StageFailure {

    fn from(err : EngineError) -> Self {
        Self {
            stage : err.stage(),
            reason : err.to_string(),
            objects : err.objects().to_vec()
        }
    }

}

/// Outcome of one optional analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageOutcome<T> {
    Done(T),
    Failed(StageFailure)
}

impl<T> StageOutcome<T> {

    pub fn ok(&self) -> Option<&T> {
        match self {
            StageOutcome::Done(value) => Some(value),
            StageOutcome::Failed(_) => None
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            StageOutcome::Done(_) => None,
            StageOutcome::Failed(failure) => Some(failure)
        }
    }

}

/// Everything one analysis run produced. The superimposition is always
/// present (a run aborts without it); the multivariate stages are present
/// per configuration, individually marked failed when they could not be
/// computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub schema_version : u32,
    pub dataset_id : i64,
    pub dataset_name : String,

    /// Object identifiers in the row order of all matrices and score
    /// tables of this result.
    pub object_ids : Vec<i64>,

    pub superimposition : Superimposition,
    pub alignment : Alignment,

    pub pca : Option<StageOutcome<PrincipalComponents>>,
    pub cva : Option<StageOutcome<CanonicalVariates>>,
    pub manova : Option<StageOutcome<Manova>>,
    pub regression : Option<StageOutcome<ShapeRegression>>,

    /// Non-fatal conditions worth surfacing, e.g. a superimposition that
    /// hit its iteration cap.
    pub warnings : Vec<String>
}

impl AnalysisResult {

    /// Serializes the result as the JSON blob the persistence layer stores
    /// per analysis record.
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Reloads a stored result. Callers check `schema_version` against
    /// `SCHEMA_VERSION` before interpreting older blobs.
    pub fn from_json(json : &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

}

/// Terminal state of a pipeline run. Cancellation is a first-class
/// outcome, not an error: a cancelled run produced no result but also
/// nothing went wrong.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Box<AnalysisResult>),
    Cancelled
}

impl RunOutcome {

    pub fn completed(self) -> Option<Box<AnalysisResult>> {
        match self {
            RunOutcome::Completed(result) => Some(result),
            RunOutcome::Cancelled => None
        }
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled)
    }

}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn stage_failure_carries_error_context() {
        let err = EngineError::validation_for(
            Stage::CanonicalVariates,
            "too few groups",
            vec![4, 5]
        );
        let failure = StageFailure::from(err);
        assert_eq!(failure.stage, Stage::CanonicalVariates);
        assert_eq!(failure.objects, vec![4, 5]);
        assert!(failure.reason.contains("too few groups"));
    }

    #[test]
    fn outcome_accessors() {
        let done : StageOutcome<i32> = StageOutcome::Done(7);
        assert_eq!(done.ok(), Some(&7));
        assert!(done.failure().is_none());
        let failed : StageOutcome<i32> = StageOutcome::Failed(
            StageFailure::from(EngineError::singular(Stage::Regression, "rank"))
        );
        assert!(failed.ok().is_none());
        assert_eq!(failed.failure().unwrap().stage, Stage::Regression);
    }

}
