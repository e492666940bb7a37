use crate::align::{superimpose, GpaOptions, Superimposition};
use crate::data::DatasetSnapshot;
use crate::error::{EngineError, Stage};
use crate::ordination::{cva, flatten, manova, CvaOptions, GroupIndex, PrincipalComponents};
use crate::regress::ShapeRegression;
use log::{info, warn};
use nalgebra::*;
use serde::{Serialize, Deserialize};

mod progress;

pub use progress::*;

mod result;

pub use result::*;

/// Polynomial shape regression request: which variable supplies the
/// covariate and the polynomial degree to fit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegressionSpec {
    pub variable : usize,
    pub degree : usize
}

/// Full description of one analysis run over a dataset snapshot. The
/// superimposition always runs; PCA runs unless disabled; the group and
/// regression stages run when their inputs are named here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub superimposition : Superimposition,
    pub gpa : GpaOptions,

    /// Index of the grouping variable driving CVA and MANOVA, if any.
    pub grouping : Option<usize>,

    pub run_pca : bool,
    pub run_cva : bool,
    pub run_manova : bool,
    pub cva : CvaOptions,

    pub regression : Option<RegressionSpec>
}

impl Default for AnalysisConfig {

    fn default() -> Self {
        Self {
            superimposition : Superimposition::Procrustes,
            gpa : GpaOptions::default(),
            grouping : None,
            run_pca : true,
            run_cva : true,
            run_manova : true,
            cva : CvaOptions { leave_one_out : false },
            regression : None
        }
    }

}

/// Runs the configured stages over a snapshot. All validation happens up
/// front, before any numeric work, so a doomed run fails fast; after the
/// superimposition succeeds, each multivariate stage's failure is captured
/// in the result instead of aborting the run. A flipped cancellation token
/// surfaces as `RunOutcome::Cancelled` from whichever checkpoint saw it.
pub fn run(
    snapshot : &DatasetSnapshot,
    config : &AnalysisConfig,
    monitor : &Monitor
) -> Result<RunOutcome, EngineError> {
    match run_inner(snapshot, config, monitor) {
        Ok(result) => Ok(RunOutcome::Completed(Box::new(result))),
        Err(EngineError::Cancelled) => {
            info!("analysis of dataset {} cancelled", snapshot.dataset_id);
            Ok(RunOutcome::Cancelled)
        },
        Err(other) => Err(other)
    }
}

fn run_inner(
    snapshot : &DatasetSnapshot,
    config : &AnalysisConfig,
    monitor : &Monitor
) -> Result<AnalysisResult, EngineError> {
    validate(snapshot, config)?;
    monitor.checkpoint()?;
    monitor.report(Stage::Validation, 100);

    let shapes : Vec<DMatrix<f64>> = snapshot.objects.iter()
        .map(|o| o.landmarks.clone() )
        .collect();
    let ids = snapshot.object_ids();

    info!(
        "analysing dataset {} ({} objects, {:?} superimposition)",
        snapshot.dataset_id, shapes.len(), config.superimposition
    );
    let alignment = superimpose(
        &shapes,
        &ids,
        config.superimposition,
        &config.gpa,
        &snapshot.baseline,
        monitor
    )?;
    monitor.report(Stage::Superimposition, 100);

    let mut warnings = Vec::new();
    if !alignment.converged {
        let delta = alignment.residual_history.last().cloned().unwrap_or(f64::NAN);
        let err = EngineError::Convergence { iterations : alignment.iterations, delta };
        warn!("{}", err);
        warnings.push(err.to_string());
    }

    let data = flatten(&alignment.coords);
    let dimension = snapshot.dimension;

    let pca = if config.run_pca {
        monitor.checkpoint()?;
        let outcome = capture(PrincipalComponents::fit(&data, dimension))?;
        monitor.report(Stage::PrincipalComponents, 100);
        Some(outcome)
    } else {
        None
    };

    let labels = config.grouping.map(|variable| snapshot.group_labels(variable) );

    let cva_out = match (&labels, config.run_cva) {
        (Some(labels), true) => {
            monitor.checkpoint()?;
            let outcome = capture(cva(&data, labels, &config.cva))?;
            monitor.report(Stage::CanonicalVariates, 100);
            Some(outcome)
        },
        _ => None
    };

    let manova_out = match (&labels, config.run_manova) {
        (Some(labels), true) => {
            monitor.checkpoint()?;
            let outcome = capture(manova(&data, labels))?;
            monitor.report(Stage::GroupComparison, 100);
            Some(outcome)
        },
        _ => None
    };

    let regression = match config.regression {
        Some(spec) => {
            monitor.checkpoint()?;
            let fit = snapshot.covariate(spec.variable).and_then(|covariate| {
                ShapeRegression::fit(&data, &covariate, spec.degree, dimension)
            });
            let outcome = capture(fit)?;
            monitor.report(Stage::Regression, 100);
            Some(outcome)
        },
        None => None
    };

    Ok(AnalysisResult {
        schema_version : SCHEMA_VERSION,
        dataset_id : snapshot.dataset_id,
        dataset_name : snapshot.dataset_name.clone(),
        object_ids : ids,
        superimposition : config.superimposition,
        alignment,
        pca,
        cva : cva_out,
        manova : manova_out,
        regression,
        warnings
    })
}

/// Folds a stage result into a `StageOutcome`, letting cancellation keep
/// propagating as the error it internally is.
fn capture<T>(result : Result<T, EngineError>) -> Result<StageOutcome<T>, EngineError> {
    match result {
        Ok(value) => Ok(StageOutcome::Done(value)),
        Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
        Err(err) => {
            warn!("stage failed, continuing: {}", err);
            Ok(StageOutcome::Failed(StageFailure::from(err)))
        }
    }
}

/// Fail-fast validation of the snapshot against the configuration. Checks
/// here are cheap and structural; numeric degeneracy (collinear shapes,
/// singular scatters) surfaces in the stages themselves.
fn validate(snapshot : &DatasetSnapshot, config : &AnalysisConfig) -> Result<(), EngineError> {
    if snapshot.object_count() < 3 {
        return Err(EngineError::validation(
            Stage::Validation,
            format!("at least 3 objects are required, dataset has {}", snapshot.object_count())
        ));
    }
    if snapshot.dimension != 2 && snapshot.dimension != 3 {
        return Err(EngineError::validation(
            Stage::Validation,
            format!("unsupported dimension {}", snapshot.dimension)
        ));
    }

    let k = snapshot.landmark_count().unwrap_or(0);
    let mismatched : Vec<i64> = snapshot.objects.iter()
        .filter(|o| o.landmark_count() != k || o.dimension() != snapshot.dimension )
        .map(|o| o.id )
        .collect();
    if !mismatched.is_empty() {
        return Err(EngineError::validation_for(
            Stage::Validation,
            format!("landmark count or dimension differs from the dataset ({} x {})", k, snapshot.dimension),
            mismatched
        ));
    }

    let with_missing : Vec<i64> = snapshot.objects.iter()
        .filter(|o| o.has_missing() )
        .map(|o| o.id )
        .collect();
    if !with_missing.is_empty() {
        return Err(EngineError::validation_for(
            Stage::Validation,
            "objects with missing landmarks cannot be superimposed",
            with_missing
        ));
    }

    let baseline_methods = matches!(
        config.superimposition,
        Superimposition::Bookstein | Superimposition::ResistantFit
    );
    if baseline_methods && snapshot.baseline.len() < 2 {
        return Err(EngineError::validation(
            Stage::Validation,
            "baseline registration requested but the dataset defines no baseline"
        ));
    }

    if let Some(variable) = config.grouping {
        if config.run_cva || config.run_manova {
            if variable >= snapshot.variable_names.len() {
                return Err(EngineError::validation(
                    Stage::Validation,
                    format!("grouping variable index {} out of range", variable)
                ));
            }
            let groups = GroupIndex::new(&snapshot.group_labels(variable));
            if groups.count() < 2 {
                return Err(EngineError::validation(
                    Stage::Validation,
                    format!(
                        "grouping variable yields {} group(s); at least 2 are required",
                        groups.count()
                    )
                ));
            }
        }
    }
    if let Some(spec) = config.regression {
        if spec.variable >= snapshot.variable_names.len() {
            return Err(EngineError::validation(
                Stage::Validation,
                format!("regression variable index {} out of range", spec.variable)
            ));
        }
        // surfaces non-numeric covariates before the superimposition runs
        snapshot.covariate(spec.variable)?;
    }
    Ok(())
}
