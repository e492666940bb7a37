use crate::error::{EngineError, Stage};
use crate::pipeline::Monitor;
use nalgebra::*;
use serde::{Serialize, Deserialize};

mod procrustes;

pub use procrustes::*;

mod bookstein;

pub use bookstein::*;

/// Superimposition method removing nuisance transformations from raw
/// landmark configurations. A closed set: callers match it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Superimposition {
    /// Iterative generalized Procrustes analysis (the general case).
    Procrustes,

    /// Two-point baseline registration; no iteration.
    Bookstein,

    /// Median-based robust variant of the baseline registration,
    /// down-weighting outlier landmarks.
    ResistantFit,

    /// Passthrough: centering only.
    None
}

/// Options of the generalized Procrustes iteration. Defaults follow the
/// literature-standard choices: tolerance 1e-6, cap 100, reflections
/// disallowed in the optimal rotation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpaOptions {
    /// Convergence threshold on the sum of squared landmark displacements
    /// of the mean shape between iterations.
    pub tolerance : f64,

    pub max_iterations : usize,

    pub allow_reflection : bool
}

impl Default for GpaOptions {

    fn default() -> Self {
        Self { tolerance : 1e-6, max_iterations : 100, allow_reflection : false }
    }

}

/// Output of a superimposition: one aligned configuration and one
/// accumulated rotation per object, the consensus (mean) shape, and the
/// iteration diagnostics of the Procrustes loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alignment {
    /// Aligned K x D configurations, in input order.
    pub coords : Vec<DMatrix<f64>>,

    /// D x D rotation applied to each (centered, scaled) configuration.
    pub rotations : Vec<DMatrix<f64>>,

    pub mean_shape : DMatrix<f64>,

    pub iterations : usize,

    /// False when the iteration cap was reached before the tolerance.
    pub converged : bool,

    /// Total sum of squared distances of the configurations to the mean
    /// after each Procrustes sweep; non-increasing when the iteration is
    /// healthy.
    pub residual_history : Vec<f64>
}

/// Dispatches to the requested superimposition. `ids` parallels `shapes`
/// and is only used to name offending objects in errors; `baseline` is
/// consulted by the baseline-registration methods.
pub fn superimpose(
    shapes : &[DMatrix<f64>],
    ids : &[i64],
    method : Superimposition,
    opts : &GpaOptions,
    baseline : &[usize],
    monitor : &Monitor
) -> Result<Alignment, EngineError> {
    validate_shapes(shapes, ids)?;
    match method {
        Superimposition::Procrustes => gpa(shapes, opts, monitor),
        Superimposition::Bookstein => bookstein(shapes, ids, baseline),
        Superimposition::ResistantFit => resistant_fit(shapes, ids, baseline, monitor),
        Superimposition::None => center_only(shapes)
    }
}

/// Centering-only passthrough: translation removed, rotation and scale
/// untouched.
pub fn center_only(shapes : &[DMatrix<f64>]) -> Result<Alignment, EngineError> {
    if shapes.is_empty() {
        return Err(EngineError::validation(Stage::Superimposition, "no configurations to align"));
    }
    let d = shapes[0].ncols();
    let k = shapes[0].nrows();
    let coords : Vec<DMatrix<f64>> = shapes.iter().map(|s| center(s) ).collect();
    let rotations = vec![DMatrix::identity(d, d); shapes.len()];
    let mut mean_shape = DMatrix::zeros(k, d);
    for c in &coords {
        mean_shape += c;
    }
    mean_shape /= shapes.len() as f64;
    Ok(Alignment {
        coords,
        rotations,
        mean_shape,
        iterations : 0,
        converged : true,
        residual_history : Vec::new()
    })
}

/// Translates a configuration so its centroid sits at the origin.
pub(crate) fn center(shape : &DMatrix<f64>) -> DMatrix<f64> {
    let k = shape.nrows() as f64;
    let mut centroid = RowDVector::zeros(shape.ncols());
    for row in shape.row_iter() {
        centroid += row;
    }
    centroid /= k;
    let mut out = shape.clone();
    for mut row in out.row_iter_mut() {
        row -= &centroid;
    }
    out
}

/// Centroid size of a centered configuration is its Frobenius norm.
pub(crate) fn centroid_size(centered : &DMatrix<f64>) -> f64 {
    centered.norm()
}

/// Checks that all configurations agree in landmark count and dimension,
/// that none is degenerate (zero centroid size, or fewer non-collinear
/// points than the dimension requires), before any numeric stage runs.
pub(crate) fn validate_shapes(shapes : &[DMatrix<f64>], ids : &[i64]) -> Result<(), EngineError> {
    if shapes.is_empty() {
        return Err(EngineError::validation(Stage::Superimposition, "no configurations to align"));
    }
    let k = shapes[0].nrows();
    let d = shapes[0].ncols();
    if d != 2 && d != 3 {
        return Err(EngineError::validation(
            Stage::Superimposition,
            format!("unsupported dimension {}", d)
        ));
    }
    let mismatched : Vec<i64> = shapes.iter().zip(ids)
        .filter(|(s, _)| s.nrows() != k || s.ncols() != d )
        .map(|(_, id)| *id )
        .collect();
    if !mismatched.is_empty() {
        return Err(EngineError::validation_for(
            Stage::Superimposition,
            format!("landmark count or dimension differs from the first configuration ({} x {})", k, d),
            mismatched
        ));
    }
    let mut degenerate = Vec::new();
    for (shape, id) in shapes.iter().zip(ids) {
        let centered = center(shape);
        if centroid_size(&centered) < 1e-12 {
            degenerate.push(*id);
            continue;
        }
        // full spatial rank required: D non-negligible singular values
        // (the values come back unordered, so take the max explicitly)
        let svd = centered.clone().svd(false, false);
        let leading = svd.singular_values.iter().cloned().fold(0.0_f64, f64::max);
        let rank = svd.singular_values.iter().filter(|s| **s > leading * 1e-9 ).count();
        if rank < d {
            degenerate.push(*id);
        }
    }
    if !degenerate.is_empty() {
        return Err(EngineError::validation_for(
            Stage::Superimposition,
            "degenerate configuration: zero centroid size or collinear landmarks",
            degenerate
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn mismatched_landmark_counts_rejected() {
        let a = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        let b = DMatrix::from_row_slice(4, 2, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let err = validate_shapes(&[a, b], &[10, 11]).unwrap_err();
        assert_eq!(err.objects(), &[11]);
    }

    #[test]
    fn collinear_configuration_rejected() {
        let good = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        let line = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
        let err = validate_shapes(&[good, line], &[1, 2]).unwrap_err();
        assert_eq!(err.objects(), &[2]);
    }

    #[test]
    fn center_only_removes_translation() {
        let a = DMatrix::from_row_slice(3, 2, &[5.0, 5.0, 6.0, 5.0, 5.0, 6.0]);
        let out = center_only(&[a]).unwrap();
        let c = &out.coords[0];
        let col_sum : f64 = c.column(0).sum();
        assert!(col_sum.abs() < 1e-12);
        assert!(out.converged && out.iterations == 0);
    }

    #[test]
    fn center_only_rejects_empty_input() {
        assert!(center_only(&[]).is_err());
    }

}
