use super::center_columns;
use crate::error::{EngineError, Stage};
use log::debug;
use nalgebra::*;
use serde::{Serialize, Deserialize};

/// Relative threshold under which an eigenvalue is treated as part of the
/// null space already removed by superimposition.
const EIGEN_FLOOR : f64 = 1e-12;

/// Principal components of aligned shapes: an orthogonal basis of shape
/// space ordered by explained variance, with per-object scores and a pure
/// reconstruction map from scores back to landmark configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalComponents {
    /// Mean of the flattened data (length P = K * D).
    pub mean : DVector<f64>,

    /// Retained eigenvalues, strictly descending.
    pub eigenvalues : DVector<f64>,

    /// Retained eigenvectors as columns (P x m).
    pub components : DMatrix<f64>,

    /// Projections of the centered data onto the components (N x m).
    pub scores : DMatrix<f64>,

    /// Share of total variance per retained axis, and its running sum.
    pub variance_ratio : Vec<f64>,
    pub cumulative_ratio : Vec<f64>,

    /// Coordinate dimension D, needed to fold flat vectors back into
    /// K x D configurations.
    pub dimension : usize
}

impl PrincipalComponents {

    /// Decomposes the N x P matrix of flattened aligned shapes via SVD of
    /// the centered data (never forming the P x P covariance, which is the
    /// numerically preferable route when P exceeds N). Eigenvalues are the
    /// squared singular values over N - 1; axes below `EIGEN_FLOOR`
    /// relative to the leading eigenvalue are dropped.
    pub fn fit(data : &DMatrix<f64>, dimension : usize) -> Result<Self, EngineError> {
        let n = data.nrows();
        if n < 2 {
            return Err(EngineError::validation(
                Stage::PrincipalComponents,
                "at least two objects are required"
            ));
        }
        let (centered, mean_row) = center_columns(data);
        let svd = centered.clone().svd(false, true);
        let v_t = svd.v_t.as_ref().ok_or_else(|| {
            EngineError::singular(Stage::PrincipalComponents, "SVD of the centered data failed")
        })?;
        let denom = (n - 1) as f64;

        // nalgebra does not order the singular values; sort a permutation
        // descending and read the spectrum through it
        let mut order : Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|a, b| {
            svd.singular_values[*b].partial_cmp(&svd.singular_values[*a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let eigen_all : Vec<f64> = order.iter().map(|i| {
            let s = svd.singular_values[*i];
            s * s / denom
        }).collect();
        let leading = eigen_all.first().cloned().unwrap_or(0.0);
        let retained = eigen_all.iter().filter(|e| **e > leading * EIGEN_FLOOR ).count();
        debug!("pca: {} of {} axes retained", retained, eigen_all.len());

        let eigenvalues = DVector::from_iterator(retained, eigen_all.iter().take(retained).cloned());
        let components = DMatrix::from_fn(data.ncols(), retained, |i, j| v_t[(order[j], i)] );
        let scores = &centered * &components;

        let total : f64 = eigen_all.iter().sum();
        let mut variance_ratio = Vec::with_capacity(retained);
        let mut cumulative_ratio = Vec::with_capacity(retained);
        let mut cumul = 0.0;
        for e in eigenvalues.iter() {
            let ratio = if total > 0.0 { e / total } else { 0.0 };
            cumul += ratio;
            variance_ratio.push(ratio);
            cumulative_ratio.push(cumul);
        }

        Ok(Self {
            mean : mean_row.transpose(),
            eigenvalues,
            components,
            scores,
            variance_ratio,
            cumulative_ratio,
            dimension
        })
    }

    pub fn axis_count(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Landmark configuration at the given score along one axis, all other
    /// scores held at zero: mean + score * eigenvector. A score of zero
    /// reproduces the mean shape.
    pub fn reconstruct(&self, axis : usize, score : f64) -> DMatrix<f64> {
        let flat = &self.mean + self.components.column(axis) * score;
        self.unflatten(&flat)
    }

    /// Landmark configuration at an arbitrary score vector; scores beyond
    /// the retained axes are ignored.
    pub fn reconstruct_from_scores(&self, scores : &[f64]) -> DMatrix<f64> {
        let mut flat = self.mean.clone();
        for (axis, score) in scores.iter().enumerate().take(self.axis_count()) {
            flat += self.components.column(axis) * *score;
        }
        self.unflatten(&flat)
    }

    /// Projects previously unseen flattened shapes onto the retained axes.
    pub fn project(&self, data : &DMatrix<f64>) -> DMatrix<f64> {
        let mut centered = data.clone();
        let mean_row = self.mean.transpose();
        for mut row in centered.row_iter_mut() {
            row -= &mean_row;
        }
        centered * &self.components
    }

    fn unflatten(&self, flat : &DVector<f64>) -> DMatrix<f64> {
        let d = self.dimension;
        let k = flat.len() / d;
        DMatrix::from_fn(k, d, |i, j| flat[i * d + j] )
    }

}
