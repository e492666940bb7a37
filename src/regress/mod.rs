use crate::calc::polyval;
use crate::error::{EngineError, Stage};
use log::debug;
use nalgebra::*;
use serde::{Serialize, Deserialize};

/// Polynomial regression of every flattened shape coordinate on a single
/// continuous covariate, fit jointly by least squares. The coefficient
/// matrix maps a covariate value to a full landmark configuration, which
/// is how allometric trajectories are visualized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeRegression {

    /// Polynomial degree (1 = linear).
    pub degree : usize,

    /// (degree + 1) x P coefficients; row 0 holds the intercepts.
    pub coefficients : DMatrix<f64>,

    /// Fitted values and residuals, both N x P.
    pub fitted : DMatrix<f64>,
    pub residuals : DMatrix<f64>,

    /// Coefficient of determination per coordinate, and pooled over all
    /// coordinates weighted by their variance.
    pub r_squared : Vec<f64>,
    pub overall_r_squared : f64,

    /// Observed covariate range; predictions outside it are flagged as
    /// extrapolated.
    pub covariate_range : (f64, f64),

    /// Coordinate dimension D of the underlying configurations.
    pub dimension : usize
}

/// Shape predicted at one covariate value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapePrediction {
    pub coords : DMatrix<f64>,
    pub covariate : f64,
    pub extrapolated : bool
}

impl ShapeRegression {

    /// Fits the polynomial by solving the normal equations of the
    /// Vandermonde design; the cross-product system is small (degree + 1
    /// square) regardless of landmark count.
    pub fn fit(
        data : &DMatrix<f64>,
        covariate : &[f64],
        degree : usize,
        dimension : usize
    ) -> Result<Self, EngineError> {
        let n = data.nrows();
        let p = data.ncols();
        validate(n, covariate, degree)?;

        let design = DMatrix::from_fn(n, degree + 1, |i, j| covariate[i].powi(j as i32) );
        let xtx = design.transpose() * &design;
        let xty = design.transpose() * data;
        let coefficients = xtx.qr().solve(&xty).ok_or_else(|| {
            EngineError::singular(
                Stage::Regression,
                "design matrix is rank deficient; too few distinct covariate values for this degree"
            )
        })?;

        let fitted = &design * &coefficients;
        let residuals = data - &fitted;

        let mut r_squared = Vec::with_capacity(p);
        let mut ss_res_total = 0.0;
        let mut ss_tot_total = 0.0;
        for j in 0..p {
            let mean = data.column(j).mean();
            let ss_tot : f64 = data.column(j).iter().map(|v| (v - mean) * (v - mean) ).sum();
            let ss_res = residuals.column(j).norm_squared();
            ss_res_total += ss_res;
            ss_tot_total += ss_tot;
            r_squared.push(if ss_tot > 1e-12 { 1.0 - ss_res / ss_tot } else { 0.0 });
        }
        let overall_r_squared = if ss_tot_total > 1e-12 {
            1.0 - ss_res_total / ss_tot_total
        } else {
            0.0
        };
        debug!("regression: degree {} fit, pooled r2 = {:.4}", degree, overall_r_squared);

        let lo = covariate.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = covariate.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        Ok(Self {
            degree,
            coefficients,
            fitted,
            residuals,
            r_squared,
            overall_r_squared,
            covariate_range : (lo, hi),
            dimension
        })
    }

    /// Landmark configuration predicted at the given covariate value.
    /// Values outside the observed range are refused unless extrapolation
    /// is explicitly allowed, and flagged even when it is.
    pub fn predict_at(
        &self,
        value : f64,
        allow_extrapolation : bool
    ) -> Result<ShapePrediction, EngineError> {
        let (lo, hi) = self.covariate_range;
        let extrapolated = value < lo || value > hi;
        if extrapolated && !allow_extrapolation {
            return Err(EngineError::validation(
                Stage::Regression,
                format!("covariate value {} outside the observed range [{}, {}]", value, lo, hi)
            ));
        }
        let p = self.coefficients.ncols();
        let d = self.dimension;
        let mut flat = DVector::zeros(p);
        for j in 0..p {
            let coefs : Vec<f64> = self.coefficients.column(j).iter().cloned().collect();
            flat[j] = polyval(&coefs, value);
        }
        let k = p / d;
        let coords = DMatrix::from_fn(k, d, |i, j| flat[i * d + j] );
        Ok(ShapePrediction { coords, covariate : value, extrapolated })
    }

}

fn validate(n : usize, covariate : &[f64], degree : usize) -> Result<(), EngineError> {
    if degree < 1 {
        return Err(EngineError::validation(
            Stage::Regression,
            "polynomial degree must be at least 1"
        ));
    }
    if covariate.len() != n {
        return Err(EngineError::validation(
            Stage::Regression,
            format!("covariate has {} values for {} objects", covariate.len(), n)
        ));
    }
    if n < degree + 2 {
        return Err(EngineError::validation(
            Stage::Regression,
            format!("degree {} needs at least {} objects, got {}", degree, degree + 2, n)
        ));
    }
    if covariate.iter().any(|v| !v.is_finite() ) {
        return Err(EngineError::validation(
            Stage::Regression,
            "covariate contains non-finite values"
        ));
    }
    let mut distinct : Vec<f64> = covariate.to_vec();
    distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal) );
    distinct.dedup_by(|a, b| (*a - *b).abs() < 1e-12 );
    if distinct.len() < degree + 1 {
        return Err(EngineError::validation(
            Stage::Regression,
            format!("degree {} needs at least {} distinct covariate values", degree, degree + 1)
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::ordination::flatten;

    const EPS : f64 = 1e-8;

    fn linear_shapes() -> (Vec<DMatrix<f64>>, Vec<f64>) {
        // triangle whose apex drifts linearly with the covariate
        let covariate : Vec<f64> = (0..8).map(|i| 1.0 + i as f64 * 0.5 ).collect();
        let shapes = covariate.iter().map(|t| {
            DMatrix::from_row_slice(3, 2, &[
                0.0, 0.0,
                1.0, 0.0,
                0.5, 1.0 + 0.2 * t
            ])
        }).collect();
        (shapes, covariate)
    }

    #[test]
    fn linear_trend_is_recovered_exactly() {
        let (shapes, covariate) = linear_shapes();
        let data = flatten(&shapes);
        let reg = ShapeRegression::fit(&data, &covariate, 1, 2).unwrap();
        assert!(reg.overall_r_squared > 1.0 - EPS);
        // the moving coordinate carries the trend
        assert!((reg.coefficients[(1, 5)] - 0.2).abs() < EPS);
        assert!((reg.coefficients[(0, 5)] - 1.0).abs() < EPS);
        // static coordinates regress to zero slope
        assert!(reg.coefficients[(1, 0)].abs() < EPS);
        assert!((&reg.residuals).norm() < 1e-6);
    }

    #[test]
    fn prediction_interpolates_and_flags_extrapolation() {
        let (shapes, covariate) = linear_shapes();
        let data = flatten(&shapes);
        let reg = ShapeRegression::fit(&data, &covariate, 1, 2).unwrap();

        let inside = reg.predict_at(2.0, false).unwrap();
        assert!(!inside.extrapolated);
        assert!((inside.coords[(2, 1)] - 1.4).abs() < 1e-6);

        assert!(reg.predict_at(10.0, false).is_err());
        let outside = reg.predict_at(10.0, true).unwrap();
        assert!(outside.extrapolated);
        assert!((outside.coords[(2, 1)] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn quadratic_degree_fits_curved_trend() {
        let covariate : Vec<f64> = (0..10).map(|i| i as f64 * 0.3 ).collect();
        let shapes : Vec<DMatrix<f64>> = covariate.iter().map(|t| {
            DMatrix::from_row_slice(3, 2, &[
                0.0, 0.0,
                1.0, 0.0,
                0.5, 0.5 + 0.1 * t * t
            ])
        }).collect();
        let data = flatten(&shapes);
        let linear = ShapeRegression::fit(&data, &covariate, 1, 2).unwrap();
        let quadratic = ShapeRegression::fit(&data, &covariate, 2, 2).unwrap();
        assert!(quadratic.overall_r_squared > 1.0 - EPS);
        assert!(quadratic.overall_r_squared > linear.overall_r_squared);
    }

    #[test]
    fn rejects_ill_posed_fits() {
        let (shapes, covariate) = linear_shapes();
        let data = flatten(&shapes);
        assert!(ShapeRegression::fit(&data, &covariate, 0, 2).is_err());
        assert!(ShapeRegression::fit(&data, &covariate[..4], 1, 2).is_err());
        let constant = vec![3.0; 8];
        assert!(ShapeRegression::fit(&data, &constant, 1, 2).is_err());
    }

}
