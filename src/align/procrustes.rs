use super::{center, centroid_size, Alignment, GpaOptions};
use crate::error::{EngineError, Stage};
use crate::pipeline::Monitor;
use log::debug;
use nalgebra::*;

/// Generalized Procrustes analysis. Each configuration is centered and
/// scaled to unit centroid size, then repeatedly rotated onto the running
/// mean by solving the orthogonal Procrustes problem; the mean is
/// re-estimated and re-normalized after every sweep. Stops when the sum of
/// squared landmark displacements of the mean drops below the tolerance,
/// or at the iteration cap, in which case the last iterate is returned
/// with `converged == false` and the caller decides how loudly to warn.
pub fn gpa(
    shapes : &[DMatrix<f64>],
    opts : &GpaOptions,
    monitor : &Monitor
) -> Result<Alignment, EngineError> {
    let n = shapes.len();
    let k = shapes[0].nrows();
    let d = shapes[0].ncols();

    let mut configs = Vec::with_capacity(n);
    for shape in shapes {
        let centered = center(shape);
        let size = centroid_size(&centered);
        configs.push(centered / size);
    }
    let mut rotations = vec![DMatrix::<f64>::identity(d, d); n];
    let mut mean = configs[0].clone();
    let mut residual_history = Vec::new();
    let mut iterations = 0;
    let mut converged = false;

    for iter in 0..opts.max_iterations {
        monitor.checkpoint()?;
        for i in 0..n {
            let r = optimal_rotation(&configs[i], &mean, opts.allow_reflection)?;
            configs[i] = &configs[i] * &r;
            rotations[i] = &rotations[i] * &r;
        }
        let mut new_mean = DMatrix::<f64>::zeros(k, d);
        for c in &configs {
            new_mean += c;
        }
        new_mean /= n as f64;
        let size = new_mean.norm();
        if size < 1e-12 {
            return Err(EngineError::singular(
                Stage::Superimposition,
                "mean shape collapsed to the origin"
            ));
        }
        new_mean /= size;
        let delta = (&new_mean - &mean).norm_squared();
        mean = new_mean;
        iterations = iter + 1;
        let residual : f64 = configs.iter().map(|c| (c - &mean).norm_squared() ).sum();
        residual_history.push(residual);
        monitor.report(Stage::Superimposition, (iterations * 100 / opts.max_iterations) as u8);
        if delta < opts.tolerance {
            converged = true;
            break;
        }
    }
    debug!(
        "gpa: {} configurations, {} iterations, converged = {}",
        n, iterations, converged
    );

    // Orient the whole solution along the principal axes of the mean so
    // the output does not depend on the orientation of the first input.
    let r = principal_orientation(&mean)?;
    mean = &mean * &r;
    for i in 0..n {
        configs[i] = &configs[i] * &r;
        rotations[i] = &rotations[i] * &r;
    }

    Ok(Alignment {
        coords : configs,
        rotations,
        mean_shape : mean,
        iterations,
        converged,
        residual_history
    })
}

/// Solves the orthogonal Procrustes problem: the rotation R minimizing
/// ||X R - M|| over orthogonal matrices, via SVD of the cross-covariance
/// X^T M. When reflections are disallowed and the unconstrained optimum
/// reflects, the axis of least support is flipped (determinant correction).
pub fn optimal_rotation(
    x : &DMatrix<f64>,
    target : &DMatrix<f64>,
    allow_reflection : bool
) -> Result<DMatrix<f64>, EngineError> {
    let h = x.transpose() * target;
    let svd = h.svd(true, true);
    let u = svd.u.ok_or_else(|| EngineError::singular(Stage::Superimposition, "SVD of cross-covariance failed") )?;
    let v_t = svd.v_t.ok_or_else(|| EngineError::singular(Stage::Superimposition, "SVD of cross-covariance failed") )?;
    let r = &u * &v_t;
    if !allow_reflection && r.determinant() < 0.0 {
        let mut u = u;
        let last = u.ncols() - 1;
        for i in 0..u.nrows() {
            u[(i, last)] = -u[(i, last)];
        }
        Ok(&u * &v_t)
    } else {
        Ok(r)
    }
}

/// Weighted variant of the orthogonal Procrustes rotation, used by the
/// resistant fit: landmark k contributes with weight w_k to the
/// cross-covariance.
pub(crate) fn weighted_rotation(
    x : &DMatrix<f64>,
    target : &DMatrix<f64>,
    weights : &[f64],
    allow_reflection : bool
) -> Result<DMatrix<f64>, EngineError> {
    let d = x.ncols();
    let mut h = DMatrix::<f64>::zeros(d, d);
    for k in 0..x.nrows() {
        h += weights[k] * x.row(k).transpose() * target.row(k);
    }
    let svd = h.svd(true, true);
    let u = svd.u.ok_or_else(|| EngineError::singular(Stage::Superimposition, "SVD of weighted cross-covariance failed") )?;
    let v_t = svd.v_t.ok_or_else(|| EngineError::singular(Stage::Superimposition, "SVD of weighted cross-covariance failed") )?;
    let r = &u * &v_t;
    if !allow_reflection && r.determinant() < 0.0 {
        let mut u = u;
        let last = u.ncols() - 1;
        for i in 0..u.nrows() {
            u[(i, last)] = -u[(i, last)];
        }
        Ok(&u * &v_t)
    } else {
        Ok(r)
    }
}

/// Deterministic orientation for a centered mean shape: rotate onto the
/// principal axes of its landmark scatter, with signs fixed so the largest
/// component of every axis is positive, then a determinant correction to
/// stay a proper rotation.
fn principal_orientation(mean : &DMatrix<f64>) -> Result<DMatrix<f64>, EngineError> {
    let d = mean.ncols();
    let scatter = mean.transpose() * mean;
    let eig = SymmetricEigen::new(scatter);
    let mut order : Vec<usize> = (0..d).collect();
    order.sort_by(|a, b| {
        eig.eigenvalues[*b].partial_cmp(&eig.eigenvalues[*a]).unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut r = DMatrix::<f64>::zeros(d, d);
    for (j, src) in order.iter().enumerate() {
        let col = eig.eigenvectors.column(*src);
        let mut max_ix = 0;
        for i in 0..d {
            if col[i].abs() > col[max_ix].abs() {
                max_ix = i;
            }
        }
        let sign = if col[max_ix] < 0.0 { -1.0 } else { 1.0 };
        for i in 0..d {
            r[(i, j)] = sign * col[i];
        }
    }
    if r.determinant() < 0.0 {
        for i in 0..d {
            r[(i, d - 1)] = -r[(i, d - 1)];
        }
    }
    Ok(r)
}
