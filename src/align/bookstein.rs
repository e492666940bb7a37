use super::procrustes::weighted_rotation;
use super::Alignment;
use crate::calc::{mad, median};
use crate::error::{EngineError, Stage};
use crate::pipeline::Monitor;
use nalgebra::*;

/// Bookstein baseline registration: an affine map sends the two baseline
/// landmarks of every configuration to (-0.5, 0[, 0]) and (0.5, 0[, 0]),
/// removing translation, rotation and scale relative to that baseline in
/// a single pass. In 3D a third baseline landmark, when present, is
/// rolled into the xy-plane.
pub fn bookstein(
    shapes : &[DMatrix<f64>],
    ids : &[i64],
    baseline : &[usize]
) -> Result<Alignment, EngineError> {
    let k = shapes[0].nrows();
    let d = shapes[0].ncols();
    validate_baseline(baseline, k)?;

    let mut coords = Vec::with_capacity(shapes.len());
    let mut rotations = Vec::with_capacity(shapes.len());
    for (shape, id) in shapes.iter().zip(ids) {
        let (registered, frame) = register_one(shape, baseline, *id)?;
        coords.push(registered);
        rotations.push(frame);
    }
    let mut mean_shape = DMatrix::<f64>::zeros(k, d);
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

/// Resistant fit: starts from the baseline registration, then re-aligns
/// every configuration to a per-landmark median consensus with landmark
/// weights derived from the median and median absolute deviation of its
/// residuals, so that a few displaced landmarks drag neither the
/// consensus nor the fit.
pub fn resistant_fit(
    shapes : &[DMatrix<f64>],
    ids : &[i64],
    baseline : &[usize],
    monitor : &Monitor
) -> Result<Alignment, EngineError> {
    const PASSES : usize = 2;

    let mut out = bookstein(shapes, ids, baseline)?;
    let n = out.coords.len();
    let k = out.coords[0].nrows();

    for pass in 0..PASSES {
        monitor.checkpoint()?;
        let consensus = median_consensus(&out.coords);
        for i in 0..n {
            let weights = residual_weights(&out.coords[i], &consensus);

            // weighted recentering of both sides
            let cx = weighted_centroid(&out.coords[i], &weights);
            let cm = weighted_centroid(&consensus, &weights);
            let mut xc = out.coords[i].clone();
            for mut row in xc.row_iter_mut() {
                row -= &cx;
            }
            let mut mc = consensus.clone();
            for mut row in mc.row_iter_mut() {
                row -= &cm;
            }

            let r = weighted_rotation(&xc, &mc, &weights, false)?;
            let rotated = &xc * &r;

            // weighted least-squares scale of the rotated shape onto the
            // consensus
            let mut num = 0.0;
            let mut den = 0.0;
            for l in 0..k {
                num += weights[l] * rotated.row(l).dot(&mc.row(l));
                den += weights[l] * rotated.row(l).norm_squared();
            }
            let scale = if den > 1e-12 { num / den } else { 1.0 };

            // back into the consensus frame, so objects with different
            // weights stay mutually comparable
            let mut fitted = rotated * scale;
            for mut row in fitted.row_iter_mut() {
                row += &cm;
            }
            out.coords[i] = fitted;
            out.rotations[i] = &out.rotations[i] * &r;
        }
        out.mean_shape = median_consensus(&out.coords);
        out.iterations = pass + 1;
    }
    Ok(out)
}

/// Per-landmark, per-coordinate median across all configurations; the
/// robust counterpart of the mean shape, immune to a minority of
/// displaced landmarks.
fn median_consensus(coords : &[DMatrix<f64>]) -> DMatrix<f64> {
    let (k, d) = (coords[0].nrows(), coords[0].ncols());
    DMatrix::from_fn(k, d, |i, j| {
        let vals : Vec<f64> = coords.iter().map(|c| c[(i, j)] ).collect();
        median(&vals)
    })
}

fn validate_baseline(baseline : &[usize], landmark_count : usize) -> Result<(), EngineError> {
    if baseline.len() < 2 {
        return Err(EngineError::validation(
            Stage::Superimposition,
            "baseline registration needs at least two baseline landmarks"
        ));
    }
    if baseline[0] == baseline[1] {
        return Err(EngineError::validation(
            Stage::Superimposition,
            "baseline landmarks must be distinct"
        ));
    }
    if baseline.iter().any(|b| *b >= landmark_count ) {
        return Err(EngineError::validation(
            Stage::Superimposition,
            format!("baseline landmark index out of range (landmark count {})", landmark_count)
        ));
    }
    Ok(())
}

/// Registers one configuration into its baseline frame; returns the
/// registered coordinates and the rotation part of the map.
fn register_one(
    shape : &DMatrix<f64>,
    baseline : &[usize],
    id : i64
) -> Result<(DMatrix<f64>, DMatrix<f64>), EngineError> {
    let d = shape.ncols();
    let p0 = shape.row(baseline[0]).clone_owned();
    let p1 = shape.row(baseline[1]).clone_owned();
    let axis = &p1 - &p0;
    let len = axis.norm();
    if len < 1e-12 {
        return Err(EngineError::validation_for(
            Stage::Superimposition,
            "coincident baseline landmarks",
            vec![id]
        ));
    }
    let mid = (&p0 + &p1) * 0.5;

    let frame = if d == 2 {
        let e1 = &axis / len;
        DMatrix::from_row_slice(2, 2, &[
            e1[0], -e1[1],
            e1[1], e1[0]
        ])
    } else {
        let e1 = Vector3::new(axis[0], axis[1], axis[2]) / len;
        let third = baseline.get(2).map(|b| {
            let q = shape.row(*b).clone_owned();
            Vector3::new(q[0] - mid[0], q[1] - mid[1], q[2] - mid[2])
        });
        let mut e2 = match third {
            Some(q) => &q - e1.scale(q.dot(&e1)),
            None => Vector3::zeros()
        };
        if e2.norm() < 1e-9 {
            // no usable third point: any direction orthogonal to the axis
            let probe = if e1[0].abs() < 0.9 { Vector3::x() } else { Vector3::y() };
            e2 = &probe - e1.scale(probe.dot(&e1));
        }
        e2 /= e2.norm();
        let e3 = e1.cross(&e2);
        DMatrix::from_fn(3, 3, |i, j| match j {
            0 => e1[i],
            1 => e2[i],
            _ => e3[i]
        })
    };

    let mut centered = shape.clone();
    for mut row in centered.row_iter_mut() {
        row -= &mid;
    }
    let registered = (centered * &frame) / len;
    Ok((registered, frame))
}

/// Tukey-style weights from the median/MAD of per-landmark residuals:
/// landmarks within the bulk keep weight one, landmarks far beyond it are
/// ignored. The MAD collapses to zero when most residuals vanish (clean
/// shapes against a median consensus), so the scale is floored at a small
/// fraction of the consensus's landmark spread to keep gross outliers
/// down-weighted in that regime.
fn residual_weights(shape : &DMatrix<f64>, consensus : &DMatrix<f64>) -> Vec<f64> {
    let residuals : Vec<f64> = (0..shape.nrows())
        .map(|l| (shape.row(l) - consensus.row(l)).norm() )
        .collect();
    let m = median(&residuals);
    let spread = (consensus.norm_squared() / consensus.nrows() as f64).sqrt();
    let s = (6.0 * mad(&residuals)).max(0.05 * spread).max(1e-12);
    residuals.iter().map(|r| {
        let u = (r - m) / s;
        if u <= 0.0 {
            1.0
        } else if u >= 1.0 {
            0.0
        } else {
            let t = 1.0 - u * u;
            t * t
        }
    }).collect()
}

fn weighted_centroid(shape : &DMatrix<f64>, weights : &[f64]) -> RowDVector<f64> {
    let total : f64 = weights.iter().sum();
    let mut centroid = RowDVector::zeros(shape.ncols());
    for (l, row) in shape.row_iter().enumerate() {
        centroid += row * weights[l];
    }
    centroid / total.max(1e-12)
}
