use super::{center_columns, GroupIndex, PrincipalComponents};
use crate::error::{EngineError, Stage};
use log::{debug, warn};
use nalgebra::*;
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CvaOptions {
    /// Additionally classify every object from a model fitted without it.
    pub leave_one_out : bool
}

/// Nearest-centroid classification produced from a model fitted without
/// the classified object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidation {
    pub classification : Vec<String>,

    /// Percentage of objects assigned to their true group.
    pub accuracy : f64
}

/// Canonical variate analysis: the axes maximizing between-group over
/// within-group variance of aligned shapes, with per-object scores, group
/// centroids in canonical space and a nearest-centroid classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalVariates {
    /// Eigenvalues of the canonical axes, descending.
    pub eigenvalues : DVector<f64>,

    /// Canonical axes as columns in the original variable space (P x m).
    pub axes : DMatrix<f64>,

    /// Object scores on the canonical axes (N x m).
    pub scores : DMatrix<f64>,

    /// Group labels in first-appearance order.
    pub groups : Vec<String>,

    /// Group centroids in canonical space (one row per group).
    pub centroids : DMatrix<f64>,

    /// Nearest-centroid group assignment per object.
    pub classification : Vec<String>,

    /// Percentage of objects assigned to their true group.
    pub accuracy : f64,

    pub cross_validation : Option<CrossValidation>,

    /// Number of leading principal components the shapes were projected
    /// onto before solving, when the within-group scatter was singular in
    /// the full space.
    pub reduced_to : Option<usize>
}

/// Runs CVA on the flattened aligned shapes. When the within-group scatter
/// is singular (which is certain once P >= N - number of groups) the
/// shapes are first projected onto the leading principal components and
/// the generalized eigenproblem is solved in that reduced space; a
/// `Singular` error surfaces only if the reduction does not help.
pub fn cva(
    data : &DMatrix<f64>,
    labels : &[String],
    opts : &CvaOptions
) -> Result<CanonicalVariates, EngineError> {
    let mut out = cva_fit(data, labels)?;
    if opts.leave_one_out {
        out.cross_validation = Some(cross_validate(data, labels)?);
    }
    Ok(out)
}

fn cva_fit(data : &DMatrix<f64>, labels : &[String]) -> Result<CanonicalVariates, EngineError> {
    let n = data.nrows();
    let p = data.ncols();
    let groups = GroupIndex::new(labels);
    validate_groups(&groups, n)?;
    let g = groups.count();

    let (centered, _) = center_columns(data);

    // reduce up front when the pooled scatter cannot be full rank
    let needs_reduction = p >= n - g + 1;
    let (working, pca, reduced_to) = if needs_reduction {
        let (scores, pca) = reduce(data, n - g)?;
        let r = scores.ncols();
        (scores, Some(pca), Some(r))
    } else {
        (centered.clone(), None, None)
    };

    let solved = solve_axes(&working, &groups);
    let (eigenvalues, axes_working, pca, reduced_to) = match solved {
        Ok((vals, axes)) => (vals, axes, pca, reduced_to),
        Err(err) => {
            if reduced_to.is_some() {
                return Err(err);
            }
            // full space turned out singular anyway: retry reduced
            warn!("cva: within-group scatter singular in the full space, retrying on principal components");
            let (scores, pca) = reduce(data, n - g)?;
            let r = scores.ncols();
            let (vals, axes) = solve_axes(&scores, &groups)?;
            (vals, axes, Some(pca), Some(r))
        }
    };

    // map axes back to the original variable space when reduced
    let axes = match &pca {
        Some(pca) => &pca.components * &axes_working,
        None => axes_working
    };
    let scores = &centered * &axes;
    let centroids = groups.centroids(&scores);

    let classification : Vec<String> = (0..n)
        .map(|i| groups.groups[nearest_centroid(&scores.row(i).clone_owned(), &centroids)].clone() )
        .collect();
    let hits = classification.iter().zip(labels).filter(|(c, l)| c == l ).count();
    let accuracy = 100.0 * hits as f64 / n as f64;
    debug!("cva: {} groups, {} axes, accuracy {:.1}%", g, axes.ncols(), accuracy);

    Ok(CanonicalVariates {
        eigenvalues,
        axes,
        scores,
        groups : groups.groups,
        centroids,
        classification,
        accuracy,
        cross_validation : None,
        reduced_to
    })
}

fn validate_groups(groups : &GroupIndex, n : usize) -> Result<(), EngineError> {
    if groups.count() < 2 {
        return Err(EngineError::validation(
            Stage::CanonicalVariates,
            format!("grouping variable yields {} group(s); at least 2 are required", groups.count())
        ));
    }
    if let Some(pos) = groups.sizes.iter().position(|s| *s < 2 ) {
        return Err(EngineError::validation(
            Stage::CanonicalVariates,
            format!("group '{}' has fewer than 2 members", groups.groups[pos])
        ));
    }
    if n <= groups.count() {
        return Err(EngineError::validation(
            Stage::CanonicalVariates,
            "not enough objects for the number of groups"
        ));
    }
    Ok(())
}

/// Projects the data onto its leading principal components, keeping at
/// most `max_rank` axes, to obtain a full-rank space for the scatter
/// matrices.
fn reduce(data : &DMatrix<f64>, max_rank : usize) -> Result<(DMatrix<f64>, PrincipalComponents), EngineError> {
    let mut pca = PrincipalComponents::fit(data, 1)?;
    if pca.axis_count() == 0 {
        return Err(EngineError::singular(
            Stage::CanonicalVariates,
            "shapes have no variance to discriminate on"
        ));
    }
    let keep = pca.axis_count().min(max_rank.saturating_sub(1)).max(1);
    if keep < pca.axis_count() {
        pca.components = pca.components.columns(0, keep).into();
        pca.eigenvalues = pca.eigenvalues.rows(0, keep).into();
        pca.scores = pca.scores.columns(0, keep).into();
        pca.variance_ratio.truncate(keep);
        pca.cumulative_ratio.truncate(keep);
    }
    let scores = pca.scores.clone();
    Ok((scores, pca))
}

/// Solves the generalized eigenproblem W^-1 B by Cholesky whitening of the
/// pooled within-group scatter and a symmetric eigendecomposition of the
/// whitened between-group scatter.
fn solve_axes(
    centered : &DMatrix<f64>,
    groups : &GroupIndex
) -> Result<(DVector<f64>, DMatrix<f64>), EngineError> {
    let n = centered.nrows();
    let q = centered.ncols();
    let g = groups.count();
    let centroids = groups.centroids(centered);

    let mut within = DMatrix::<f64>::zeros(q, q);
    for (i, a) in groups.assignment.iter().enumerate() {
        let dev = centered.row(i) - centroids.row(*a);
        within += dev.transpose() * &dev;
    }
    within /= (n - g) as f64;

    let mut between = DMatrix::<f64>::zeros(q, q);
    for (a, size) in groups.sizes.iter().enumerate() {
        let dev = centroids.row(a).clone_owned();
        between += (*size as f64) * dev.transpose() * &dev;
    }
    between /= (g - 1) as f64;

    let chol = Cholesky::new(within).ok_or_else(|| {
        EngineError::singular(Stage::CanonicalVariates, "within-group scatter is not positive definite")
    })?;
    let l = chol.l();
    let m1 = l.solve_lower_triangular(&between).ok_or_else(|| {
        EngineError::singular(Stage::CanonicalVariates, "whitening of the between-group scatter failed")
    })?;
    let whitened = l.solve_lower_triangular(&m1.transpose()).ok_or_else(|| {
        EngineError::singular(Stage::CanonicalVariates, "whitening of the between-group scatter failed")
    })?;
    let sym = (&whitened + whitened.transpose()) * 0.5;
    let eig = SymmetricEigen::new(sym);

    let mut order : Vec<usize> = (0..q).collect();
    order.sort_by(|a, b| {
        eig.eigenvalues[*b].partial_cmp(&eig.eigenvalues[*a]).unwrap_or(std::cmp::Ordering::Equal)
    });
    let m = (g - 1).min(q);
    let eigenvalues = DVector::from_fn(m, |j, _| eig.eigenvalues[order[j]].max(0.0) );
    let u = DMatrix::from_fn(q, m, |i, j| eig.eigenvectors[(i, order[j])] );

    // back-transform out of the whitened frame: solve L^T a = u
    let axes = l.transpose().solve_upper_triangular(&u).ok_or_else(|| {
        EngineError::singular(Stage::CanonicalVariates, "back-transform of canonical axes failed")
    })?;
    Ok((eigenvalues, axes))
}

fn nearest_centroid(score : &RowDVector<f64>, centroids : &DMatrix<f64>) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for a in 0..centroids.nrows() {
        let dist = (score - centroids.row(a)).norm_squared();
        if dist < best_dist {
            best = a;
            best_dist = dist;
        }
    }
    best
}

fn cross_validate(data : &DMatrix<f64>, labels : &[String]) -> Result<CrossValidation, EngineError> {
    let n = data.nrows();
    let p = data.ncols();
    let mut classification = Vec::with_capacity(n);
    for held in 0..n {
        let rest = DMatrix::from_fn(n - 1, p, |i, j| {
            let src = if i < held { i } else { i + 1 };
            data[(src, j)]
        });
        let rest_labels : Vec<String> = labels.iter().enumerate()
            .filter(|(i, _)| *i != held )
            .map(|(_, l)| l.clone() )
            .collect();
        match cva_fit(&rest, &rest_labels) {
            Ok(model) => {
                let mut grand = RowDVector::zeros(p);
                for j in 0..p {
                    grand[j] = rest.column(j).mean();
                }
                let score = (data.row(held) - grand) * &model.axes;
                let assigned = nearest_centroid(&score, &model.centroids);
                classification.push(model.groups[assigned].clone());
            },
            Err(_) => {
                // leaving this object out starves its group; no honest
                // prediction is available
                classification.push(String::from("Unknown"));
            }
        }
    }
    let hits = classification.iter().zip(labels).filter(|(c, l)| c == l ).count();
    Ok(CrossValidation {
        classification,
        accuracy : 100.0 * hits as f64 / n as f64
    })
}

#[cfg(test)]
mod test {

    use super::*;

    fn noise(i : usize, j : usize) -> f64 {
        0.01 * (((i * 5 + j * 3) % 7) as f64 - 3.0)
    }

    fn two_group_data(separation : f64) -> (DMatrix<f64>, Vec<String>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..4 {
            rows.extend_from_slice(&[
                noise(i, 0), noise(i, 1),
                1.0 + noise(i, 2), 0.3 + noise(i, 3)
            ]);
            labels.push(String::from("a"));
        }
        for i in 4..8 {
            rows.extend_from_slice(&[
                separation + noise(i, 0), noise(i, 1),
                1.0 + noise(i, 2), 0.3 - separation + noise(i, 3)
            ]);
            labels.push(String::from("b"));
        }
        (DMatrix::from_row_slice(8, 4, &rows), labels)
    }

    #[test]
    fn single_group_is_rejected() {
        let (data, _) = two_group_data(1.0);
        let labels = vec![String::from("only"); 8];
        let err = cva(&data, &labels, &CvaOptions::default()).unwrap_err();
        match err {
            EngineError::Validation { stage, .. } => assert_eq!(stage, Stage::CanonicalVariates),
            other => panic!("expected validation error, got {:?}", other)
        }
    }

    #[test]
    fn separated_groups_classify_perfectly() {
        let (data, labels) = two_group_data(1.0);
        let out = cva(&data, &labels, &CvaOptions::default()).unwrap();
        assert_eq!(out.groups.len(), 2);
        assert!((out.accuracy - 100.0).abs() < 1e-9);
        assert_eq!(out.classification, labels);
        assert!(out.eigenvalues[0] > 1.0);
    }

    #[test]
    fn identical_group_means_give_null_eigenvalue() {
        // same four shapes in both groups: between-group scatter vanishes
        let block = [
            0.0, 0.0, 1.0, 0.3,
            0.1, 0.0, 0.9, 0.35,
            0.0, 0.1, 1.0, 0.25,
            -0.1, -0.1, 1.1, 0.3
        ];
        let mut rows = Vec::new();
        rows.extend_from_slice(&block);
        rows.extend_from_slice(&block);
        let data = DMatrix::from_row_slice(8, 4, &rows);
        let labels : Vec<String> = (0..8).map(|i| if i < 4 { "a" } else { "b" }.to_string() ).collect();
        let out = cva(&data, &labels, &CvaOptions::default()).unwrap();
        assert!(out.eigenvalues[0].abs() < 1e-8);
    }

    #[test]
    fn high_dimensional_input_reduces_automatically() {
        // P = 12 variables, N = 8 objects: full-space scatter is singular
        let (base, labels) = two_group_data(1.0);
        let data = DMatrix::from_fn(8, 12, |i, j| {
            if j < 4 { base[(i, j)] } else { 0.5 }
        });
        let out = cva(&data, &labels, &CvaOptions::default()).unwrap();
        assert!(out.reduced_to.is_some());
        assert_eq!(out.axes.nrows(), 12);
        assert!((out.accuracy - 100.0).abs() < 1e-9);
    }

    #[test]
    fn leave_one_out_on_separated_groups() {
        let (data, labels) = two_group_data(1.5);
        let out = cva(&data, &labels, &CvaOptions { leave_one_out : true }).unwrap();
        let cv = out.cross_validation.unwrap();
        assert_eq!(cv.classification.len(), 8);
        assert!(cv.accuracy > 70.0);
    }

}
