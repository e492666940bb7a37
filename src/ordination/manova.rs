use super::{center_columns, GroupIndex, PrincipalComponents};
use crate::calc::f_survival;
use crate::error::{EngineError, Stage};
use log::{debug, warn};
use nalgebra::*;
use serde::{Serialize, Deserialize};

/// One multivariate test of equal group mean shapes, with its
/// F approximation and significance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStatistic {
    pub name : String,
    pub value : f64,
    pub f_statistic : f64,
    pub df_num : f64,
    pub df_den : f64,
    pub p_value : f64
}

/// MANOVA over aligned (optionally PCA-reduced) shapes: Wilks' lambda,
/// Pillai's trace, Hotelling-Lawley trace and Roy's greatest root, each
/// converted to an F approximation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manova {
    pub statistics : Vec<TestStatistic>,
    pub groups : Vec<String>,
    pub group_sizes : Vec<usize>,
    pub observations : usize,

    /// Dimensionality the test was computed in (after any reduction).
    pub variables : usize,

    /// Number of leading principal components used, when the error
    /// scatter was not invertible in the full space.
    pub reduced_to : Option<usize>
}

/// Tests whether group mean shapes differ. The error scatter must be
/// invertible, which requires more residual degrees of freedom than
/// variables; when the full space fails that, the shapes are projected
/// onto leading principal components first, and a `Singular` error
/// surfaces only if the reduced system is still degenerate.
pub fn manova(data : &DMatrix<f64>, labels : &[String]) -> Result<Manova, EngineError> {
    let n = data.nrows();
    let p = data.ncols();
    let groups = GroupIndex::new(labels);
    validate_groups(&groups, n)?;
    let g = groups.count();

    // residual df must exceed the dimensionality for E to be invertible
    let needs_reduction = p >= n - g + 1;
    let (working, reduced_to) = if needs_reduction {
        let reduced = reduce(data, n - g)?;
        let r = reduced.ncols();
        debug!("manova: {} variables reduced to {} principal components", p, r);
        (reduced, Some(r))
    } else {
        (data.clone(), None)
    };

    let eigenvalues = match scatter_eigenvalues(&working, &groups) {
        Ok(vals) => vals,
        Err(err) => {
            if reduced_to.is_some() {
                return Err(err);
            }
            warn!("manova: error scatter singular in the full space, retrying on principal components");
            let reduced = reduce(data, n - g)?;
            let vals = scatter_eigenvalues(&reduced, &groups)?;
            return assemble(vals, groups, n, reduced.ncols(), Some(reduced.ncols()));
        }
    };
    let variables = working.ncols();
    assemble(eigenvalues, groups, n, variables, reduced_to)
}

fn validate_groups(groups : &GroupIndex, n : usize) -> Result<(), EngineError> {
    if groups.count() < 2 {
        return Err(EngineError::validation(
            Stage::GroupComparison,
            format!("grouping variable yields {} group(s); at least 2 are required", groups.count())
        ));
    }
    if let Some(pos) = groups.sizes.iter().position(|s| *s < 2 ) {
        return Err(EngineError::validation(
            Stage::GroupComparison,
            format!("group '{}' has fewer than 2 members", groups.groups[pos])
        ));
    }
    if n <= groups.count() + 1 {
        return Err(EngineError::validation(
            Stage::GroupComparison,
            "not enough residual degrees of freedom to test group means"
        ));
    }
    Ok(())
}

fn reduce(data : &DMatrix<f64>, residual_df : usize) -> Result<DMatrix<f64>, EngineError> {
    let pca = PrincipalComponents::fit(data, 1)?;
    if pca.axis_count() == 0 {
        return Err(EngineError::singular(
            Stage::GroupComparison,
            "shapes have no variance to test"
        ));
    }
    let keep = pca.axis_count().min(residual_df.saturating_sub(1)).max(1);
    Ok(pca.scores.columns(0, keep).into())
}

/// Eigenvalues of E^-1 H, where H is the between-group (hypothesis) and E
/// the within-group (error) sum-of-squares scatter.
fn scatter_eigenvalues(data : &DMatrix<f64>, groups : &GroupIndex) -> Result<Vec<f64>, EngineError> {
    let q = data.ncols();
    let (centered, _) = center_columns(data);
    let centroids = groups.centroids(&centered);

    let mut error = DMatrix::<f64>::zeros(q, q);
    for (i, a) in groups.assignment.iter().enumerate() {
        let dev = centered.row(i) - centroids.row(*a);
        error += dev.transpose() * &dev;
    }
    let mut hypothesis = DMatrix::<f64>::zeros(q, q);
    for (a, size) in groups.sizes.iter().enumerate() {
        let dev = centroids.row(a).clone_owned();
        hypothesis += (*size as f64) * dev.transpose() * &dev;
    }

    let chol = Cholesky::new(error).ok_or_else(|| {
        EngineError::singular(Stage::GroupComparison, "error scatter is not positive definite")
    })?;
    let l = chol.l();
    let m1 = l.solve_lower_triangular(&hypothesis).ok_or_else(|| {
        EngineError::singular(Stage::GroupComparison, "whitening of the hypothesis scatter failed")
    })?;
    let whitened = l.solve_lower_triangular(&m1.transpose()).ok_or_else(|| {
        EngineError::singular(Stage::GroupComparison, "whitening of the hypothesis scatter failed")
    })?;
    let sym = (&whitened + whitened.transpose()) * 0.5;
    let eig = SymmetricEigen::new(sym);
    let mut vals : Vec<f64> = eig.eigenvalues.iter().map(|v| v.max(0.0) ).collect();
    vals.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal) );
    Ok(vals)
}

fn assemble(
    eigenvalues : Vec<f64>,
    groups : GroupIndex,
    n : usize,
    p : usize,
    reduced_to : Option<usize>
) -> Result<Manova, EngineError> {
    let g = groups.count();
    let df_h = (g - 1) as f64;
    let df_e = (n - g) as f64;
    let p_f = p as f64;
    let n_f = n as f64;
    let g_f = g as f64;

    let mut statistics = Vec::with_capacity(4);

    // Wilks' lambda with Rao's F approximation
    let wilks : f64 = eigenvalues.iter().map(|l| 1.0 / (1.0 + l) ).product();
    {
        let denom = p_f * p_f + df_h * df_h - 5.0;
        let t = if denom > 0.0 {
            ((p_f * p_f * df_h * df_h - 4.0) / denom).sqrt()
        } else {
            1.0
        };
        let w = n_f - 1.0 - (p_f + g_f) / 2.0;
        let df_num = p_f * df_h;
        let df_den = w * t - (p_f * df_h - 2.0) / 2.0;
        let (f, p_value) = if df_den > 0.0 && wilks > 0.0 {
            let root = wilks.powf(1.0 / t);
            let f = (1.0 - root) / root * df_den / df_num;
            (f, f_survival(f, df_num, df_den))
        } else {
            (0.0, 1.0)
        };
        statistics.push(TestStatistic {
            name : String::from("Wilks' lambda"),
            value : wilks,
            f_statistic : f,
            df_num,
            df_den,
            p_value
        });
    }

    let s = df_h.min(p_f);
    let m = ((p_f - df_h).abs() - 1.0) / 2.0;
    let nn = (df_e - p_f - 1.0) / 2.0;

    // Pillai's trace
    let pillai : f64 = eigenvalues.iter().map(|l| l / (1.0 + l) ).sum();
    {
        let df_num = s * (2.0 * m + s + 1.0);
        let df_den = s * (2.0 * nn + s + 1.0);
        let (f, p_value) = if df_den > 0.0 && (s - pillai) > 1e-12 {
            let f = (pillai / (s - pillai)) * ((2.0 * nn + s + 1.0) / (2.0 * m + s + 1.0));
            (f, f_survival(f, df_num, df_den))
        } else {
            (0.0, 1.0)
        };
        statistics.push(TestStatistic {
            name : String::from("Pillai's trace"),
            value : pillai,
            f_statistic : f,
            df_num,
            df_den,
            p_value
        });
    }

    // Hotelling-Lawley trace
    let hotelling : f64 = eigenvalues.iter().sum();
    {
        let df_num = s * (2.0 * m + s + 1.0);
        let df_den = 2.0 * (s * nn + 1.0);
        let (f, p_value) = if df_den > 0.0 && df_num > 0.0 {
            let f = hotelling * df_den / (s * df_num);
            (f, f_survival(f, df_num, df_den))
        } else {
            (0.0, 1.0)
        };
        statistics.push(TestStatistic {
            name : String::from("Hotelling-Lawley trace"),
            value : hotelling,
            f_statistic : f,
            df_num,
            df_den,
            p_value
        });
    }

    // Roy's greatest root (upper-bound F)
    let roy = eigenvalues.first().cloned().unwrap_or(0.0);
    {
        let r = p_f.max(df_h);
        let df_num = r;
        let df_den = df_e - r + df_h;
        let (f, p_value) = if df_den > 0.0 {
            let f = roy * df_den / df_num;
            (f, f_survival(f, df_num, df_den))
        } else {
            (0.0, 1.0)
        };
        statistics.push(TestStatistic {
            name : String::from("Roy's greatest root"),
            value : roy,
            f_statistic : f,
            df_num,
            df_den,
            p_value
        });
    }

    Ok(Manova {
        statistics,
        groups : groups.groups,
        group_sizes : groups.sizes,
        observations : n,
        variables : p,
        reduced_to
    })
}
