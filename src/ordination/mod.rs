use nalgebra::*;

mod pca;

pub use pca::*;

mod cva;

pub use cva::*;

mod manova;

pub use manova::*;

/// Flattens aligned K x D configurations into the N x P data matrix
/// (P = K * D) consumed by the multivariate stages; row i holds object i's
/// landmarks in landmark-major order (x1, y1[, z1], x2, ...).
pub fn flatten(coords : &[DMatrix<f64>]) -> DMatrix<f64> {
    let n = coords.len();
    let (k, d) = (coords[0].nrows(), coords[0].ncols());
    DMatrix::from_fn(n, k * d, |i, j| coords[i][(j / d, j % d)] )
}

/// Subtracts the column means; returns the centered matrix and the mean
/// row vector.
pub(crate) fn center_columns(data : &DMatrix<f64>) -> (DMatrix<f64>, RowDVector<f64>) {
    let mut mean = RowDVector::zeros(data.ncols());
    for j in 0..data.ncols() {
        mean[j] = data.column(j).mean();
    }
    let mut centered = data.clone();
    for mut row in centered.row_iter_mut() {
        row -= &mean;
    }
    (centered, mean)
}

/// Partition of objects into groups by label, preserving first-appearance
/// order of the labels.
#[derive(Debug, Clone)]
pub(crate) struct GroupIndex {
    pub groups : Vec<String>,
    pub assignment : Vec<usize>,
    pub sizes : Vec<usize>
}

impl GroupIndex {

    pub fn new(labels : &[String]) -> Self {
        let mut groups : Vec<String> = Vec::new();
        let mut assignment = Vec::with_capacity(labels.len());
        for label in labels {
            let pos = match groups.iter().position(|g| g == label ) {
                Some(pos) => pos,
                None => {
                    groups.push(label.clone());
                    groups.len() - 1
                }
            };
            assignment.push(pos);
        }
        let mut sizes = vec![0; groups.len()];
        for a in &assignment {
            sizes[*a] += 1;
        }
        Self { groups, assignment, sizes }
    }

    pub fn count(&self) -> usize {
        self.groups.len()
    }

    /// Mean row of every group, stacked into a g x P matrix.
    pub fn centroids(&self, data : &DMatrix<f64>) -> DMatrix<f64> {
        let mut means = DMatrix::zeros(self.count(), data.ncols());
        for (i, a) in self.assignment.iter().enumerate() {
            let scaled = data.row(i) / self.sizes[*a] as f64;
            let mut target = means.row_mut(*a);
            target += scaled;
        }
        means
    }

}
