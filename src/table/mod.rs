use crate::ordination::{CanonicalVariates, Manova, PrincipalComponents};
use crate::regress::ShapeRegression;
use anyhow::Context;
use nalgebra::*;
use serde::{Serialize, Deserialize};
use std::path::Path;

/// A rectangular table destined for CSV export: a header row and
/// stringified data rows, already in display precision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub header : Vec<String>,
    pub rows : Vec<Vec<String>>
}

impl Table {

    /// Writes the table to any CSV destination; rows shorter or longer
    /// than the header are a construction bug, so the writer's field-count
    /// check is left enabled.
    pub fn write_csv<W : std::io::Write>(&self, out : W) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save(&self, path : impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()) )?;
        self.write_csv(file)
    }

}

fn fmt(v : f64) -> String {
    format!("{:.6}", v)
}

/// Names the flattened-coordinate columns the way landmark data is
/// conventionally labelled: LM1_X, LM1_Y[, LM1_Z], LM2_X, ...
fn coordinate_columns(landmark_count : usize, dimension : usize) -> Vec<String> {
    let axes = ["X", "Y", "Z"];
    let mut cols = Vec::with_capacity(landmark_count * dimension);
    for l in 0..landmark_count {
        for axis in axes.iter().take(dimension) {
            cols.push(format!("LM{}_{}", l + 1, axis));
        }
    }
    cols
}

/// Per-object PCA score table, one row per object and one column per
/// retained axis.
pub fn pca_score_table(pca : &PrincipalComponents, names : &[String]) -> Table {
    score_table(&pca.scores, names, "PC")
}

/// Per-object CVA score table, with the group label alongside the scores.
pub fn cva_score_table(cva : &CanonicalVariates, names : &[String], labels : &[String]) -> Table {
    let mut table = score_table(&cva.scores, names, "CV");
    table.header.insert(1, String::from("Group"));
    for (row, label) in table.rows.iter_mut().zip(labels) {
        row.insert(1, label.clone());
    }
    table
}

fn score_table(scores : &DMatrix<f64>, names : &[String], prefix : &str) -> Table {
    let mut header = vec![String::from("Object")];
    for j in 0..scores.ncols() {
        header.push(format!("{}{}", prefix, j + 1));
    }
    let rows = names.iter().enumerate().map(|(i, name)| {
        let mut row = vec![name.clone()];
        row.extend(scores.row(i).iter().map(|v| fmt(*v) ));
        row
    }).collect();
    Table { header, rows }
}

/// Eigenvalue table of a PCA: one row per axis with its explained and
/// cumulative variance shares.
pub fn eigenvalue_table(pca : &PrincipalComponents) -> Table {
    let header = ["Axis", "Eigenvalue", "Proportion", "Cumulative"]
        .iter().map(|s| s.to_string() ).collect();
    let rows = (0..pca.axis_count()).map(|j| {
        vec![
            format!("PC{}", j + 1),
            fmt(pca.eigenvalues[j]),
            fmt(pca.variance_ratio[j]),
            fmt(pca.cumulative_ratio[j])
        ]
    }).collect();
    Table { header, rows }
}

/// Regression coefficient table: one row per polynomial term, one column
/// per landmark coordinate.
pub fn coefficient_table(reg : &ShapeRegression) -> Table {
    let p = reg.coefficients.ncols();
    let k = p / reg.dimension;
    let mut header = vec![String::from("Term")];
    header.extend(coordinate_columns(k, reg.dimension));
    let rows = (0..reg.coefficients.nrows()).map(|i| {
        let term = if i == 0 {
            String::from("Intercept")
        } else if i == 1 {
            String::from("x")
        } else {
            format!("x^{}", i)
        };
        let mut row = vec![term];
        row.extend(reg.coefficients.row(i).iter().map(|v| fmt(*v) ));
        row
    }).collect();
    Table { header, rows }
}

/// MANOVA summary table: one row per test statistic.
pub fn manova_table(test : &Manova) -> Table {
    let header = ["Statistic", "Value", "F", "df1", "df2", "p"]
        .iter().map(|s| s.to_string() ).collect();
    let rows = test.statistics.iter().map(|s| {
        vec![
            s.name.clone(),
            fmt(s.value),
            fmt(s.f_statistic),
            fmt(s.df_num),
            fmt(s.df_den),
            fmt(s.p_value)
        ]
    }).collect();
    Table { header, rows }
}

/// Aligned-coordinate table: one row per object with its flattened
/// landmark coordinates, prefixed by the object name.
pub fn coordinate_table(coords : &[DMatrix<f64>], names : &[String]) -> Table {
    let (k, d) = (coords[0].nrows(), coords[0].ncols());
    let mut header = vec![String::from("Object")];
    header.extend(coordinate_columns(k, d));
    let rows = names.iter().zip(coords).map(|(name, c)| {
        let mut row = vec![name.clone()];
        for l in 0..k {
            for j in 0..d {
                row.push(fmt(c[(l, j)]));
            }
        }
        row
    }).collect();
    Table { header, rows }
}
