use nalgebra::*;
use serde::{Serialize, Deserialize};

/// Value of a per-object variable, used as a grouping factor (categorical)
/// or as a regression covariate (continuous).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VariableValue {
    Categorical(String),
    Continuous(f64)
}

impl VariableValue {

    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            VariableValue::Continuous(v) => Some(*v),
            VariableValue::Categorical(s) => s.parse::<f64>().ok()
        }
    }

    /// Label used when the value partitions objects into groups.
    pub fn label(&self) -> String {
        match self {
            VariableValue::Categorical(s) => s.clone(),
            VariableValue::Continuous(v) => v.to_string()
        }
    }

}

/// A single specimen: an ordered landmark configuration (one row per
/// landmark) with its per-landmark missing flags and its variable values.
/// Objects are created by importers or edit dialogs; for the duration of
/// an analysis they are read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandmarkObject {
    pub id : i64,
    pub dataset : i64,
    pub name : String,

    /// Display/storage order within the dataset.
    pub sequence : usize,

    /// K x D coordinate matrix (K landmarks in D dimensions).
    pub landmarks : DMatrix<f64>,

    /// One flag per landmark; a flagged landmark's coordinates are
    /// placeholders and the object must be excluded from superimposition.
    pub missing : Vec<bool>,

    pub variables : Vec<VariableValue>
}

impl LandmarkObject {

    pub fn new(id : i64, dataset : i64, name : impl Into<String>, landmarks : DMatrix<f64>) -> Self {
        let k = landmarks.nrows();
        Self {
            id,
            dataset,
            name : name.into(),
            sequence : 0,
            landmarks,
            missing : vec![false; k],
            variables : Vec::new()
        }
    }

    pub fn landmark_count(&self) -> usize {
        self.landmarks.nrows()
    }

    pub fn dimension(&self) -> usize {
        self.landmarks.ncols()
    }

    pub fn has_missing(&self) -> bool {
        self.missing.iter().any(|m| *m )
    }

    /// Centroid of the landmark configuration.
    pub fn centroid(&self) -> RowDVector<f64> {
        let k = self.landmarks.nrows() as f64;
        let mut c = RowDVector::zeros(self.landmarks.ncols());
        for row in self.landmarks.row_iter() {
            c += row;
        }
        c / k
    }

    /// Root sum of squared landmark-to-centroid distances; the scale
    /// measure removed during superimposition.
    pub fn centroid_size(&self) -> f64 {
        let c = self.centroid();
        let mut ss = 0.0;
        for row in self.landmarks.row_iter() {
            ss += (row - &c).norm_squared();
        }
        ss.sqrt()
    }

}

#[cfg(test)]
mod test {

    use super::*;

    const EPS : f64 = 1e-9;

    #[test]
    fn centroid_size_of_unit_square() {
        let lms = DMatrix::from_row_slice(4, 2, &[
            0.0, 0.0,
            1.0, 0.0,
            1.0, 1.0,
            0.0, 1.0
        ]);
        let obj = LandmarkObject::new(1, 1, "square", lms);
        let c = obj.centroid();
        assert!((c[0] - 0.5).abs() < EPS && (c[1] - 0.5).abs() < EPS);
        // four landmarks at squared distance 0.5 from the centroid
        assert!((obj.centroid_size() - 2f64.sqrt()).abs() < EPS);
    }

    #[test]
    fn continuous_parse() {
        assert_eq!(VariableValue::Categorical("1.5".into()).as_continuous(), Some(1.5));
        assert_eq!(VariableValue::Categorical("male".into()).as_continuous(), None);
        assert_eq!(VariableValue::Continuous(2.0).label(), "2");
    }

}
