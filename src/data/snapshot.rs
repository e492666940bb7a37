use super::{Dataset, LandmarkObject};
use crate::error::{EngineError, Stage};
use serde::{Serialize, Deserialize};

/// Read-only view of one dataset's objects, handed to the analysis
/// pipeline by the persistence layer. The engine never mutates a snapshot,
/// so independent analyses over the same snapshot may run concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub dataset_id : i64,
    pub dataset_name : String,
    pub dimension : usize,
    pub variable_names : Vec<String>,
    pub wireframe : Vec<(usize, usize)>,
    pub polygons : Vec<Vec<usize>>,
    pub baseline : Vec<usize>,

    /// Objects in sequence order.
    pub objects : Vec<LandmarkObject>
}

impl DatasetSnapshot {

    pub fn from_dataset(dataset : &Dataset, mut objects : Vec<LandmarkObject>) -> Self {
        objects.sort_by_key(|o| o.sequence );
        Self {
            dataset_id : dataset.id,
            dataset_name : dataset.name.clone(),
            dimension : dataset.dimension,
            variable_names : dataset.variable_names.clone(),
            wireframe : dataset.wireframe.clone(),
            polygons : dataset.polygons.clone(),
            baseline : dataset.baseline.clone(),
            objects
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Landmark count of the first object, if any. Consistency across
    /// objects is the pipeline's validation job.
    pub fn landmark_count(&self) -> Option<usize> {
        self.objects.first().map(|o| o.landmark_count() )
    }

    pub fn object_ids(&self) -> Vec<i64> {
        self.objects.iter().map(|o| o.id ).collect()
    }

    /// Group label of every object under the given variable. Objects
    /// without a value for that variable are labelled "Unknown", matching
    /// the grouping convention of the hosting application.
    pub fn group_labels(&self, variable : usize) -> Vec<String> {
        self.objects.iter().map(|o| {
            o.variables.get(variable)
                .map(|v| v.label() )
                .unwrap_or_else(|| String::from("Unknown") )
        }).collect()
    }

    /// Continuous covariate values for every object under the given
    /// variable. Fails listing the objects whose value is absent or not
    /// interpretable as a number.
    pub fn covariate(&self, variable : usize) -> Result<Vec<f64>, EngineError> {
        let mut values = Vec::with_capacity(self.objects.len());
        let mut bad = Vec::new();
        for obj in &self.objects {
            match obj.variables.get(variable).and_then(|v| v.as_continuous() ) {
                Some(v) => values.push(v),
                None => bad.push(obj.id)
            }
        }
        if !bad.is_empty() {
            return Err(EngineError::validation_for(
                Stage::Validation,
                format!("variable {} is not continuous for every object", variable),
                bad
            ));
        }
        Ok(values)
    }

}

#[cfg(test)]
mod test {

    use super::*;
    use crate::data::VariableValue;
    use nalgebra::DMatrix;

    fn snapshot_with_vars() -> DatasetSnapshot {
        let mut dataset = Dataset::new(1, "ds", 2);
        dataset.variable_names = vec![String::from("sex"), String::from("size")];
        let lms = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        let mut objects = Vec::new();
        for i in 0..3 {
            let mut obj = LandmarkObject::new(i as i64, 1, format!("obj{}", i), lms.clone());
            obj.sequence = 2 - i;
            obj.variables = vec![
                VariableValue::Categorical(if i == 0 { "m" } else { "f" }.to_string()),
                VariableValue::Continuous(i as f64)
            ];
            objects.push(obj);
        }
        DatasetSnapshot::from_dataset(&dataset, objects)
    }

    #[test]
    fn orders_by_sequence() {
        let snap = snapshot_with_vars();
        assert_eq!(snap.object_ids(), vec![2, 1, 0]);
    }

    #[test]
    fn labels_and_covariates() {
        let snap = snapshot_with_vars();
        assert_eq!(snap.group_labels(0), vec!["f", "f", "m"]);
        assert_eq!(snap.covariate(1).unwrap(), vec![2.0, 1.0, 0.0]);
        assert!(snap.covariate(0).is_err());
        assert_eq!(snap.group_labels(5), vec!["Unknown"; 3]);
    }

}
