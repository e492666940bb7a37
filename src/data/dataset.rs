use crate::error::{EngineError, Stage};
use serde::{Serialize, Deserialize};
use std::collections::HashMap;

/// A named collection of landmark objects sharing a landmark scheme.
/// Datasets form a tree: a node carries its parent identifier and the
/// ordered list of its children, and traversal is always explicit.
/// The wireframe, polygon and baseline fields describe the landmark
/// scheme for downstream viewers and for baseline registration; they do
/// not affect the landmark coordinates themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id : i64,
    pub name : String,

    /// Either 2 or 3.
    pub dimension : usize,

    pub parent : Option<i64>,
    pub children : Vec<i64>,

    /// Landmark index pairs joined by an edge when the shape is drawn.
    pub wireframe : Vec<(usize, usize)>,

    /// Landmark index cycles describing filled polygons.
    pub polygons : Vec<Vec<usize>>,

    /// Landmark indices of the registration baseline (two in 2D; a third
    /// one, when present, pins the rolling plane in 3D).
    pub baseline : Vec<usize>,

    /// Ordered names of the per-object variables.
    pub variable_names : Vec<String>
}

impl Dataset {

    pub fn new(id : i64, name : impl Into<String>, dimension : usize) -> Self {
        Self {
            id,
            name : name.into(),
            dimension,
            parent : None,
            children : Vec::new(),
            wireframe : Vec::new(),
            polygons : Vec::new(),
            baseline : Vec::new(),
            variable_names : Vec::new()
        }
    }

}

/// Arena holding a forest of datasets, indexed by identifier. Parent and
/// child links are kept consistent on insertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetTree {
    nodes : Vec<Dataset>,

    #[serde(skip)]
    index : HashMap<i64, usize>
}

impl DatasetTree {

    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a dataset, wiring it into its parent's child list. Fails if
    /// the identifier is already present or the named parent is unknown.
    pub fn insert(&mut self, dataset : Dataset) -> Result<(), EngineError> {
        if self.index.contains_key(&dataset.id) {
            return Err(EngineError::validation(
                Stage::Validation,
                format!("duplicate dataset identifier {}", dataset.id)
            ));
        }
        if let Some(parent) = dataset.parent {
            let pos = *self.index.get(&parent).ok_or_else(|| EngineError::validation(
                Stage::Validation,
                format!("unknown parent dataset {}", parent)
            ))?;
            self.nodes[pos].children.push(dataset.id);
        }
        self.index.insert(dataset.id, self.nodes.len());
        self.nodes.push(dataset);
        Ok(())
    }

    pub fn get(&self, id : i64) -> Option<&Dataset> {
        self.index.get(&id).map(|pos| &self.nodes[*pos] )
    }

    /// Identifiers of the datasets without a parent, in insertion order.
    pub fn roots(&self) -> Vec<i64> {
        self.nodes.iter().filter(|n| n.parent.is_none() ).map(|n| n.id ).collect()
    }

    /// Walks from the dataset up to its root, excluding the dataset itself.
    pub fn ancestors(&self, id : i64) -> Vec<&Dataset> {
        let mut out = Vec::new();
        let mut cur = self.get(id).and_then(|d| d.parent );
        while let Some(pid) = cur {
            match self.get(pid) {
                Some(parent) => {
                    out.push(parent);
                    cur = parent.parent;
                },
                None => break
            }
        }
        out
    }

    /// Pre-order traversal of the subtree rooted at the dataset, including
    /// the dataset itself, children visited in their stored order.
    pub fn descendants(&self, id : i64) -> Vec<&Dataset> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.get(cur) {
                out.push(node);
                for child in node.children.iter().rev() {
                    stack.push(*child);
                }
            }
        }
        out
    }

    /// Rebuilds the id index, required after deserialization.
    pub fn reindex(&mut self) {
        self.index = self.nodes.iter().enumerate().map(|(i, n)| (n.id, i) ).collect();
    }

}

#[cfg(test)]
mod test {

    use super::*;

    fn sample_tree() -> DatasetTree {
        let mut tree = DatasetTree::new();
        tree.insert(Dataset::new(1, "all", 2)).unwrap();
        let mut a = Dataset::new(2, "left", 2);
        a.parent = Some(1);
        tree.insert(a).unwrap();
        let mut b = Dataset::new(3, "right", 2);
        b.parent = Some(1);
        tree.insert(b).unwrap();
        let mut c = Dataset::new(4, "right-child", 2);
        c.parent = Some(3);
        tree.insert(c).unwrap();
        tree
    }

    #[test]
    fn traversal() {
        let tree = sample_tree();
        assert_eq!(tree.roots(), vec![1]);
        let desc : Vec<i64> = tree.descendants(1).iter().map(|d| d.id ).collect();
        assert_eq!(desc, vec![1, 2, 3, 4]);
        let anc : Vec<i64> = tree.ancestors(4).iter().map(|d| d.id ).collect();
        assert_eq!(anc, vec![3, 1]);
    }

    #[test]
    fn rejects_unknown_parent() {
        let mut tree = DatasetTree::new();
        let mut orphan = Dataset::new(7, "orphan", 2);
        orphan.parent = Some(99);
        assert!(tree.insert(orphan).is_err());
    }

    #[test]
    fn rejects_duplicate_id() {
        let mut tree = sample_tree();
        assert!(tree.insert(Dataset::new(1, "again", 2)).is_err());
    }

}
