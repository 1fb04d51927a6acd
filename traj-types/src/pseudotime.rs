use anyhow::{bail, Error};
use std::collections::btree_map::{self, BTreeMap};

/// One pseudotime estimate per cell. `None` marks a cell the method could not place,
/// e.g. one that is not reachable from the root in the diffusion graph.
#[derive(Clone, Debug, PartialEq)]
pub struct Pseudotime {
    values: Vec<Option<f64>>,
}

impl Pseudotime {
    /// Wrap per-cell values. Non-finite values are stored as undefined.
    pub fn new(values: Vec<Option<f64>>) -> Pseudotime {
        Pseudotime {
            values: values.into_iter().map(|v| v.filter(|x| x.is_finite())).collect(),
        }
    }

    /// Wrap a fully defined vector. NaN or infinite entries become undefined.
    pub fn from_values(values: &[f64]) -> Pseudotime {
        Pseudotime::new(values.iter().map(|&v| Some(v)).collect())
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the vector has no cells
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of `cell`, None if undefined
    pub fn get(&self, cell: usize) -> Option<f64> {
        self.values[cell]
    }

    /// All values, in cell order
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Number of cells with a defined value
    pub fn n_defined(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Indices of cells with a defined value
    pub fn defined_indices(&self) -> Vec<usize> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|_| i))
            .collect()
    }

    /// 1-based ranks of the defined cells. Ties keep input order (stable sort), so
    /// the ranks only depend on the ordering of the values, not their scale.
    pub fn ordinal_ranks(&self) -> Pseudotime {
        let mut defined: Vec<(usize, f64)> = self.values.iter().enumerate().filter_map(|(i, v)| v.map(|x| (i, x))).collect();
        defined.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut ranks = vec![None; self.values.len()];
        for (rank, (cell, _)) in defined.into_iter().enumerate() {
            ranks[cell] = Some((rank + 1) as f64);
        }
        Pseudotime { values: ranks }
    }

    /// Same cells with the axis reversed (`x -> -x`).
    pub fn reversed(&self) -> Pseudotime {
        Pseudotime {
            values: self.values.iter().map(|v| v.map(|x| -x)).collect(),
        }
    }
}

/// Pseudotime vectors keyed by method name. Vectors are added, never replaced,
/// and all cover the same cells.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PseudotimeTable {
    n_cells: Option<usize>,
    columns: BTreeMap<String, Pseudotime>,
}

impl PseudotimeTable {
    /// Empty table that will accept vectors of any (common) length
    pub fn new() -> PseudotimeTable {
        PseudotimeTable::default()
    }

    /// Empty table for `n_cells` cells
    pub fn with_cells(n_cells: usize) -> PseudotimeTable {
        PseudotimeTable {
            n_cells: Some(n_cells),
            columns: BTreeMap::new(),
        }
    }

    /// Add the pseudotime of `method`. Fails if the method is already present or if
    /// the vector length differs from the table's cell count.
    pub fn insert(&mut self, method: impl Into<String>, pseudotime: Pseudotime) -> Result<(), Error> {
        let method = method.into();
        if let Some(n) = self.n_cells {
            if pseudotime.len() != n {
                bail!(
                    "pseudotime '{}' covers {} cells, expected {}",
                    method,
                    pseudotime.len(),
                    n
                );
            }
        }
        match self.columns.entry(method) {
            btree_map::Entry::Occupied(e) => bail!("pseudotime '{}' is already present", e.key()),
            btree_map::Entry::Vacant(e) => {
                self.n_cells = Some(pseudotime.len());
                e.insert(pseudotime);
            }
        }
        Ok(())
    }

    /// Add every column of `other`.
    pub fn extend(&mut self, other: PseudotimeTable) -> Result<(), Error> {
        for (method, pseudotime) in other.columns {
            self.insert(method, pseudotime)?;
        }
        Ok(())
    }

    /// Pseudotime of `method`
    pub fn get(&self, method: &str) -> Option<&Pseudotime> {
        self.columns.get(method)
    }

    /// Method names, sorted
    pub fn methods(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    /// (method, pseudotime) pairs, sorted by method
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Pseudotime)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of cells covered, if any vector has been added or the size was fixed
    pub fn n_cells(&self) -> Option<usize> {
        self.n_cells
    }

    /// Number of methods
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True if no method has been added
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
