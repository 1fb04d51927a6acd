use anyhow::{bail, Error};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use traj_types::PseudotimeTable;
use trend_test::stat::{pearson, spearman};

/// Fewest cells defined in both vectors for a correlation to be reported
pub const MIN_COMPLETE: usize = 3;

/// Correlation coefficient used to compare pseudotimes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    /// linear correlation of the values
    Pearson,
    /// linear correlation of the ranks, ties averaged
    #[default]
    Spearman,
}

impl FromStr for CorrelationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pearson" => Ok(CorrelationMethod::Pearson),
            "spearman" => Ok(CorrelationMethod::Spearman),
            _ => bail!("correlation method not recognized: {}", s),
        }
    }
}

/// Pairwise correlations between the pseudotime methods of a table
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationMatrix {
    /// row and column labels
    pub methods: Vec<String>,
    /// correlations; NaN where too few cells are defined in both or one side is constant
    pub values: Array2<f64>,
    /// number of cells defined in both methods
    pub n_complete: Array2<usize>,
}

impl CorrelationMatrix {
    /// Correlation between two methods by name
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.methods.iter().position(|m| m == a)?;
        let j = self.methods.iter().position(|m| m == b)?;
        Some(self.values[[i, j]])
    }
}

/// Correlate every pair of pseudotimes in `table`, using only the cells where both are defined.
pub fn correlation_matrix(table: &PseudotimeTable, method: CorrelationMethod) -> CorrelationMatrix {
    let methods: Vec<String> = table.methods().into_iter().map(String::from).collect();
    let columns: Vec<_> = table.iter().map(|(_, p)| p).collect();
    let k = methods.len();

    let mut values = Array2::from_elem((k, k), f64::NAN);
    let mut n_complete = Array2::zeros((k, k));
    for i in 0..k {
        n_complete[[i, i]] = columns[i].n_defined();
        values[[i, i]] = 1.0;
        for j in (i + 1)..k {
            let (x, y): (Vec<f64>, Vec<f64>) = columns[i]
                .values()
                .iter()
                .zip(columns[j].values())
                .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
                .unzip();

            let r = if x.len() < MIN_COMPLETE {
                f64::NAN
            } else {
                match method {
                    CorrelationMethod::Pearson => pearson(&x, &y),
                    CorrelationMethod::Spearman => spearman(&x, &y),
                }
            };
            values[[i, j]] = r;
            values[[j, i]] = r;
            n_complete[[i, j]] = x.len();
            n_complete[[j, i]] = x.len();
        }
    }

    CorrelationMatrix {
        methods,
        values,
        n_complete,
    }
}
