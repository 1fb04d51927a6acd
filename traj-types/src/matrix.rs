use crate::stage::StageLabels;
use anyhow::{bail, ensure, format_err, Error};
use ndarray::{Array2, ArrayView2, Axis};
use std::collections::{HashMap, HashSet};

/// Dense expression matrix: rows are genes, columns are cells.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpressionMatrix {
    /// Name of the matrix, usually the input file
    pub name: String,
    genes: Vec<String>,
    cells: Vec<String>,
    values: Array2<f64>,
}

fn check_unique(names: &[String], what: &str) -> Result<(), Error> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            bail!("duplicate {} name '{}'", what, name);
        }
    }
    Ok(())
}

impl ExpressionMatrix {
    /// Wrap a genes x cells matrix. All values must be finite.
    pub fn new(
        name: impl Into<String>,
        genes: Vec<String>,
        cells: Vec<String>,
        values: Array2<f64>,
    ) -> Result<ExpressionMatrix, Error> {
        let (n_genes, n_cells) = values.dim();
        ensure!(
            genes.len() == n_genes,
            "matrix has {} rows but {} gene names were given",
            n_genes,
            genes.len()
        );
        ensure!(
            cells.len() == n_cells,
            "matrix has {} columns but {} cell ids were given",
            n_cells,
            cells.len()
        );
        check_unique(&genes, "gene")?;
        check_unique(&cells, "cell")?;
        if let Some(((g, c), v)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
            bail!("non-finite value {} for gene '{}' in cell '{}'", v, genes[g], cells[c]);
        }
        Ok(ExpressionMatrix {
            name: name.into(),
            genes,
            cells,
            values,
        })
    }

    /// Wrap a matrix of log-transformed counts, which additionally must not contain negative values.
    pub fn new_log_expression(
        name: impl Into<String>,
        genes: Vec<String>,
        cells: Vec<String>,
        values: Array2<f64>,
    ) -> Result<ExpressionMatrix, Error> {
        let matrix = ExpressionMatrix::new(name, genes, cells, values)?;
        matrix.check_log_expression()?;
        Ok(matrix)
    }

    /// Fail on the first negative value: log expression of counts is never below 0.
    pub fn check_log_expression(&self) -> Result<(), Error> {
        if let Some(((g, c), v)) = self.values.indexed_iter().find(|(_, &v)| v < 0.0) {
            bail!(
                "negative log expression {} for gene '{}' in cell '{}'",
                v,
                self.genes[g],
                self.cells[c]
            );
        }
        Ok(())
    }

    /// Number of genes (rows)
    pub fn n_genes(&self) -> usize {
        self.values.nrows()
    }

    /// Number of cells (columns)
    pub fn n_cells(&self) -> usize {
        self.values.ncols()
    }

    /// Gene names, in row order
    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    /// Cell ids, in column order
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    /// The genes x cells values
    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// The same values as a cells x genes view, the layout used by embeddings
    pub fn cells_by_genes(&self) -> ArrayView2<'_, f64> {
        self.values.t()
    }

    /// Row of the gene called `gene`
    pub fn gene_index(&self, gene: &str) -> Option<usize> {
        self.genes.iter().position(|g| g == gene)
    }

    /// Column of the cell called `cell`
    pub fn cell_index(&self, cell: &str) -> Option<usize> {
        self.cells.iter().position(|c| c == cell)
    }

    /// Read-only subset of genes, in the order given
    pub fn select_genes(&self, rows: &[usize]) -> Result<ExpressionMatrix, Error> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.n_genes()) {
            bail!("gene row {} out of range for {} genes", bad, self.n_genes());
        }
        Ok(ExpressionMatrix {
            name: self.name.clone(),
            genes: rows.iter().map(|&r| self.genes[r].clone()).collect(),
            cells: self.cells.clone(),
            values: self.values.select(Axis(0), rows),
        })
    }

    /// Same genes and cells with new values, e.g. after normalization.
    pub fn with_values(&self, values: Array2<f64>) -> Result<ExpressionMatrix, Error> {
        ensure!(
            values.dim() == self.values.dim(),
            "replacement values have shape {:?}, expected {:?}",
            values.dim(),
            self.values.dim()
        );
        ExpressionMatrix::new(self.name.clone(), self.genes.clone(), self.cells.clone(), values)
    }
}

/// Per-cell annotation. Row order matches the column order of the expression matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct CellMetadata {
    cells: Vec<String>,
    stages: StageLabels,
}

impl CellMetadata {
    /// Pair cell ids with their stage labels.
    pub fn new(cells: Vec<String>, stages: StageLabels) -> Result<CellMetadata, Error> {
        ensure!(
            cells.len() == stages.len(),
            "metadata has {} cell ids but {} stage labels",
            cells.len(),
            stages.len()
        );
        check_unique(&cells, "cell")?;
        Ok(CellMetadata { cells, stages })
    }

    /// Cell ids, in row order
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    /// Stage labels, in row order
    pub fn stages(&self) -> &StageLabels {
        &self.stages
    }

    /// Number of annotated cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if there are no annotated cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Reorder rows so that they follow `order`. Every id in `order` must be present.
    pub fn reorder(&self, order: &[String]) -> Result<CellMetadata, Error> {
        let index: HashMap<&str, usize> = self.cells.iter().enumerate().map(|(i, c)| (c.as_str(), i)).collect();
        let rows = order
            .iter()
            .map(|c| {
                index
                    .get(c.as_str())
                    .copied()
                    .ok_or_else(|| format_err!("cell '{}' has no metadata row", c))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CellMetadata {
            cells: order.to_vec(),
            stages: self.stages.select(&rows),
        })
    }
}

/// An expression matrix and the metadata describing its cells.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    expression: ExpressionMatrix,
    metadata: CellMetadata,
}

impl Dataset {
    /// Combine a matrix and metadata whose rows are already in matrix column order.
    pub fn new(expression: ExpressionMatrix, metadata: CellMetadata) -> Result<Dataset, Error> {
        if metadata.len() != expression.n_cells() {
            bail!(
                "metadata describes {} cells but the expression matrix '{}' has {} columns",
                metadata.len(),
                expression.name,
                expression.n_cells()
            );
        }
        if let Some((i, (m, e))) = metadata
            .cells()
            .iter()
            .zip(expression.cells())
            .enumerate()
            .find(|(_, (m, e))| m != e)
        {
            bail!(
                "metadata row {} is cell '{}' but matrix column {} is cell '{}'",
                i,
                m,
                i,
                e
            );
        }
        Ok(Dataset { expression, metadata })
    }

    /// Combine a matrix and metadata, reordering metadata rows by cell id to match the matrix.
    pub fn aligned(expression: ExpressionMatrix, metadata: CellMetadata) -> Result<Dataset, Error> {
        if metadata.len() != expression.n_cells() {
            bail!(
                "metadata describes {} cells but the expression matrix '{}' has {} columns",
                metadata.len(),
                expression.name,
                expression.n_cells()
            );
        }
        let metadata = metadata.reorder(expression.cells())?;
        Dataset::new(expression, metadata)
    }

    /// The expression matrix
    pub fn expression(&self) -> &ExpressionMatrix {
        &self.expression
    }

    /// The cell metadata
    pub fn metadata(&self) -> &CellMetadata {
        &self.metadata
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.expression.n_cells()
    }
}
