//! Loaders for expression tables, name lists, cell metadata and externally computed
//! pseudotimes. Delimited files are comma separated unless their name ends in `.tsv`
//! or `.txt` (tab separated); any of them may be gzipped.

use crate::mtx::load_mtx;
use anyhow::{bail, ensure, format_err, Context, Error};
use flate2::bufread::MultiGzDecoder;
use log::{info, warn};
use ndarray::Array2;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use traj_types::{CellMetadata, ExpressionMatrix, Pseudotime, StageLabels, StageVocabulary};

/// Default name of the cell id column
pub const CELL_COLUMN: &str = "cell";
/// Default name of the stage column
pub const STAGE_COLUMN: &str = "stage";
/// Default name of the pseudotime column in external files
pub const PSEUDOTIME_COLUMN: &str = "pseudotime";

fn is_gzipped(path: &Path) -> bool {
    path.extension().map_or(false, |e| e == "gz")
}

fn open(path: &Path) -> Result<Box<dyn Read>, Error> {
    let file = File::open(path).with_context(|| path.display().to_string())?;
    if is_gzipped(path) {
        Ok(Box::new(MultiGzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

fn delimiter(path: &Path) -> u8 {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(name);
    if name.ends_with(".tsv") || name.ends_with(".txt") {
        b'\t'
    } else {
        b','
    }
}

fn csv_reader(path: &Path) -> Result<csv::Reader<Box<dyn Read>>, Error> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter(path))
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(open(path)?))
}

fn column(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize, Error> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| format_err!("{} has no '{}' column (columns: {:?})", path.display(), name, headers))
}

fn matrix_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read one name per line, keeping the first tab-separated field. Blank lines are skipped.
pub fn read_names(path: impl AsRef<Path>) -> Result<Vec<String>, Error> {
    let path = path.as_ref();
    let reader = BufReader::new(open(path)?);
    let mut names = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| path.display().to_string())?;
        if let Some(name) = line.split('\t').next().map(str::trim).filter(|n| !n.is_empty()) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Load a dense genes x cells table. The header holds the cell ids after a leading
/// label for the gene column; each row starts with the gene name.
pub fn load_dense_table(path: impl AsRef<Path>) -> Result<ExpressionMatrix, Error> {
    let path = path.as_ref();
    let mut reader = csv_reader(path)?;
    let headers = reader.headers().with_context(|| path.display().to_string())?.clone();
    ensure!(headers.len() >= 2, "{} has no cell columns", path.display());
    let cells: Vec<String> = headers.iter().skip(1).map(String::from).collect();

    let mut genes = Vec::new();
    let mut values = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{} row {}", path.display(), i + 1))?;
        let mut fields = record.iter();
        let gene = fields.next().unwrap_or_default().to_string();
        for (cell, field) in cells.iter().zip(fields) {
            let v = field
                .parse::<f64>()
                .with_context(|| format!("gene '{}', cell '{}': bad value '{}'", gene, cell, field))?;
            values.push(v);
        }
        genes.push(gene);
    }
    let values = Array2::from_shape_vec((genes.len(), cells.len()), values)?;
    ExpressionMatrix::new(matrix_name(path), genes, cells, values)
}

/// Load the expression matrix named by `input`: a gzipped MatrixMarket file (`.mtx.gz`),
/// which needs gene and cell name files, or a dense delimited table.
pub fn load_expression(
    input: impl AsRef<Path>,
    genes: Option<&Path>,
    cells: Option<&Path>,
) -> Result<ExpressionMatrix, Error> {
    let input = input.as_ref();
    let matrix = if matrix_name(input).ends_with(".mtx.gz") {
        let (Some(genes), Some(cells)) = (genes, cells) else {
            bail!("{} is a MatrixMarket file and needs gene and cell name files", input.display());
        };
        let values = load_mtx(input)?;
        ExpressionMatrix::new(matrix_name(input), read_names(genes)?, read_names(cells)?, values)?
    } else {
        load_dense_table(input)?
    };
    info!(
        "loaded {} genes x {} cells from {}",
        matrix.n_genes(),
        matrix.n_cells(),
        input.display()
    );
    Ok(matrix)
}

/// Load per-cell metadata from the default `cell` and `stage` columns.
pub fn load_metadata(path: impl AsRef<Path>, vocabulary: Option<StageVocabulary>) -> Result<CellMetadata, Error> {
    load_metadata_columns(path, vocabulary, CELL_COLUMN, STAGE_COLUMN)
}

/// Load per-cell metadata from the named columns. Stage labels are checked against
/// `vocabulary`; without one, the stage order is taken from first appearance.
pub fn load_metadata_columns(
    path: impl AsRef<Path>,
    vocabulary: Option<StageVocabulary>,
    cell_column: &str,
    stage_column: &str,
) -> Result<CellMetadata, Error> {
    let path = path.as_ref();
    let mut reader = csv_reader(path)?;
    let headers = reader.headers()?.clone();
    let cell_idx = column(&headers, cell_column, path)?;
    let stage_idx = column(&headers, stage_column, path)?;

    let mut cells = Vec::new();
    let mut stages = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{} row {}", path.display(), i + 1))?;
        let field = |idx: usize| {
            record
                .get(idx)
                .map(String::from)
                .ok_or_else(|| format_err!("{} row {} is too short", path.display(), i + 1))
        };
        cells.push(field(cell_idx)?);
        stages.push(field(stage_idx)?);
    }

    let vocabulary = match vocabulary {
        Some(v) => v,
        None => {
            let v = StageVocabulary::infer_from_labels(&stages)?;
            warn!(
                "no stage order given, using order of first appearance in {}: {:?}",
                path.display(),
                v.levels()
            );
            v
        }
    };
    let labels = StageLabels::from_strings(vocabulary, &stages).with_context(|| path.display().to_string())?;
    CellMetadata::new(cells, labels)
}

fn is_missing(field: &str) -> bool {
    field.is_empty() || field.eq_ignore_ascii_case("na") || field.eq_ignore_ascii_case("nan")
}

/// Load a pseudotime computed elsewhere from the `cell` and `pseudotime` columns,
/// aligned to `cells`. Cells that are absent from the file, or whose value is empty or
/// `NA`, are undefined. A cell id that is not in `cells` is an error.
pub fn load_external_pseudotime(path: impl AsRef<Path>, cells: &[String]) -> Result<Pseudotime, Error> {
    let path = path.as_ref();
    let index: HashMap<&str, usize> = cells.iter().enumerate().map(|(i, c)| (c.as_str(), i)).collect();

    let mut reader = csv_reader(path)?;
    let headers = reader.headers()?.clone();
    let cell_idx = column(&headers, CELL_COLUMN, path)?;
    let value_idx = column(&headers, PSEUDOTIME_COLUMN, path)?;

    let mut values: Vec<Option<f64>> = vec![None; cells.len()];
    let mut seen = vec![false; cells.len()];
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{} row {}", path.display(), i + 1))?;
        let (Some(cell), Some(field)) = (record.get(cell_idx), record.get(value_idx)) else {
            bail!("{} row {} is too short", path.display(), i + 1);
        };
        let Some(&c) = index.get(cell) else {
            bail!("{}: cell '{}' is not in the dataset", path.display(), cell);
        };
        ensure!(!seen[c], "{}: cell '{}' appears more than once", path.display(), cell);
        seen[c] = true;
        if !is_missing(field) {
            let v = field
                .parse::<f64>()
                .with_context(|| format!("{}: cell '{}' has bad pseudotime '{}'", path.display(), cell, field))?;
            values[c] = Some(v);
        }
    }

    let pseudotime = Pseudotime::new(values);
    let missing = cells.len() - pseudotime.n_defined();
    if missing > 0 {
        warn!("{}: {} of {} cells have no pseudotime", path.display(), missing, cells.len());
    }
    Ok(pseudotime)
}
