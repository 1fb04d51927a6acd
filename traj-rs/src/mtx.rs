use anyhow::{bail, ensure, format_err, Context, Error};
use flate2::bufread::MultiGzDecoder;
use ndarray::Array2;
use sprs::{CsMat, TriMat};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Load a gzipped MatrixMarket coordinate file (genes x cells, 1-based coordinates,
/// integer or real values) into a dense matrix. Repeated coordinates are summed.
pub fn load_mtx(path: impl AsRef<Path>) -> Result<Array2<f64>, Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let gz = BufReader::new(MultiGzDecoder::new(file));
    parse_mtx(gz).with_context(|| format!("reading MatrixMarket file {}", path.display()))
}

fn parse_mtx(reader: impl BufRead) -> Result<Array2<f64>, Error> {
    let mut mat: Option<TriMat<f64>> = None;
    let mut declared_nnz = 0;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }
        let mut data = line.split_whitespace();
        match mat.as_mut() {
            None => {
                let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                declared_nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                mat = Some(TriMat::with_capacity((nrow, ncol), declared_nnz));
            }
            Some(m) => {
                let row = data
                    .next()
                    .ok_or_else(|| format_err!("missing ROW on line {}", lineno + 1))?
                    .parse::<usize>()?;
                let col = data
                    .next()
                    .ok_or_else(|| format_err!("missing COL on line {}", lineno + 1))?
                    .parse::<usize>()?;
                let val = data
                    .next()
                    .ok_or_else(|| format_err!("missing VAL on line {}", lineno + 1))?
                    .parse::<f64>()
                    .with_context(|| format!("bad value on line {}", lineno + 1))?;
                let (nrow, ncol) = (m.rows(), m.cols());
                if row == 0 || row > nrow || col == 0 || col > ncol {
                    bail!(
                        "entry ({}, {}) on line {} is outside the declared {} x {} matrix",
                        row,
                        col,
                        lineno + 1,
                        nrow,
                        ncol
                    );
                }
                m.add_triplet(row - 1, col - 1, val);
            }
        }
    }

    let Some(matrix) = mat else { bail!("no matrix found") };
    ensure!(
        matrix.nnz() == declared_nnz,
        "header declares {} entries but {} were found",
        declared_nnz,
        matrix.nnz()
    );
    let csr: CsMat<f64> = matrix.to_csr();
    Ok(csr.to_dense())
}
