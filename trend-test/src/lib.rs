//! Per-gene tests for expression trends along pseudotime.

/// F-test p-values
pub mod dist;
/// LOESS local regression smoother
pub mod loess;
/// gene scan against a pseudotime vector
pub mod scan;
/// statistics extension
pub mod stat;

pub use crate::loess::{Loess, LoessFit, LoessSmoother};
pub use crate::scan::{gene_trend_scan, top_variable_genes, GeneTrend};
