//! Shared data model for trajectory inference: expression matrices, typed stage
//! labels and per-method pseudotime vectors.

#![deny(missing_docs)]

/// Expression matrices and datasets
pub mod matrix;

/// Per-cell pseudotime vectors and the table that collects them
pub mod pseudotime;

/// Ordered developmental stage labels
pub mod stage;

pub use matrix::{CellMetadata, Dataset, ExpressionMatrix};
pub use pseudotime::{Pseudotime, PseudotimeTable};
pub use stage::{StageLabels, StageVocabulary};
