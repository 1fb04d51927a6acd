//! # traj-rs: pseudotime trajectory inference for single-cell expression data

#![deny(missing_docs)]

/// Correlation of pseudotime methods
pub mod compare;

/// Expression, metadata and external pseudotime loaders
pub mod dataset;

/// Diffusion map embedding
pub mod diffusion;

/// Dimensionality reduction methods
pub mod dim_red;

/// Diffusion pseudotime and root selection
pub mod dpt;

/// MTX loading routine
pub mod mtx;

/// Count matrix normalization methods
pub mod normalization;

/// End-to-end analysis
pub mod pipeline;

/// Small statistics helpers
pub mod stats;

pub use crate::pipeline::{run_pipeline, PipelineConfig, PipelineOutput};
