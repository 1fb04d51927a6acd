//! End-to-end trajectory analysis of one dataset: normalization, PCA, diffusion map,
//! root selection, pseudotimes, gene trend scan and the comparison of pseudotime methods.
//!
//! Every step produces a new artifact; the input dataset is never modified.

use crate::compare::{correlation_matrix, CorrelationMatrix, CorrelationMethod};
use crate::diffusion::{diffusion_map, DiffusionMap, DiffusionParams};
use crate::dim_red::{pca_embedding, pca_pseudotime, PcaEmbedding, PcaMethod};
use crate::dpt::{dpt, resolve_root, RootSpec};
use crate::normalization::{normalize, Normalization};
use anyhow::{format_err, Context, Error};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use traj_types::{Dataset, Pseudotime, PseudotimeTable};
use trend_test::{gene_trend_scan, top_variable_genes, GeneTrend, Loess};

/// Pseudotime of the stage labels (stage rank of each cell)
pub const STAGE_METHOD: &str = "stage";
/// Pseudotime of the PC1 ordering
pub const PCA_METHOD: &str = "pca";
/// Diffusion pseudotime
pub const DPT_METHOD: &str = "dpt";

/// Features the diffusion map is computed on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffusionInput {
    /// PCA scores
    #[default]
    Pca,
    /// normalized expression of all genes
    Expression,
}

/// Parameters of a full run. Every field has a default, so a JSON file only needs
/// to name what it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// applied to the input values before anything else
    pub normalization: Normalization,
    /// principal components; capped at the smaller matrix dimension
    pub n_pcs: usize,
    /// scale genes to unit variance before PCA
    pub scale_genes: bool,
    /// SVD method for PCA
    pub pca_method: PcaMethod,
    /// diffusion map parameters
    pub diffusion: DiffusionParams,
    /// features of the diffusion map
    pub diffusion_input: DiffusionInput,
    /// root cell of the diffusion pseudotime
    pub root: RootSpec,
    /// number of most variable genes tested for a trend
    pub n_top_genes: usize,
    /// smoother of the gene trend test
    pub loess: Loess,
    /// pseudotime method the gene scan runs on
    pub scan_method: String,
    /// coefficient used to compare pseudotime methods
    pub correlation: CorrelationMethod,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            normalization: Normalization::default(),
            n_pcs: 10,
            scale_genes: false,
            pca_method: PcaMethod::default(),
            diffusion: DiffusionParams::default(),
            diffusion_input: DiffusionInput::default(),
            root: RootSpec::default(),
            n_top_genes: 1000,
            loess: Loess::default(),
            scan_method: DPT_METHOD.to_string(),
            correlation: CorrelationMethod::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<PipelineConfig, Error> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening config {}", path.display()))?;
        let config = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}

/// Artifacts of a run
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    /// PCA of the normalized expression
    pub pca: PcaEmbedding,
    /// diffusion map the pseudotime was computed from
    pub diffusion: DiffusionMap,
    /// index of the root cell
    pub root: usize,
    /// `stage`, `pca`, `dpt` and every external method
    pub pseudotimes: PseudotimeTable,
    /// trend test of the most variable genes, ranked by raw p-value
    pub gene_trends: Vec<GeneTrend>,
    /// pairwise correlations of the pseudotime methods
    pub correlations: CorrelationMatrix,
}

/// Run the whole analysis on `dataset`. `external` holds pseudotimes computed by other
/// tools; they are compared against the ones computed here.
pub fn run_pipeline(
    dataset: &Dataset,
    config: &PipelineConfig,
    external: PseudotimeTable,
) -> Result<PipelineOutput, Error> {
    let n_cells = dataset.n_cells();
    let expression = normalize(dataset.expression(), config.normalization)?;

    let max_pcs = expression.n_cells().min(expression.n_genes());
    let n_pcs = if config.n_pcs > max_pcs {
        warn!(
            "{} principal components requested, the data only has {}",
            config.n_pcs, max_pcs
        );
        max_pcs
    } else {
        config.n_pcs
    };
    let pca = pca_embedding(&expression, n_pcs, config.scale_genes, &config.pca_method)?;

    let diffusion = match config.diffusion_input {
        DiffusionInput::Pca => diffusion_map(pca.scores.view(), &config.diffusion)?,
        DiffusionInput::Expression => diffusion_map(expression.cells_by_genes(), &config.diffusion)?,
    };
    let root = resolve_root(&config.root, &diffusion, dataset.metadata())?;

    let mut pseudotimes = PseudotimeTable::with_cells(n_cells);
    let stage_ranks: Vec<f64> = dataset.metadata().stages().codes().map(|c| c as f64).collect();
    pseudotimes.insert(STAGE_METHOD, Pseudotime::from_values(&stage_ranks))?;
    pseudotimes.insert(PCA_METHOD, pca_pseudotime(&pca, Some(root))?)?;
    pseudotimes.insert(DPT_METHOD, dpt(&diffusion, root)?)?;
    pseudotimes
        .extend(external)
        .context("adding external pseudotimes")?;
    info!("pseudotime methods: {}", pseudotimes.methods().join(", "));

    let scan_pseudotime = pseudotimes.get(&config.scan_method).ok_or_else(|| {
        format_err!(
            "gene scan pseudotime '{}' is not one of {:?}",
            config.scan_method,
            pseudotimes.methods()
        )
    })?;
    let top = top_variable_genes(&expression, config.n_top_genes);
    let candidates = expression.select_genes(&top)?;
    let mut gene_trends = gene_trend_scan(&candidates, scan_pseudotime, &config.loess)?;
    for trend in &mut gene_trends {
        trend.gene_index = top[trend.gene_index];
    }

    let correlations = correlation_matrix(&pseudotimes, config.correlation);

    Ok(PipelineOutput {
        pca,
        diffusion,
        root,
        pseudotimes,
        gene_trends,
        correlations,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diffusion::Bandwidth;
    use ndarray::Array2;
    use traj_types::{CellMetadata, ExpressionMatrix, StageLabels, StageVocabulary};

    /// Six cells, two per stage, along a line in a two-gene space
    fn six_cells() -> Dataset {
        let values = Array2::from_shape_fn((2, 6), |(g, c)| {
            let t = c as f64;
            if g == 0 {
                t
            } else {
                2.0 * t + 0.1 * (c % 2) as f64
            }
        });
        let cells: Vec<String> = (0..6).map(|c| format!("cell{c}")).collect();
        let expression = ExpressionMatrix::new(
            "six",
            vec!["rise".to_string(), "steep".to_string()],
            cells.clone(),
            values,
        )
        .unwrap();
        let vocab = StageVocabulary::new(vec!["E1".to_string(), "E2".to_string(), "E3".to_string()]).unwrap();
        let stages = StageLabels::from_strings(vocab, &["E1", "E1", "E2", "E2", "E3", "E3"]).unwrap();
        Dataset::new(expression, CellMetadata::new(cells, stages).unwrap()).unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            pca_method: PcaMethod::Full,
            diffusion: DiffusionParams {
                n_components: 3,
                bandwidth: Bandwidth::Auto { k: 2 },
                ..DiffusionParams::default()
            },
            loess: Loess::new(1.0, 1).unwrap(),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_methods_agree_on_a_linear_trajectory() {
        let out = run_pipeline(&six_cells(), &config(), PseudotimeTable::new()).unwrap();
        assert_eq!(out.root, 0);
        assert_eq!(out.pca.n_components(), 2);
        assert_eq!(out.pseudotimes.methods(), vec!["dpt", "pca", "stage"]);

        let dpt = out.pseudotimes.get("dpt").unwrap();
        assert_eq!(dpt.get(0), Some(0.0));
        assert_eq!(dpt.n_defined(), 6);

        for (a, b) in [("dpt", "pca"), ("dpt", "stage"), ("pca", "stage")] {
            let r = out.correlations.get(a, b).unwrap();
            assert!(r >= 0.9, "{a} vs {b}: {r}");
        }

        assert_eq!(out.gene_trends.len(), 2);
        for trend in &out.gene_trends {
            assert!(trend.p_value < 0.01, "{}: p = {}", trend.gene, trend.p_value);
            assert_eq!(trend.n_cells, 6);
            assert_eq!(out.gene_trends.iter().filter(|t| t.gene == trend.gene).count(), 1);
        }
    }

    #[test]
    fn test_external_pseudotime_and_scan_method() {
        let mut external = PseudotimeTable::new();
        external
            .insert(
                "reversed",
                Pseudotime::new(vec![Some(6.0), Some(5.0), None, Some(3.0), Some(2.0), Some(1.0)]),
            )
            .unwrap();
        let mut cfg = config();
        cfg.scan_method = "reversed".to_string();
        cfg.n_top_genes = 1;
        let out = run_pipeline(&six_cells(), &cfg, external).unwrap();

        assert_eq!(out.correlations.get("reversed", "dpt"), Some(-1.0));
        assert_eq!(out.correlations.n_complete[[0, 2]], 5);
        // the most variable gene, reported with its row in the full matrix
        assert_eq!(out.gene_trends.len(), 1);
        assert_eq!(out.gene_trends[0].gene, "steep");
        assert_eq!(out.gene_trends[0].gene_index, 1);
        assert_eq!(out.gene_trends[0].n_cells, 5);

        cfg.scan_method = "velocity".to_string();
        assert!(run_pipeline(&six_cells(), &cfg, PseudotimeTable::new()).is_err());

        let mut clash = PseudotimeTable::new();
        clash.insert("dpt", Pseudotime::from_values(&[0.0; 6])).unwrap();
        assert!(run_pipeline(&six_cells(), &config(), clash).is_err());
    }

    #[test]
    fn test_negative_expression_is_rejected() {
        let shifted = six_cells();
        let values = shifted.expression().values().mapv(|v| v - 3.0);
        let expression = shifted.expression().with_values(values).unwrap();
        let dataset = Dataset::new(expression, shifted.metadata().clone()).unwrap();

        let err = run_pipeline(&dataset, &config(), PseudotimeTable::new()).unwrap_err();
        assert!(format!("{err:#}").contains("negative log expression"));

        let mut counts = config();
        counts.normalization = Normalization::LogTransform;
        assert!(run_pipeline(&dataset, &counts, PseudotimeTable::new()).is_err());
    }

    #[test]
    fn test_config_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "normalization": "log2",
                "n_pcs": 5,
                "diffusion": {"bandwidth": {"local": {"k": 4}}, "alpha": 1.0},
                "root": {"stage": "E2"},
                "loess": {"span": 0.75},
                "correlation": "pearson"
            }"#,
        )
        .unwrap();
        let cfg = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.normalization, Normalization::LogTransform);
        assert_eq!(cfg.n_pcs, 5);
        assert_eq!(cfg.diffusion.bandwidth, Bandwidth::Local { k: 4 });
        assert_eq!(cfg.diffusion.n_components, 10);
        assert_eq!(cfg.diffusion.alpha, 1.0);
        assert_eq!(cfg.root, RootSpec::Stage("E2".to_string()));
        assert_eq!(cfg.loess.span, 0.75);
        assert_eq!(cfg.loess.degree, 1);
        assert_eq!(cfg.correlation, CorrelationMethod::Pearson);
        assert_eq!(cfg.scan_method, "dpt");
        assert_eq!(cfg.pca_method, PcaMethod::BkSvd);

        assert!(PipelineConfig::from_json_file(dir.path().join("missing.json")).is_err());
        std::fs::write(&path, r#"{"n_pcs": "many"}"#).unwrap();
        assert!(PipelineConfig::from_json_file(&path).is_err());
    }
}
