// Command line utility for running the traj-rs pipeline

use anyhow::{format_err, Context, Error};
use clap::{value_parser, Arg, ArgAction, Command};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, warn};
use ndarray::prelude::*;
use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};
use traj_rs::dataset::{load_expression, load_external_pseudotime, load_metadata};
use traj_rs::dpt::RootSpec;
use traj_rs::normalization::Normalization;
use traj_rs::{run_pipeline, PipelineConfig, PipelineOutput};
use traj_types::{Dataset, PseudotimeTable, StageVocabulary};

fn command() -> Command {
    Command::new("traj-rs-cmd")
        .about("Pseudotime trajectory inference and gene trend scan")
        .arg(
            Arg::new("INPUT")
                .help("expression matrix: genes x cells .mtx.gz, or a csv/tsv table")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("GENES")
                .help("gene names of an mtx input, one per line")
                .long("genes")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("CELLS")
                .help("cell ids of an mtx input, one per line")
                .long("cells")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("METADATA")
                .help("cell metadata with 'cell' and 'stage' columns")
                .short('m')
                .long("metadata")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("STAGES")
                .help("comma separated stage names, earliest first")
                .short('s')
                .long("stages"),
        )
        .arg(
            Arg::new("CONFIG")
                .help("pipeline configuration (JSON)")
                .short('c')
                .long("config")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("NORMALIZATION")
                .help("Normalization method to use")
                .short('n')
                .long("norm")
                .value_parser(["none", "log2", "cellranger", "seuratlog"]),
        )
        .arg(
            Arg::new("NUM_PCS")
                .help("Number of PCA dimensions to use")
                .short('d')
                .long("num_pcs")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("ROOT")
                .help("id of the root cell")
                .long("root")
                .conflicts_with("ROOT_STAGE"),
        )
        .arg(
            Arg::new("ROOT_STAGE")
                .help("stage whose extreme cell on the first diffusion component is the root")
                .long("root_stage"),
        )
        .arg(
            Arg::new("EXTERNAL")
                .help("externally computed pseudotime, as name=path; may be repeated")
                .short('e')
                .long("external")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out_dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
}

pub fn main() -> Result<(), Error> {
    env_logger::init();
    let matches = command().get_matches();

    let input: &PathBuf = matches
        .get_one("INPUT")
        .ok_or_else(|| format_err!("missing input matrix"))?;
    let out_dir: &PathBuf = matches
        .get_one("OUT_DIR")
        .ok_or_else(|| format_err!("missing output directory"))?;

    let mut config = match matches.get_one::<PathBuf>("CONFIG") {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(norm) = matches.get_one::<String>("NORMALIZATION") {
        config.normalization = norm.parse::<Normalization>()?;
    }
    if let Some(&num_pcs) = matches.get_one::<usize>("NUM_PCS") {
        config.n_pcs = num_pcs;
    }
    if let Some(cell) = matches.get_one::<String>("ROOT") {
        config.root = RootSpec::CellId(cell.clone());
    }
    if let Some(stage) = matches.get_one::<String>("ROOT_STAGE") {
        config.root = RootSpec::Stage(stage.clone());
    }

    let vocabulary = matches
        .get_one::<String>("STAGES")
        .map(|s| StageVocabulary::new(s.split(',').map(|l| l.trim().to_string()).collect()))
        .transpose()?;

    let expression = load_expression(
        input,
        matches.get_one::<PathBuf>("GENES").map(PathBuf::as_path),
        matches.get_one::<PathBuf>("CELLS").map(PathBuf::as_path),
    )?;
    let metadata_path: &PathBuf = matches
        .get_one("METADATA")
        .ok_or_else(|| format_err!("missing metadata"))?;
    let metadata = load_metadata(metadata_path, vocabulary)?;
    let dataset = Dataset::aligned(expression, metadata)?;

    let mut external = PseudotimeTable::with_cells(dataset.n_cells());
    for spec in matches.get_many::<String>("EXTERNAL").into_iter().flatten() {
        let (name, path) = spec
            .split_once('=')
            .ok_or_else(|| format_err!("external pseudotime '{}' is not of the form name=path", spec))?;
        let pseudotime = load_external_pseudotime(path, dataset.expression().cells())?;
        external.insert(name, pseudotime)?;
    }

    let output = run_pipeline(&dataset, &config, external)?;
    warn!(
        "gene trend p-values are not corrected for testing {} genes",
        output.gene_trends.len()
    );

    create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;
    write_outputs(&dataset, &output, out_dir)?;
    info!("results written to {}", out_dir.display());
    Ok(())
}

type GzCsvWriter = csv::Writer<GzEncoder<File>>;

fn gz_writer(path: &Path) -> Result<GzCsvWriter, Error> {
    let file = File::create(path).with_context(|| path.display().to_string())?;
    Ok(csv::WriterBuilder::new().from_writer(GzEncoder::new(file, Compression::default())))
}

fn finish(writer: GzCsvWriter) -> Result<(), Error> {
    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    encoder.finish()?;
    Ok(())
}

/// Write `array` with one labelled row per entry of `rows` and a header line
pub fn array_to_csv(
    path: impl AsRef<Path>,
    header: &[String],
    rows: &[String],
    array: ArrayView2<f64>,
) -> Result<(), Error> {
    let mut writer = gz_writer(path.as_ref())?;
    writer.write_record(header)?;
    for (name, row) in rows.iter().zip(array.axis_iter(Axis(0))) {
        writer.write_field(name)?;
        for entry in row.iter() {
            writer.write_field(entry.to_string())?;
        }
        writer.write_record(None::<&[u8]>)?;
    }
    finish(writer)
}

fn labelled(first: &str, prefix: &str, n: usize) -> Vec<String> {
    std::iter::once(first.to_string())
        .chain((1..=n).map(|i| format!("{prefix}{i}")))
        .collect()
}

fn write_outputs(dataset: &Dataset, output: &PipelineOutput, out_dir: &Path) -> Result<(), Error> {
    let cells = dataset.expression().cells();

    let pca = &output.pca;
    array_to_csv(
        out_dir.join("pca.csv.gz"),
        &labelled("cell", "PC", pca.n_components()),
        cells,
        pca.scores.view(),
    )?;

    let dmap = &output.diffusion;
    let mut header = labelled("cell", "DC", dmap.n_components());
    header.push("connected_component".to_string());
    let mut writer = gz_writer(&out_dir.join("diffmap.csv.gz"))?;
    writer.write_record(&header)?;
    for (i, row) in dmap.components.axis_iter(Axis(0)).enumerate() {
        writer.write_field(&cells[i])?;
        for entry in row.iter() {
            writer.write_field(entry.to_string())?;
        }
        writer.write_field(dmap.connected_components[i].to_string())?;
        writer.write_record(None::<&[u8]>)?;
    }
    finish(writer)?;

    let eigen_rows: Vec<String> = (0..dmap.spectrum.len()).map(|i| i.to_string()).collect();
    array_to_csv(
        out_dir.join("eigenvalues.csv.gz"),
        &["index".to_string(), "eigenvalue".to_string()],
        &eigen_rows,
        dmap.spectrum.view().insert_axis(Axis(1)),
    )?;

    let mut writer = gz_writer(&out_dir.join("pseudotime.csv.gz"))?;
    writer.write_record(std::iter::once("cell").chain(output.pseudotimes.methods()))?;
    for (i, cell) in cells.iter().enumerate() {
        writer.write_field(cell)?;
        for (_, pseudotime) in output.pseudotimes.iter() {
            match pseudotime.get(i) {
                Some(v) => writer.write_field(v.to_string())?,
                None => writer.write_field("NA")?,
            }
        }
        writer.write_record(None::<&[u8]>)?;
    }
    finish(writer)?;

    let mut writer = gz_writer(&out_dir.join("gene_trends.csv.gz"))?;
    writer.write_record(["gene", "gene_index", "p_value", "f_statistic", "edf", "n_cells"])?;
    for t in &output.gene_trends {
        writer.write_record([
            t.gene.clone(),
            t.gene_index.to_string(),
            t.p_value.to_string(),
            t.f_statistic.to_string(),
            t.edf.to_string(),
            t.n_cells.to_string(),
        ])?;
    }
    finish(writer)?;

    let corr = &output.correlations;
    let mut header = vec!["method".to_string()];
    header.extend(corr.methods.iter().cloned());
    array_to_csv(
        out_dir.join("correlation.csv.gz"),
        &header,
        &corr.methods,
        corr.values.view(),
    )?;
    Ok(())
}
