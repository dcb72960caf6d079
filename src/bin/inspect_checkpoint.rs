//! Offline checkpoint inspector
//!
//! Reads a checkpoint the same way the service does and prints what it found:
//! layout, metadata and the architecture it would resolve to.
//!
//! Usage: cargo run --release --bin inspect_checkpoint -- models/model.safetensors --sniff-stem

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use serde::Serialize;

use breedvision::checkpoint::tensor::{count_parameters, total_size_bytes};
use breedvision::checkpoint::{interpret, ModelInfo, RawCheckpoint};
use breedvision::model::architecture::{
    hinted_variant, resolve, stage_block_count, ResolvePolicy, Resolution,
};
use breedvision::model::ConvNextVariant;
use breedvision::utils::format_bytes;
use breedvision::utils::logging::{init_logging, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "inspect_checkpoint")]
#[command(about = "Inspect a breed classification checkpoint")]
struct Args {
    /// Path to the safetensors checkpoint
    checkpoint: PathBuf,

    /// Optional model_info.json overlaid on the defaults
    #[arg(short, long)]
    info: Option<PathBuf>,

    /// Infer the variant from the stem width instead of the serving default
    #[arg(long, default_value = "false")]
    sniff_stem: bool,

    /// Print a JSON report instead of text
    #[arg(long, default_value = "false")]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[derive(Serialize)]
struct Report {
    checkpoint: PathBuf,
    file_size: u64,
    layout: String,
    tensors: usize,
    parameters: usize,
    tensor_bytes: usize,
    stage_blocks: [usize; 4],
    classes: Option<Vec<String>>,
    declared_num_classes: Option<usize>,
    model_name: Option<String>,
    arch_hint: Option<String>,
    hinted_variant: Option<ConvNextVariant>,
    resolution: Resolution,
    /// Feature extractor size of the resolved variant
    approx_backbone_params: usize,
    info: ModelInfo,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = if args.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config).map_err(anyhow::Error::msg)?;

    let file_size = std::fs::metadata(&args.checkpoint)
        .with_context(|| format!("cannot stat {:?}", args.checkpoint))?
        .len();
    let raw = RawCheckpoint::from_file(&args.checkpoint)?;
    let checkpoint = interpret(raw)?;

    let policy = if args.sniff_stem {
        ResolvePolicy::SniffStemWidth
    } else {
        ResolvePolicy::default()
    };
    let resolution = resolve(checkpoint.declared_num_classes(), &checkpoint.weights, &policy);

    let mut info = match &args.info {
        Some(path) => ModelInfo::from_side_file(path),
        None => ModelInfo::default(),
    };
    info.apply(&checkpoint.metadata);
    info.num_classes = resolution.num_classes;

    let report = Report {
        checkpoint: args.checkpoint.clone(),
        file_size,
        layout: checkpoint.layout.to_string(),
        tensors: checkpoint.weights.len(),
        parameters: count_parameters(&checkpoint.weights),
        tensor_bytes: total_size_bytes(&checkpoint.weights),
        stage_blocks: [0, 1, 2, 3].map(|s| stage_block_count(&checkpoint.weights, s)),
        classes: checkpoint.metadata.classes.clone(),
        declared_num_classes: checkpoint.declared_num_classes(),
        model_name: checkpoint.metadata.model_name.clone(),
        arch_hint: checkpoint.arch_hint.clone(),
        hinted_variant: hinted_variant(
            checkpoint.arch_hint.as_deref(),
            checkpoint.metadata.model_name.as_deref(),
        ),
        approx_backbone_params: resolution.variant.approx_params(),
        resolution,
        info,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &Report) {
    println!("{}", "=== Checkpoint ===".green().bold());
    println!("File: {:?} ({})", report.checkpoint, format_bytes(report.file_size));
    println!("Layout: {}", report.layout.cyan());
    println!("Tensors: {}", report.tensors);
    println!(
        "Parameters: {:.2}M ({})",
        report.parameters as f64 / 1e6,
        format_bytes(report.tensor_bytes as u64)
    );
    println!("Blocks per stage: {:?}", report.stage_blocks);

    println!();
    println!("{}", "=== Metadata ===".green().bold());
    match &report.classes {
        Some(classes) => println!("Classes ({}): {}", classes.len(), classes.join(", ")),
        None => println!("Classes: {}", "none embedded".yellow()),
    }
    match report.declared_num_classes {
        Some(n) => println!("Declared classes: {}", n),
        None => println!("Declared classes: {}", "none".yellow()),
    }
    if let Some(name) = &report.model_name {
        println!("Model name: {}", name);
    }
    if let Some(arch) = &report.arch_hint {
        println!("Architecture hint: {}", arch);
    }
    match report.hinted_variant {
        Some(variant) => println!("Declared variant: {}", variant),
        None => println!("Declared variant: {}", "unrecognized".yellow()),
    }

    println!();
    println!("{}", "=== Resolution ===".green().bold());
    println!("Variant: {}", report.resolution.variant.to_string().cyan().bold());
    println!(
        "Backbone parameters: ~{:.1}M",
        report.approx_backbone_params as f64 / 1e6
    );
    if let Some(hinted) = report.hinted_variant.filter(|v| *v != report.resolution.variant) {
        println!(
            "{}",
            format!("Note: declared {} differs from resolved variant", hinted).yellow()
        );
    }
    println!("Classes: {}", report.resolution.num_classes);
    println!(
        "Class count source: {}",
        if report.resolution.inferred_from_weights {
            "classifier weight shape"
        } else {
            "metadata"
        }
    );
    println!("Policy: {:?}", report.resolution.policy);
    if report.info.classes.len() != report.resolution.num_classes {
        println!(
            "{}",
            format!(
                "Warning: {} class names for {} outputs",
                report.info.classes.len(),
                report.resolution.num_classes
            )
            .yellow()
        );
    }
}
