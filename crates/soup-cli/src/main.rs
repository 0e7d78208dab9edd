mod config;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use soup::checkpoint::values_f64;
use soup::{average_params, load_checkpoint, save_checkpoint, CheckpointSource};

/// seg-soup: model-soup utilities for segmentation checkpoints.
#[derive(Parser)]
#[command(name = "seg-soup", version, about)]
struct Cli {
    /// Path to an optional TOML config file with a [soup] section.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Average checkpoint files into a single uniform-soup checkpoint.
    Uniform {
        /// Path for the merged output checkpoint.
        #[arg(long)]
        output: PathBuf,
        /// Log each checkpoint as it is loaded.
        #[arg(long)]
        verbose: bool,
        /// Checkpoint files to average, in order.
        #[arg(required = true)]
        checkpoints: Vec<PathBuf>,
    },
    /// Print each parameter of a checkpoint with dtype, shape, and mean.
    Inspect {
        /// Checkpoint file to inspect.
        checkpoint: PathBuf,
        /// Decimal places for the value preview.
        #[arg(long)]
        digits: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let toml = cli
        .config
        .as_deref()
        .map(config::load_soup_toml)
        .transpose()?;

    match cli.command {
        Command::Uniform {
            output,
            verbose,
            checkpoints,
        } => {
            let settings = config::build_settings(toml.as_ref(), None, verbose.then_some(true));
            uniform(&output, &checkpoints, &settings)
        }
        Command::Inspect { checkpoint, digits } => {
            let settings = config::build_settings(toml.as_ref(), digits, None);
            inspect(&checkpoint, settings.digits)
        }
    }
}

fn uniform(
    output: &PathBuf,
    checkpoints: &[PathBuf],
    settings: &config::Settings,
) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut parts = Vec::with_capacity(checkpoints.len());
    for path in checkpoints {
        let source = CheckpointSource::Path(path.clone());
        if settings.verbose {
            tracing::info!(checkpoint = source.label(), "Loading");
        } else {
            tracing::debug!(checkpoint = source.label(), "Loading");
        }
        parts.push(source.resolve()?);
    }

    let merged = average_params(&parts)?;
    save_checkpoint(output, &merged)?;

    tracing::info!(
        checkpoints = checkpoints.len(),
        params = merged.len(),
        output = %output.display(),
        elapsed_secs = format!("{:.prec$}", start.elapsed().as_secs_f64(), prec = settings.digits),
        "Uniform soup saved"
    );
    Ok(())
}

fn inspect(checkpoint: &PathBuf, digits: usize) -> anyhow::Result<()> {
    let params = load_checkpoint(checkpoint)?;

    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    for key in keys {
        let data = &params[key];
        let values = values_f64(key, data)?;
        let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
        println!(
            "{key}  dtype={:?}  shape={:?}  mean={mean:.prec$}",
            data.dtype,
            data.shape,
            prec = digits
        );
    }
    Ok(())
}
