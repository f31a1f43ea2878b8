use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};

use sqrt_ensemble_rs::ensemble::parse_mask;
use sqrt_ensemble_rs::io::{write_report_json, write_run};
use sqrt_ensemble_rs::{BatchReport, EnsembleConfig, EnsembleRunner, Recording};

#[derive(Parser, Debug)]
#[command(name = "sqrt_ensemble")]
#[command(about = "Run the square-root Kalman ensemble over one EEG recording", long_about = None)]
struct Args {
    /// Recording CSV (header row, optional leading index column, .gz accepted)
    #[arg(value_name = "CSV")]
    input: PathBuf,

    /// JSON config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Samples per block (Hz)
    #[arg(long)]
    sampling_rate: Option<usize>,

    /// Channels per sample
    #[arg(long)]
    channels: Option<usize>,

    /// Significance mask, e.g. "0,0,0,0,0,0,0,0,0,0,0,1,1,1"
    #[arg(long)]
    mask: Option<String>,

    /// Filter variant, repeatable (e.g. Potter_Givens); default all nine
    #[arg(long = "variant")]
    variants: Vec<String>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    workers: Option<usize>,

    /// Session label used in output names; defaults to the file stem
    #[arg(long)]
    session: Option<String>,

    /// Output directory
    #[arg(long, default_value = "ensemble_output")]
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = build_config(&args)?;
    let runner = EnsembleRunner::new(config).context("invalid ensemble configuration")?;
    let session = args
        .session
        .clone()
        .unwrap_or_else(|| session_label(&args.input));

    println!("[{}] Square-root ensemble starting", ts_now());
    println!("  Input: {}", args.input.display());
    println!("  Session: {}", session);
    println!("  Variants: {}", runner.variants().len());
    println!("  Output Dir: {}", args.output_dir.display());

    let recording = Recording::from_path(&args.input, runner.config().channel_count)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let blocks = recording.blocks(runner.config().sampling_rate)?;
    println!(
        "[{}] Loaded {} samples, {} blocks",
        ts_now(),
        recording.samples(),
        blocks.len()
    );

    let mut report = BatchReport::new();
    let run = runner.run(&session, &blocks)?;
    report.record_run(None, &run);
    report.finish();

    std::fs::create_dir_all(&args.output_dir)?;
    let written = write_run(&args.output_dir, &run)?;
    let report_path = args.output_dir.join(format!("{}_report.json", session));
    write_report_json(&report_path, &report)?;

    println!("\n=== Ensemble Summary ===");
    println!(
        "{}: {} blocks of {} samples",
        run.label, run.blocks, run.sampling_rate
    );
    println!(
        "{:<26} {:<5} {:<10} {:>9} {:>14}",
        "variant", "bank", "status", "seconds", "final mean"
    );
    for outcome in &run.outcomes {
        let status = if outcome.status.is_completed() { "ok" } else { "FAILED" };
        let final_mean = outcome
            .output
            .as_ref()
            .and_then(|o| o.final_estimate.as_ref())
            .map(|e| format!("{:.4}", e.mean_of_state))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<26} {:<5} {:<10} {:>9.3} {:>14}",
            outcome.variant.label(),
            outcome.bank.label(),
            status,
            outcome.elapsed_secs,
            final_mean
        );
    }
    println!(
        "\n{} of {} units completed, {} files written, report: {}",
        run.completed(),
        run.outcomes.len(),
        written.len(),
        report_path.display()
    );

    Ok(())
}

fn build_config(args: &Args) -> Result<EnsembleConfig> {
    let mut config = match &args.config {
        Some(path) => EnsembleConfig::from_json_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EnsembleConfig::default(),
    };
    if let Some(rate) = args.sampling_rate {
        config.sampling_rate = rate;
    }
    if let Some(channels) = args.channels {
        config.channel_count = channels;
    }
    if let Some(mask) = &args.mask {
        config.significance_mask = parse_mask(mask)?;
    }
    if !args.variants.is_empty() {
        config.variants = args.variants.clone();
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    Ok(config)
}

/// `S3.csv.gz` → `S3`
fn session_label(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    name.strip_suffix(".csv").unwrap_or(name).to_string()
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
