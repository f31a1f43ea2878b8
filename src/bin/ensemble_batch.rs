use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

use sqrt_ensemble_rs::io::{
    session_path, write_execution_times, write_failures, write_report_json, write_run,
};
use sqrt_ensemble_rs::{BatchManifest, BatchReport, EnsembleRunner, Recording};

#[derive(Parser, Debug)]
#[command(about = "Run the ensemble over every subject and session listed in a manifest")]
struct Args {
    /// Batch manifest (JSON)
    #[arg(value_name = "MANIFEST")]
    manifest: PathBuf,

    /// Override the manifest's worker count
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut manifest = BatchManifest::from_path(&args.manifest)
        .with_context(|| format!("loading manifest {}", args.manifest.display()))?;
    if let Some(workers) = args.workers {
        manifest.config.workers = workers;
    }

    let timings_dir = manifest.timings_dir();
    std::fs::create_dir_all(&timings_dir)?;
    let mut report = BatchReport::new();

    println!("[{}] Batch of {} subjects", ts_now(), manifest.subjects.len());

    for subject in &manifest.subjects {
        let runner = EnsembleRunner::new(manifest.subject_config(subject))
            .with_context(|| format!("subject {}", subject.name))?;
        let input_dir = manifest.input_dir(subject);
        let output_dir = manifest.output_dir(subject);
        std::fs::create_dir_all(&output_dir)?;
        let first_entry = report.entries.len();

        for session in subject.session_names() {
            let path = session_path(&input_dir, &session);
            let config = runner.config();
            let result = Recording::from_path(&path, config.channel_count)
                .and_then(|recording| recording.blocks(config.sampling_rate))
                .and_then(|blocks| runner.run(&session, &blocks));

            match result {
                Ok(run) => {
                    write_run(&output_dir, &run)?;
                    report.record_run(Some(&subject.name), &run);
                    println!(
                        "[{}] {} {}: {}/{} units",
                        ts_now(),
                        subject.name,
                        session,
                        run.completed(),
                        run.outcomes.len()
                    );
                }
                Err(e) => {
                    log::warn!("{} {} skipped: {}", subject.name, session, e);
                    report.record_rejected(
                        Some(&subject.name),
                        &session,
                        &config.banks,
                        runner.variants(),
                        &e.to_string(),
                    );
                }
            }
        }

        let subject_times = timings_dir.join(format!("{}_execution_times.txt", subject.name));
        write_execution_times(&subject_times, &report.entries[first_entry..])?;
    }

    report.finish();
    write_execution_times(
        &timings_dir.join("ensemble_execution_times.txt"),
        &report.entries,
    )?;
    write_failures(&timings_dir.join("failed_runs.txt"), report.failures())?;
    write_report_json(&timings_dir.join("batch_report.json"), &report)?;

    let failed = report.failures().count();
    println!(
        "[{}] Batch complete: {} units, {} failed",
        ts_now(),
        report.entries.len(),
        failed
    );
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
