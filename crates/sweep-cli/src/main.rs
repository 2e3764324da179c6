mod experiment_file;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use sweep_runner::experiment::DEFAULT_GROUP;
use sweep_runner::{DispatchError, DispatchReport, ExperimentReport, Registry, RunnerConfig};
use tracing_subscriber::EnvFilter;

use experiment_file::{load_experiment_file, Entry, ExperimentFile};

#[derive(Parser)]
#[command(name = "sweep", version = "0.3.0", about = "Run every combination of a command template")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch the selected experiments, stage by stage.
    Run {
        experiment: PathBuf,
        /// Experiment or group names; glob patterns allowed.
        selectors: Vec<String>,
        #[arg(long)]
        cores: Option<usize>,
        #[arg(long)]
        workdir: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show todo/skipped/total per experiment without running anything.
    Describe {
        experiment: PathBuf,
        #[arg(long)]
        workdir: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = matches!(
        cli.command,
        Commands::Run { json: true, .. } | Commands::Describe { json: true, .. }
    );
    match run_command(cli.command) {
        Ok(Some(payload)) => print_json(&payload),
        Ok(None) => Ok(()),
        Err(err) if json_mode => {
            print_json(&failure_json(&err))?;
            std::process::exit(1);
        }
        Err(err) => Err(err),
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            experiment,
            mut selectors,
            cores,
            workdir,
            dry_run,
            json,
        } => {
            let file = load_experiment_file(&experiment)?;
            tracing::debug!(path = %experiment.display(), stages = file.stages.len(), "loaded experiment file");
            let config = runner_config(&file, &experiment, workdir, cores);
            if dry_run {
                selectors.push(config.dry_run_selector.clone());
            }
            let mut registry = Registry::new(config);
            let mut reports = Vec::new();
            for (idx, stage) in file.stages.iter().enumerate() {
                declare_stage(&mut registry, &stage.experiments, !json)?;
                let report = registry.run(&selectors)?;
                if !json {
                    print_report(idx, &report);
                }
                let cancelled = report.cancelled;
                reports.push(report);
                if cancelled {
                    break;
                }
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "stages": reports,
                })));
            }
        }
        Commands::Describe {
            experiment,
            workdir,
            json,
        } => {
            let file = load_experiment_file(&experiment)?;
            let config = runner_config(&file, &experiment, workdir, None);
            let mut stages = Vec::new();
            for stage in &file.stages {
                let mut registry = Registry::new(config.clone());
                declare_stage(&mut registry, &stage.experiments, false)?;
                stages.push(registry.plan()?);
                registry.discard_pending();
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "stages": stages,
                })));
            }
            for (idx, plan) in stages.iter().enumerate() {
                println!("stage {}", idx + 1);
                print_table(plan);
            }
        }
    }
    Ok(None)
}

fn runner_config(
    file: &ExperimentFile,
    experiment_path: &Path,
    workdir: Option<PathBuf>,
    cores: Option<usize>,
) -> RunnerConfig {
    let mut config = RunnerConfig::default();
    let base = experiment_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.workdir.clone());
    if let Some(dir) = workdir {
        config.workdir = dir;
    } else if let Some(dir) = &file.workdir {
        config.workdir = base.join(dir);
    }
    if let Some(c) = cores.or(file.cores) {
        config = config.with_cores(c);
    }
    config
}

fn declare_stage(registry: &mut Registry, entries: &[Entry], print_sections: bool) -> Result<()> {
    let workdir = registry.config().workdir.clone();
    for entry in entries {
        match entry {
            Entry::Section { section } => {
                if print_sections {
                    registry.section(section);
                }
            }
            Entry::Experiment(decl) => {
                registry.group(decl.group.as_deref().unwrap_or(DEFAULT_GROUP));
                registry.add(decl.to_experiment(&workdir)?);
            }
        }
    }
    Ok(())
}

fn print_report(stage: usize, report: &DispatchReport) {
    println!("stage {}", stage + 1);
    print_table(&report.experiments);
    if report.dry_run {
        println!("dry run: just printing, no doing");
        for exp in report.experiments.iter().filter(|e| !e.commands.is_empty()) {
            println!("commands for experiment {}", exp.label);
            for cmd in &exp.commands {
                println!("{}", cmd);
            }
        }
    }
    for exp in &report.experiments {
        for failure in &exp.tally.failures {
            println!("failed: {}", failure);
        }
    }
    println!(
        "generated in {:.2}s, ran {} commands in {:.2}s ({} unexpected return codes)",
        report.generate_ms as f64 / 1000.0,
        report.executed(),
        report.execute_ms as f64 / 1000.0,
        report.violations()
    );
    if report.cancelled {
        println!("cancelled");
    }
}

fn print_table(experiments: &[ExperimentReport]) {
    let width = experiments
        .iter()
        .flat_map(|e| std::iter::once(e.group.len()).chain(e.names.iter().map(|n| n.len())))
        .max()
        .unwrap_or(0)
        + 5;
    println!("{:<width$}{:>10}{:>10}{:>10}", "", "todo", "skipped", "total", width = width);
    let mut current_group: Option<&str> = None;
    for exp in experiments {
        if current_group != Some(exp.group.as_str()) {
            println!("{}", exp.group);
            current_group = Some(exp.group.as_str());
        }
        let name = if exp.names.is_empty() {
            exp.label.clone()
        } else {
            exp.names.join(", ")
        };
        println!(
            "{:<width$}{:>10}{:>10}{:>10}",
            format!(" - {}", name),
            exp.todo,
            exp.skipped,
            exp.total,
            width = width
        );
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// `{ok: false, error: {kind, experiment?, message}}`; declaration mistakes
/// are reported separately from I/O and parse failures.
fn failure_json(err: &anyhow::Error) -> Value {
    match err.downcast_ref::<DispatchError>() {
        Some(DispatchError::Spec { experiment, source }) => json!({
            "ok": false,
            "error": {
                "kind": "spec_error",
                "experiment": experiment,
                "message": source.to_string(),
            }
        }),
        None => json!({
            "ok": false,
            "error": {
                "kind": "command_failed",
                "message": format!("{:#}", err),
            }
        }),
    }
}
