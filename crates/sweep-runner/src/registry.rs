use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::RunnerConfig;
use crate::error::DispatchError;
use crate::exec::{CommandRunner, ShellRunner};
use crate::experiment::{Experiment, DEFAULT_GROUP};
use crate::output::OutputWriter;
use crate::plan::{partition_skipped, Run};
use crate::resolve::generate;
use crate::schedule::{RunTally, Scheduler};
use crate::select::Selection;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExperimentReport {
    pub label: String,
    pub group: String,
    /// Distinct resolved run names, in generation order.
    pub names: Vec<String>,
    pub total: usize,
    pub skipped: usize,
    pub todo: usize,
    pub selected: usize,
    #[serde(flatten)]
    pub tally: RunTally,
    /// Commands reported instead of executed in dry-run mode.
    pub commands: Vec<String>,
    pub returned: Vec<String>,
}

impl ExperimentReport {
    fn new(experiment: &Experiment, runs: &[Run]) -> Self {
        let mut names: Vec<String> = Vec::new();
        for run in runs {
            if !names.contains(&run.name) {
                names.push(run.name.clone());
            }
        }
        Self {
            label: experiment.label(),
            group: experiment.group.clone(),
            names,
            total: runs.len(),
            returned: runs.iter().filter_map(|r| r.returned.clone()).collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub dry_run: bool,
    pub cancelled: bool,
    pub experiments: Vec<ExperimentReport>,
    pub generate_ms: u64,
    pub execute_ms: u64,
}

impl DispatchReport {
    pub fn any_selected(&self) -> bool {
        self.experiments.iter().any(|e| e.selected > 0)
    }

    pub fn executed(&self) -> usize {
        self.experiments.iter().map(|e| e.tally.executed).sum()
    }

    pub fn violations(&self) -> usize {
        self.experiments.iter().map(|e| e.tally.violations).sum()
    }

    pub fn failures(&self) -> usize {
        self.experiments.iter().map(|e| e.tally.failures.len()).sum()
    }
}

/// Accumulates experiment declarations and dispatches them.
///
/// Each [`Registry::run`] consumes every experiment declared since the
/// previous call. All of them are generated and skip-checked before any run
/// executes; they are then dispatched one at a time in declaration order, each
/// draining completely before the next starts. Files written during one
/// `run()` call are only seen by experiments declared for a later call.
pub struct Registry {
    config: RunnerConfig,
    runner: Arc<dyn CommandRunner>,
    group: String,
    pending: Vec<Experiment>,
    cancel: Arc<AtomicBool>,
}

impl Registry {
    pub fn new(config: RunnerConfig) -> Self {
        let runner = Arc::new(ShellRunner::new(config.shell.clone()));
        Self::with_runner(config, runner)
    }

    pub fn with_runner(config: RunnerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            group: DEFAULT_GROUP.to_string(),
            pending: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn use_cores(&mut self, cores: usize) {
        self.config.cores = cores.max(1);
    }

    /// Group for every experiment added after this call.
    pub fn group(&mut self, label: impl Into<String>) {
        self.group = label.into();
    }

    pub fn section(&self, title: &str) {
        println!("{}", title);
    }

    pub fn add(&mut self, mut experiment: Experiment) {
        experiment.group = self.group.clone();
        for warning in experiment.option_warnings() {
            tracing::warn!(experiment = %experiment.label(), "{}", warning);
        }
        self.pending.push(experiment);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drops undispatched declarations, returning how many there were.
    pub fn discard_pending(&mut self) -> usize {
        std::mem::take(&mut self.pending).len()
    }

    /// Flag that stops dispatch once set: workers take no new runs and no
    /// further experiment is started. It stays set until cleared by the caller.
    ///
    /// The `sweep` binary installs no signal handler; embedders set this from
    /// their own Ctrl-C hook or watchdog thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Counts per pending experiment without executing or consuming anything.
    pub fn plan(&self) -> Result<Vec<ExperimentReport>, DispatchError> {
        let mut out = Vec::with_capacity(self.pending.len());
        for experiment in &self.pending {
            let runs = generate_runs(experiment, &self.config)?;
            let mut entry = ExperimentReport::new(experiment, &runs);
            let (todo, skipped) = partition_skipped(runs);
            entry.skipped = skipped;
            entry.todo = todo.len();
            out.push(entry);
        }
        Ok(out)
    }

    pub fn run<I, S>(&mut self, selectors: I) -> Result<DispatchReport, DispatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selection = Selection::new(selectors, &self.config.dry_run_selector);
        let experiments = std::mem::take(&mut self.pending);
        if selection.is_empty() {
            tracing::warn!("no experiment or group names given; nothing will run");
        }

        let writer = OutputWriter::new(self.config.lock.clone());
        let scheduler = Scheduler {
            runner: self.runner.as_ref(),
            writer: &writer,
            workdir: &self.config.workdir,
            cores: self.config.cores,
            cancel: &self.cancel,
        };
        let mut report = DispatchReport {
            dry_run: selection.dry_run(),
            ..DispatchReport::default()
        };

        let started = Instant::now();
        let mut prepared = Vec::with_capacity(experiments.len());
        for experiment in &experiments {
            let runs = generate_runs(experiment, &self.config)?;
            let mut entry = ExperimentReport::new(experiment, &runs);
            let (todo, skipped) = partition_skipped(runs);
            entry.skipped = skipped;
            entry.todo = todo.len();
            let eligible: Vec<Run> = todo
                .into_iter()
                .filter(|r| selection.selects(&r.name, &r.group))
                .collect();
            entry.selected = eligible.len();
            prepared.push((entry, eligible));
        }
        report.generate_ms = started.elapsed().as_millis() as u64;

        let mut prepared = prepared.into_iter();
        while let Some((mut entry, eligible)) = prepared.next() {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::warn!(experiment = %entry.label, "dispatch cancelled; not started");
                report.cancelled = true;
                report.experiments.push(entry);
                report.experiments.extend(prepared.by_ref().map(|(e, _)| e));
                break;
            }
            if eligible.is_empty() {
                report.experiments.push(entry);
                continue;
            }
            if selection.dry_run() {
                entry.commands = eligible.iter().map(|r| r.command.clone()).collect();
                report.experiments.push(entry);
                continue;
            }

            tracing::info!(
                experiment = %entry.label,
                group = %entry.group,
                runs = eligible.len(),
                skipped = entry.skipped,
                "dispatching"
            );
            let started = Instant::now();
            entry.tally = scheduler.dispatch(&eligible);
            report.execute_ms += started.elapsed().as_millis() as u64;
            tracing::info!(
                experiment = %entry.label,
                executed = entry.tally.executed,
                violations = entry.tally.violations,
                failures = entry.tally.failures.len(),
                "experiment finished"
            );
            if self.cancel.load(Ordering::SeqCst) {
                tracing::warn!(experiment = %entry.label, "dispatch cancelled during experiment");
                report.cancelled = true;
            }
            report.experiments.push(entry);
        }
        Ok(report)
    }
}

fn generate_runs(experiment: &Experiment, config: &RunnerConfig) -> Result<Vec<Run>, DispatchError> {
    generate(experiment, &config.workdir).map_err(|source| DispatchError::Spec {
        experiment: experiment.label(),
        source,
    })
}

impl Drop for Registry {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                pending = self.pending.len(),
                "experiments were added without calling run()"
            );
        }
    }
}
