use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crate::exec::{CommandRunner, ExecOutcome, ReturnCode};
use crate::output::{OutputWriter, WriteOutcome};
use crate::plan::{HeaderSource, Run};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Command accepted; nothing to write.
    Done,
    Written(WriteOutcome),
    /// Return code outside the allowed set; output suppressed.
    Violation(Option<i32>),
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTally {
    pub executed: usize,
    pub written: usize,
    pub headers: usize,
    pub violations: usize,
    pub failures: Vec<String>,
}

impl RunTally {
    fn record(&mut self, status: RunStatus) {
        match status {
            RunStatus::Done => self.executed += 1,
            RunStatus::Written(w) => {
                self.executed += 1;
                self.written += 1;
                if w.header_written {
                    self.headers += 1;
                }
            }
            RunStatus::Violation(_) => {
                self.executed += 1;
                self.violations += 1;
            }
            RunStatus::Failed(msg) => self.failures.push(msg),
        }
    }

    fn merge(&mut self, other: RunTally) {
        self.executed += other.executed;
        self.written += other.written;
        self.headers += other.headers;
        self.violations += other.violations;
        self.failures.extend(other.failures);
    }
}

/// Bounded worker pool for the runs of one experiment.
///
/// Workers pull the next run index from a shared counter, so there is no
/// ordering among runs. `dispatch` returns only once every worker is idle.
pub struct Scheduler<'a> {
    pub runner: &'a dyn CommandRunner,
    pub writer: &'a OutputWriter,
    pub workdir: &'a Path,
    pub cores: usize,
    pub cancel: &'a AtomicBool,
}

impl Scheduler<'_> {
    pub fn dispatch(&self, runs: &[Run]) -> RunTally {
        let next = AtomicUsize::new(0);
        let workers = self.cores.max(1).min(runs.len());
        let mut tally = RunTally::default();
        thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| s.spawn(|| self.worker(runs, &next)))
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(t) => tally.merge(t),
                    Err(_) => tally.failures.push("worker thread panicked".to_string()),
                }
            }
        });
        tally
    }

    fn worker(&self, runs: &[Run], next: &AtomicUsize) -> RunTally {
        let mut tally = RunTally::default();
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }
            let idx = next.fetch_add(1, Ordering::SeqCst);
            let Some(run) = runs.get(idx) else {
                break;
            };
            tally.record(self.execute_run(run));
        }
        tally
    }

    pub fn execute_run(&self, run: &Run) -> RunStatus {
        let outcome = match self.runner.execute(&run.command, self.workdir) {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(command = %run.command, error = %format!("{:#}", e), "run failed to start");
                return RunStatus::Failed(format!("{}: {:#}", run.command, e));
            }
        };
        if !run.accepts(outcome.code) {
            tracing::warn!(
                command = %run.command,
                code = %ReturnCode(outcome.code),
                stderr = %outcome.stderr.trim(),
                "unexpected return code; output not written"
            );
            return RunStatus::Violation(outcome.code);
        }
        let Some(path) = &run.stdout_file else {
            return RunStatus::Done;
        };
        match self.write_output(run, path, &outcome) {
            Ok(w) => RunStatus::Written(w),
            Err(e) => {
                tracing::error!(
                    command = %run.command,
                    path = %path.display(),
                    error = %format!("{:#}", e),
                    "failed to write run output"
                );
                RunStatus::Failed(format!("{}: {:#}", path.display(), e))
            }
        }
    }

    fn write_output(&self, run: &Run, path: &Path, outcome: &ExecOutcome) -> Result<WriteOutcome> {
        let payload = run.payload(outcome)?;
        self.writer.append(path, || self.header(run), &payload)
    }

    fn header(&self, run: &Run) -> Result<Option<String>> {
        let raw = match &run.header {
            None => return Ok(None),
            Some(HeaderSource::Text(text)) => text.clone(),
            Some(HeaderSource::Command(cmd)) => {
                let out = self.runner.execute(cmd, self.workdir)?;
                if !out.success() {
                    tracing::warn!(command = %cmd, code = %ReturnCode(out.code), "header command failed");
                }
                out.stdout.trim().to_string()
            }
        };
        Ok(Some(run.finish_header(&raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{ArgumentValue, Experiment};
    use crate::resolve::generate;
    use chrono::Utc;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::Context;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::Layer;

    /// Counts `WARN` events seen on the current thread.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Echoes a fixed stdout per command and records what ran.
    struct FakeRunner {
        calls: Mutex<Vec<String>>,
        code: i32,
    }

    impl FakeRunner {
        fn new(code: i32) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                code,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls").clone()
        }
    }

    impl CommandRunner for FakeRunner {
        fn execute(&self, command: &str, _workdir: &Path) -> Result<ExecOutcome> {
            self.calls.lock().expect("calls").push(command.to_string());
            let stdout = command.strip_prefix("say ").unwrap_or("").to_string();
            Ok(ExecOutcome {
                command: command.to_string(),
                code: Some(self.code),
                stdout: format!("{}\n", stdout),
                stderr: "err".to_string(),
            })
        }
    }

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sweep_schedule_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("scratch dir");
        dir
    }

    #[test]
    fn shared_file_gets_one_header_and_all_payloads() {
        let root = scratch("shared");
        let runner = FakeRunner::new(0);
        let writer = OutputWriter::default();
        let cancel = AtomicBool::new(false);
        let exp = Experiment::new("algo", "say [[input]]")
            .arg("input", ArgumentValue::list(["f1", "f2", "f3", "f4", "f5"]))
            .stdout_file("output.csv")
            .header_command("say col");
        let runs = generate(&exp, &root).expect("generate");
        let scheduler = Scheduler {
            runner: &runner,
            writer: &writer,
            workdir: &root,
            cores: 4,
            cancel: &cancel,
        };
        let tally = scheduler.dispatch(&runs);
        assert_eq!(tally.executed, 5);
        assert_eq!(tally.written, 5);
        assert_eq!(tally.headers, 1);

        let content = fs::read_to_string(root.join("output.csv")).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "col");
        let mut rest: Vec<&str> = lines[1..].to_vec();
        rest.sort();
        assert_eq!(rest, vec!["f1", "f2", "f3", "f4", "f5"]);
        let header_runs = runner.calls().iter().filter(|c| *c == "say col").count();
        assert_eq!(header_runs, 1);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn violation_suppresses_write() {
        let root = scratch("violation");
        let runner = FakeRunner::new(2);
        let writer = OutputWriter::default();
        let cancel = AtomicBool::new(false);
        let exp = Experiment::new("e", "say x").stdout_file("out/x.txt");
        let runs = generate(&exp, &root).expect("generate");
        let scheduler = Scheduler {
            runner: &runner,
            writer: &writer,
            workdir: &root,
            cores: 2,
            cancel: &cancel,
        };
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        let status = tracing::subscriber::with_default(subscriber, || scheduler.execute_run(&runs[0]));
        assert_eq!(status, RunStatus::Violation(Some(2)));
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        assert!(!root.join("out/x.txt").exists());
        assert!(!root.join("out").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn cancelled_pool_takes_no_runs() {
        let root = scratch("cancel");
        let runner = FakeRunner::new(0);
        let writer = OutputWriter::default();
        let cancel = AtomicBool::new(true);
        let exp = Experiment::new("e", "say [[i]]").arg("i", ArgumentValue::list(0..10));
        let runs = generate(&exp, &root).expect("generate");
        let scheduler = Scheduler {
            runner: &runner,
            writer: &writer,
            workdir: &root,
            cores: 3,
            cancel: &cancel,
        };
        assert_eq!(scheduler.dispatch(&runs), RunTally::default());
        assert!(runner.calls().is_empty());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn every_run_executes_exactly_once() {
        let root = scratch("once");
        let runner = FakeRunner::new(0);
        let writer = OutputWriter::default();
        let cancel = AtomicBool::new(false);
        let exp = Experiment::new("e", "say [[i]]").arg("i", ArgumentValue::list(0..40));
        let runs = generate(&exp, &root).expect("generate");
        let scheduler = Scheduler {
            runner: &runner,
            writer: &writer,
            workdir: &root,
            cores: 4,
            cancel: &cancel,
        };
        let tally = scheduler.dispatch(&runs);
        assert_eq!(tally.executed, 40);
        let mut calls = runner.calls();
        calls.sort();
        calls.dedup();
        assert_eq!(calls.len(), 40);
        let _ = fs::remove_dir_all(root);
    }
}
