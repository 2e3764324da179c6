use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::bindings::Bindings;
use crate::blob::{substitute, Blob};
use crate::error::SpecError;
use crate::exec::ExecOutcome;
use crate::experiment::{Experiment, HeaderModFn, StdoutModFn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderSource {
    Text(String),
    /// Command whose trimmed stdout is the header.
    Command(String),
}

/// One fully resolved, executable unit.
///
/// Everything except `stdout_res` is rendered at generation time; that blob
/// needs the captured output and is evaluated after the command finishes.
#[derive(Clone)]
pub struct Run {
    pub name: String,
    pub group: String,
    pub command: String,
    pub args: Bindings,
    pub creates_file: Option<PathBuf>,
    pub stdout_file: Option<PathBuf>,
    pub header: Option<HeaderSource>,
    pub allowed_return_codes: BTreeSet<i32>,
    pub returned: Option<String>,
    stdout_mod: Option<Arc<StdoutModFn>>,
    stdout_res: Option<Blob>,
    header_mod: Option<Arc<HeaderModFn>>,
}

impl Run {
    pub fn build(experiment: &Experiment, args: Bindings, workdir: &Path) -> Result<Self, SpecError> {
        let o = &experiment.options;
        let path = |blob: &Option<Blob>| -> Result<Option<PathBuf>, SpecError> {
            Ok(render_opt(blob, &args)?.map(|p| workdir.join(p)))
        };
        let creates_file = path(&o.creates_file)?;
        let stdout_file = path(&o.stdout_file)?;
        let header = match render_opt(&o.header_command, &args)? {
            Some(cmd) => Some(HeaderSource::Command(cmd)),
            None => render_opt(&o.header_string, &args)?.map(HeaderSource::Text),
        };
        Ok(Run {
            name: experiment.name.render(&args)?,
            group: experiment.group.clone(),
            command: experiment.command.render(&args)?,
            creates_file,
            stdout_file,
            header,
            allowed_return_codes: o.allowed_return_codes.clone(),
            returned: render_opt(&o.return_string, &args)?,
            stdout_mod: o.stdout_mod.clone(),
            stdout_res: o.stdout_res.clone(),
            header_mod: o.header_mod.clone(),
            args,
        })
    }

    /// Path that decides skipping and output locking.
    pub fn target(&self) -> Option<&Path> {
        self.creates_file
            .as_deref()
            .or(self.stdout_file.as_deref())
    }

    pub fn accepts(&self, code: Option<i32>) -> bool {
        if self.allowed_return_codes.is_empty() {
            return true;
        }
        code.map(|c| self.allowed_return_codes.contains(&c))
            .unwrap_or(false)
    }

    /// Final text written for a finished command.
    ///
    /// Starts from the trimmed stdout, applies `stdout_mod` (placeholders in
    /// its result see `stdout` as the raw output), then `stdout_res` with
    /// `stdout` bound to the current payload.
    pub fn payload(&self, outcome: &ExecOutcome) -> Result<String, SpecError> {
        let stdout = outcome.stdout.trim();
        let mut payload = stdout.to_string();
        if let Some(stdout_mod) = &self.stdout_mod {
            let args = self.with_stdout(stdout);
            payload = substitute(&stdout_mod(stdout, outcome), &args)?;
        }
        if let Some(res) = &self.stdout_res {
            let args = self.with_stdout(&payload);
            payload = res.render(&args)?;
        }
        Ok(payload)
    }

    pub fn finish_header(&self, raw: &str) -> String {
        match &self.header_mod {
            Some(f) => f(raw),
            None => raw.to_string(),
        }
    }

    fn with_stdout(&self, stdout: &str) -> Bindings {
        let mut args = self.args.clone();
        args.insert("stdout", Value::String(stdout.to_string()));
        args
    }
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("command", &self.command)
            .field("creates_file", &self.creates_file)
            .field("stdout_file", &self.stdout_file)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

fn render_opt(blob: &Option<Blob>, args: &Bindings) -> Result<Option<String>, SpecError> {
    blob.as_ref().map(|b| b.render(args)).transpose()
}

/// Whether the run's target already exists. Checked once, when the
/// experiment's runs are generated; a path created later by a sibling run
/// does not retroactively skip anything.
pub fn is_skipped(run: &Run) -> bool {
    run.target().map(Path::exists).unwrap_or(false)
}

/// Splits runs into (to do, skipped count).
pub fn partition_skipped(runs: Vec<Run>) -> (Vec<Run>, usize) {
    let total = runs.len();
    let todo: Vec<Run> = runs.into_iter().filter(|r| !is_skipped(r)).collect();
    let skipped = total - todo.len();
    (todo, skipped)
}
