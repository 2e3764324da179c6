use std::path::PathBuf;

use crate::output::LockPolicy;
use crate::select::DRY_RUN_SELECTOR;

pub const DEFAULT_CORES: usize = 4;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Worker pool size per experiment.
    pub cores: usize,
    /// Directory commands run in; relative output paths resolve against it.
    pub workdir: PathBuf,
    pub shell: String,
    pub dry_run_selector: String,
    pub lock: LockPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cores: DEFAULT_CORES,
            workdir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            shell: "sh".to_string(),
            dry_run_selector: DRY_RUN_SELECTOR.to_string(),
            lock: LockPolicy::default(),
        }
    }
}

impl RunnerConfig {
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores.max(1);
        self
    }
}
