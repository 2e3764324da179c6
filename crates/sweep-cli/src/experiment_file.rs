use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use sweep_runner::{files_matching, ArgumentValue, Experiment};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentFile {
    #[serde(default)]
    pub cores: Option<usize>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    pub stages: Vec<Stage>,
}

/// Experiments dispatched by one `run()` call.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    #[serde(default)]
    pub experiments: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    Section { section: String },
    Experiment(Box<ExperimentDecl>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentDecl {
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: serde_yaml::Mapping,
    #[serde(default)]
    pub creates_file: Option<String>,
    #[serde(default)]
    pub stdout_file: Option<String>,
    #[serde(default)]
    pub stdout_res: Option<String>,
    #[serde(default)]
    pub header_string: Option<String>,
    #[serde(default)]
    pub header_command: Option<String>,
    #[serde(default)]
    pub allowed_return_codes: Option<Vec<i32>>,
    #[serde(default)]
    pub return_string: Option<String>,
}

pub fn load_experiment_file(path: &Path) -> Result<ExperimentFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_experiment_file(&raw).with_context(|| format!("invalid experiment file {}", path.display()))
}

pub fn parse_experiment_file(raw: &str) -> Result<ExperimentFile> {
    let file: ExperimentFile = serde_yaml::from_str(raw)?;
    if file.stages.is_empty() {
        return Err(anyhow!("missing /stages: at least one stage is required"));
    }
    Ok(file)
}

impl ExperimentDecl {
    /// Builds the library experiment. `{glob: pattern}` arguments are listed
    /// against `workdir` now, so call this only once earlier stages drained.
    pub fn to_experiment(&self, workdir: &Path) -> Result<Experiment> {
        let mut exp = Experiment::new(self.name.as_str(), self.command.as_str());
        for (key, value) in self.args.iter() {
            let key = key
                .as_str()
                .ok_or_else(|| anyhow!("experiment `{}`: argument names must be strings", self.name))?;
            exp = exp.arg(key, argument_value(value, workdir)?);
        }
        if let Some(v) = &self.creates_file {
            exp = exp.creates_file(v.as_str());
        }
        if let Some(v) = &self.stdout_file {
            exp = exp.stdout_file(v.as_str());
        }
        if let Some(v) = &self.stdout_res {
            exp = exp.stdout_res(v.as_str());
        }
        if let Some(v) = &self.header_string {
            exp = exp.header_string(v.as_str());
        }
        if let Some(v) = &self.header_command {
            exp = exp.header_command(v.as_str());
        }
        if let Some(codes) = &self.allowed_return_codes {
            exp = exp.allowed_return_codes(codes.iter().copied());
        }
        if let Some(v) = &self.return_string {
            exp = exp.return_string(v.as_str());
        }
        Ok(exp)
    }
}

fn argument_value(value: &serde_yaml::Value, workdir: &Path) -> Result<ArgumentValue> {
    if let serde_yaml::Value::Mapping(map) = value {
        if let (1, Some(pattern)) = (map.len(), map.get("glob")) {
            let pattern = pattern
                .as_str()
                .ok_or_else(|| anyhow!("`glob` argument must be a string pattern"))?;
            return Ok(ArgumentValue::list(files_matching(workdir, pattern)?));
        }
    }
    Ok(match value {
        serde_yaml::Value::Sequence(items) => ArgumentValue::List(
            items
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<Value>, _>>()?,
        ),
        other => ArgumentValue::Literal(serde_json::to_value(other)?),
    })
}
