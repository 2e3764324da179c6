//! Declare a space of shell invocations (a command template plus named
//! argument sets), then materialize, filter, execute and persist every
//! combination under a bounded worker pool.
//!
//! ```no_run
//! use sweep_runner::{ArgumentValue, Experiment, Registry, RunnerConfig};
//!
//! let mut reg = Registry::new(RunnerConfig::default());
//! reg.group("basics");
//! reg.add(
//!     Experiment::new("sum", "echo $(([[a]] + [[b]]))")
//!         .arg("a", ArgumentValue::list([1, 2]))
//!         .arg("b", ArgumentValue::list([3, 4]))
//!         .stdout_file("output/sums.txt")
//!         .stdout_res("[[a]] + [[b]] = [[stdout]]"),
//! );
//! let report = reg.run(std::env::args().skip(1)).expect("valid experiments");
//! println!("executed {} runs", report.executed());
//! ```

pub mod bindings;
pub mod blob;
pub mod config;
pub mod error;
pub mod exec;
pub mod experiment;
pub mod files;
pub mod output;
pub mod plan;
pub mod registry;
pub mod resolve;
pub mod schedule;
pub mod select;

pub use bindings::Bindings;
pub use blob::Blob;
pub use config::RunnerConfig;
pub use error::{DispatchError, SpecError};
pub use exec::{CommandRunner, ExecOutcome, ShellRunner};
pub use experiment::{ArgumentValue, Experiment, ExperimentOptions};
pub use files::files_matching;
pub use output::{LockPolicy, OutputWriter};
pub use plan::{HeaderSource, Run};
pub use registry::{DispatchReport, ExperimentReport, Registry};
pub use schedule::RunTally;
pub use select::Selection;
