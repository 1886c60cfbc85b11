//! The external program being tuned, as seen by the optimizer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ExecutionError;
use crate::parameter::{Candidate, ParameterSpace};

/// What the target program produced on one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    /// Directory the program ran in, when the target uses one per run.
    pub workdir: Option<PathBuf>,
}

/// A declared output artifact after the target resolved its pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredOutput {
    /// Glob pattern from the target declaration.
    pub pattern: String,
    /// Paths the pattern matched, possibly none.
    pub paths: Vec<PathBuf>,
}

/// Declared output key to resolved artifact.
pub type DeclaredOutputs = BTreeMap<String, DeclaredOutput>;

/// Output key to matched files, as handed to objectives.
pub type OutputFiles = BTreeMap<String, Vec<PathBuf>>;

/// Everything one target invocation hands back to the optimizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetRun {
    pub output: RawOutput,
    pub outputs: DeclaredOutputs,
}

/// A program that can be run with a candidate's parameter values.
///
/// `run` may block for the program's full runtime. Any failure to invoke it,
/// or an abnormal exit, is reported as an [`ExecutionError`].
pub trait Target: Send {
    fn name(&self) -> &str;

    fn parameter_space(&self) -> &ParameterSpace;

    fn run(&mut self, candidate: &Candidate) -> Result<TargetRun, ExecutionError>;
}
