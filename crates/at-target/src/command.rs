//! Runs a declared external program once per candidate.

use at_types::{
    AtResult, Candidate, ExecutionError, ParameterSpace, RawOutput, Target, TargetRun,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::declaration::TargetDeclaration;
use crate::outputs::resolve_all;

/// Lines of stderr kept in an [`ExecutionError::ExitStatus`].
const STDERR_TAIL_LINES: usize = 20;

/// Target backed by an external command.
///
/// Every run gets its own directory `<run_root>/run-NNNN`, which becomes the
/// program's working directory and holds `stdout.log` and `stderr.log`.
#[derive(Debug)]
pub struct CommandTarget {
    declaration: TargetDeclaration,
    space: ParameterSpace,
    run_root: PathBuf,
    runs: usize,
    poll_interval: Duration,
}

impl CommandTarget {
    pub fn new(declaration: TargetDeclaration, run_root: impl Into<PathBuf>) -> AtResult<Self> {
        declaration.validate()?;
        let space = declaration.parameter_space()?;
        let mut run_root = run_root.into();
        if run_root.is_relative() {
            run_root = std::env::current_dir()?.join(run_root);
        }
        std::fs::create_dir_all(&run_root)?;
        Ok(Self {
            declaration,
            space,
            run_root,
            runs: 0,
            poll_interval: Duration::from_millis(50),
        })
    }

    /// How often a timed run is checked for completion.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn declaration(&self) -> &TargetDeclaration {
        &self.declaration
    }

    pub fn run_root(&self) -> &Path {
        &self.run_root
    }

    /// Number of runs started so far.
    pub fn runs(&self) -> usize {
        self.runs
    }

    fn command(&self, argv: &[String], workdir: &Path) -> Result<(Command, String), ExecutionError> {
        let failed = |e: std::io::Error| ExecutionError::Failed {
            message: format!("cannot create log files in {}: {e}", workdir.display()),
        };
        let stdout = File::create(workdir.join("stdout.log")).map_err(failed)?;
        let stderr = File::create(workdir.join("stderr.log")).map_err(failed)?;

        let (mut command, program) = if self.declaration.shell {
            let mut command = Command::new("sh");
            command.arg("-c").arg(argv.join(" "));
            (command, "sh".to_string())
        } else {
            let program = argv[0].clone();
            let mut command = Command::new(&program);
            command.args(&argv[1..]);
            (command, program)
        };
        command
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        Ok((command, program))
    }

    fn wait(&self, child: &mut Child, program: &str) -> Result<ExitStatus, ExecutionError> {
        let failed = |e: std::io::Error| ExecutionError::Failed {
            message: format!("waiting for {program}: {e}"),
        };
        let Some(timeout_secs) = self.declaration.timeout_secs else {
            return child.wait().map_err(failed);
        };
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            if let Some(status) = child.try_wait().map_err(failed)? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                // the child may exit between try_wait and kill
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecutionError::Timeout {
                    program: program.to_string(),
                    timeout_secs,
                });
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

fn read_log(path: &Path) -> String {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

impl Target for CommandTarget {
    fn name(&self) -> &str {
        &self.declaration.name
    }

    fn parameter_space(&self) -> &ParameterSpace {
        &self.space
    }

    fn run(&mut self, candidate: &Candidate) -> Result<TargetRun, ExecutionError> {
        self.runs += 1;
        let workdir = self.run_root.join(format!("run-{:04}", self.runs));
        std::fs::create_dir_all(&workdir).map_err(|e| ExecutionError::Failed {
            message: format!("cannot create {}: {e}", workdir.display()),
        })?;

        let argv = self
            .declaration
            .render(candidate, &workdir)
            .map_err(|message| ExecutionError::Failed { message })?;
        let (mut command, program) = self.command(&argv, &workdir)?;
        debug!(target_name = %self.declaration.name, run = self.runs, command = ?argv, "spawning");

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| ExecutionError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;
        let status = self.wait(&mut child, &program)?;
        let elapsed = started.elapsed();

        let stdout = read_log(&workdir.join("stdout.log"));
        let stderr = read_log(&workdir.join("stderr.log"));
        debug!(run = self.runs, code = ?status.code(), elapsed_ms = elapsed.as_millis() as u64, "run finished");

        if !status.success() {
            return Err(ExecutionError::ExitStatus {
                program,
                code: status.code(),
                stderr: tail(&stderr, STDERR_TAIL_LINES),
            });
        }

        let outputs = resolve_all(&workdir, &self.declaration.outputs);
        Ok(TargetRun {
            output: RawOutput {
                stdout,
                stderr,
                exit_code: status.code(),
                elapsed,
                workdir: Some(workdir),
            },
            outputs,
        })
    }
}
