use thiserror::Error;

/// Main error type for the Autotune system
#[derive(Error, Debug)]
pub enum AtError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Missing output: {0}")]
    MissingOutput(#[from] MissingOutputError),

    #[error("Objective error: {0}")]
    Objective(#[from] ObjectiveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Trial {trial} ({candidate}): {source}")]
    Trial {
        trial: usize,
        candidate: String,
        #[source]
        source: Box<AtError>,
    },
}

impl AtError {
    /// Whether the error must abort the whole experiment.
    ///
    /// Failures tied to a single candidate (the program could not run, an
    /// output file is absent, the output could not be scored) are not fatal:
    /// the controller's failure policy decides what to feed the search.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Execution(_) | Self::MissingOutput(_) => false,
            Self::Objective(err) => err.is_fatal(),
            Self::Trial { source, .. } => source.is_fatal(),
            _ => true,
        }
    }
}

/// Configuration errors, detected before the first iteration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Duplicate parameter: {name}")]
    DuplicateParameter { name: String },

    #[error("Parameter {name} lists {value} more than once")]
    DuplicateValue { name: String, value: String },

    #[error("Parameter {name} has an empty range")]
    EmptyRange { name: String },

    #[error("Invalid value for parameter {name}: {message}")]
    InvalidValue { name: String, message: String },

    #[error("Unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Candidate is missing parameter: {name}")]
    MissingParameter { name: String },

    #[error("Parameter space has no parameters")]
    EmptySpace,

    #[error("Sweep cutoff must be greater than zero")]
    InvalidCutoff,

    #[error("Tabu tenure must be at least one iteration")]
    InvalidTenure,

    #[error("Tabu search needs an iteration budget or a stall limit")]
    NoTermination,

    #[error("No objectives registered")]
    NoObjectives,

    #[error("Invalid target declaration: {message}")]
    InvalidDeclaration { message: String },

    #[error("{0}")]
    Other(String),
}

/// Failure to run the target program for one candidate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} exited with status {code:?}: {stderr}")]
    ExitStatus {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {timeout_secs} seconds")]
    Timeout { program: String, timeout_secs: u64 },

    #[error("Target failed: {message}")]
    Failed { message: String },
}

/// Why a declared output was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// The pattern matched no files.
    NotFound,
    /// A matched file has zero length.
    Empty,
}

impl std::fmt::Display for MissingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "no file matched"),
            Self::Empty => write!(f, "file is empty"),
        }
    }
}

/// A declared output artifact was absent or empty after a target run.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("output {key} (pattern {pattern}): {reason}")]
pub struct MissingOutputError {
    pub key: String,
    pub pattern: String,
    pub reason: MissingReason,
}

/// Errors raised by objective plugins.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObjectiveError {
    #[error("Objective {objective} does not implement scoring")]
    NotImplemented { objective: String },

    #[error("Objective {objective} is misconfigured: {message}")]
    Integration { objective: String, message: String },

    #[error("Objective {objective} is already registered")]
    DuplicateName { objective: String },

    #[error("Objective {objective} could not score the output: {message}")]
    InvalidOutput { objective: String, message: String },
}

impl ObjectiveError {
    /// Only unscorable program output is a per-iteration failure; everything
    /// else is a plugin defect.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidOutput { .. })
    }

    pub fn objective(&self) -> &str {
        match self {
            Self::NotImplemented { objective }
            | Self::Integration { objective, .. }
            | Self::DuplicateName { objective }
            | Self::InvalidOutput { objective, .. } => objective,
        }
    }
}

/// Result type alias for Autotune operations
pub type AtResult<T> = Result<T, AtError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::AtError::Config($crate::ConfigurationError::Other(format!($($arg)*)))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::AtError::Internal(format!($($arg)*))
    };
}
