//! Experiment configuration, lifecycle status and per-trial records.

use at_types::{Candidate, ConfigurationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::objective::EvaluationResult;
use crate::search::BestRecord;
use crate::tabu::TabuConfig;

/// Unique experiment identifier.
pub type ExperimentId = Uuid;

/// Whether a single scalar objective is maximized or minimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

impl ObjectiveDirection {
    /// Map a raw objective value onto "higher is better".
    pub fn orient(self, value: f64) -> f64 {
        match self {
            Self::Maximize => value,
            Self::Minimize => -value,
        }
    }
}

/// What the controller feeds the search when a candidate cannot be scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Score the candidate with the worst possible fitness and carry on.
    #[default]
    WorstFitness,
    /// Re-run the target up to `attempts` more times, then fall back to the
    /// worst fitness.
    Retry { attempts: usize },
    /// Stop the experiment on the first failed candidate.
    Abort,
}

/// Top-level configuration for an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub id: ExperimentId,
    pub name: String,

    /// Spaces with fewer candidates than this are swept exhaustively.
    pub sweep_cutoff: usize,

    pub tabu: TabuConfig,

    /// Explicit first candidate, overriding the algorithm's own choice.
    pub start: Option<Candidate>,

    pub failure_policy: FailurePolicy,

    /// Direction of a single scalar objective. Scalarized results are
    /// always minimized distances.
    pub direction: ObjectiveDirection,

    /// Scalarize even when only one objective is registered.
    pub all_results: bool,

    /// Worker hint passed to every objective.
    pub threads: usize,

    /// Run objectives concurrently within an iteration.
    pub parallel_objectives: bool,

    /// Seeds the starting-point sample and, unless the tabu config carries
    /// its own, the tabu search.
    pub seed: Option<u64>,

    pub created_at: DateTime<Utc>,
}

impl ExperimentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            sweep_cutoff: 100,
            tabu: TabuConfig::default(),
            start: None,
            failure_policy: FailurePolicy::default(),
            direction: ObjectiveDirection::Maximize,
            all_results: false,
            threads: 1,
            parallel_objectives: true,
            seed: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_sweep_cutoff(mut self, cutoff: usize) -> Self {
        self.sweep_cutoff = cutoff;
        self
    }

    pub fn with_tabu(mut self, tabu: TabuConfig) -> Self {
        self.tabu = tabu;
        self
    }

    pub fn with_start(mut self, start: Candidate) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_all_results(mut self, all_results: bool) -> Self {
        self.all_results = all_results;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_parallel_objectives(mut self, parallel: bool) -> Self {
        self.parallel_objectives = parallel;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.sweep_cutoff == 0 {
            return Err(ConfigurationError::InvalidCutoff);
        }
        if self.threads == 0 {
            return Err(ConfigurationError::Other(
                "threads must be at least 1".to_string(),
            ));
        }
        self.tabu.validate()
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self::new("experiment")
    }
}

/// Lifecycle state for an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentState {
    Initializing,
    Iterating,
    Done,
    Cancelled,
    Failed,
}

impl ExperimentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

/// Aggregate status of an experiment, refreshed after every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStatus {
    pub id: ExperimentId,
    pub state: ExperimentState,
    pub iterations: usize,
    pub failures: usize,
    pub best: Option<BestRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExperimentStatus {
    pub fn new(id: ExperimentId) -> Self {
        Self {
            id,
            state: ExperimentState::Initializing,
            iterations: 0,
            failures: 0,
            best: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_iterating(&mut self) {
        self.state = ExperimentState::Iterating;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_done(&mut self) {
        self.state = ExperimentState::Done;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.state = ExperimentState::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = ExperimentState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Replace the best record if `candidate` strictly improves on it.
    pub fn update_best(&mut self, record: &BestRecord) -> bool {
        BestRecord::offer(&mut self.best, &record.candidate, record.fitness)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Running,
    Scored,
    Failed,
}

/// One candidate's evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub number: usize,
    pub candidate: Candidate,
    pub status: TrialStatus,
    /// The value fed to the search, maximize-oriented.
    pub fitness: Option<f64>,
    pub evaluation: Option<EvaluationResult>,
    pub error: Option<String>,
    /// Target runs spent on this candidate, retries included.
    pub attempts: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrialRecord {
    pub fn new(number: usize, candidate: Candidate) -> Self {
        Self {
            number,
            candidate,
            status: TrialStatus::Running,
            fitness: None,
            evaluation: None,
            error: None,
            attempts: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn mark_scored(&mut self, evaluation: EvaluationResult, fitness: f64) {
        self.status = TrialStatus::Scored;
        self.finished_at = Some(Utc::now());
        self.evaluation = Some(evaluation);
        self.fitness = Some(fitness);
    }

    pub fn mark_failed(&mut self, error: String, fitness: f64) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
        self.fitness = Some(fitness);
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}
