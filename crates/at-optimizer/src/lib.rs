//! # at-optimizer
//!
//! Black-box parameter search for Autotune.
//!
//! Provides the search algorithm interface with an exhaustive sweep for small
//! spaces and a tabu search for large ones, the objective registry and
//! evaluator with multi-objective scalarization, built-in objectives, trial
//! tracking, and the experiment controller tying them to a target.

mod builtin;
mod experiment;
mod objective;
mod search;
mod tabu;
mod trial;

pub use builtin::{
    last_number, parse_objective_spec, ElapsedObjective, NumberObjective, NumberSource,
    RecordTemplate,
};
pub use experiment::{Experiment, ExperimentEvent, ExperimentReport, StopHandle};
pub use objective::{reduce_dimensions, EvaluationResult, ObjectiveEvaluator, ObjectiveRegistry};
pub use search::{
    Algorithm, AlgorithmKind, BestRecord, ExhaustiveSweep, SearchAlgorithm, Termination,
    WORST_FITNESS,
};
pub use tabu::{MoveRecord, NeighbourOrder, TabuAttribute, TabuConfig, TabuSearch};
pub use trial::{
    ExperimentConfig, ExperimentId, ExperimentState, ExperimentStatus, FailurePolicy,
    ObjectiveDirection, TrialRecord, TrialStatus,
};
