//! The experiment controller: start point, then target, evaluate, search,
//! repeated until the search finishes.

use at_types::{AtError, AtResult, Candidate, Target};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::objective::{EvaluationResult, ObjectiveEvaluator, ObjectiveRegistry};
use crate::search::{Algorithm, AlgorithmKind, BestRecord, SearchAlgorithm, Termination, WORST_FITNESS};
use crate::trial::{
    ExperimentConfig, ExperimentId, ExperimentState, ExperimentStatus, FailurePolicy, TrialRecord,
};

/// Requests cancellation of a running experiment from another thread.
///
/// The request is honoured at the next iteration boundary.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress notifications sent to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExperimentEvent {
    Started {
        id: ExperimentId,
        algorithm: AlgorithmKind,
        start: Candidate,
    },
    TrialCompleted {
        trial: usize,
        candidate: Candidate,
        fitness: f64,
    },
    TrialFailed {
        trial: usize,
        candidate: Candidate,
        error: String,
    },
    NewBest {
        trial: usize,
        best: BestRecord,
    },
    Finished {
        state: ExperimentState,
        best: Option<BestRecord>,
    },
}

/// Outcome of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub id: ExperimentId,
    pub name: String,
    pub algorithm: Option<AlgorithmKind>,
    pub algorithm_name: Option<String>,
    pub state: ExperimentState,
    pub termination: Option<Termination>,
    pub iterations: usize,
    pub failures: usize,
    pub best: Option<BestRecord>,
    pub trials: Vec<TrialRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExperimentReport {
    /// Pretty-printed JSON. Failed trials carry a `null` fitness.
    pub fn to_json(&self) -> AtResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Drives one target through one search.
pub struct Experiment<T: Target> {
    target: T,
    evaluator: ObjectiveEvaluator,
    config: ExperimentConfig,
    custom: Option<Box<dyn SearchAlgorithm>>,
    algorithm: Option<Algorithm>,
    status: ExperimentStatus,
    trials: Vec<TrialRecord>,
    subscribers: Vec<Sender<ExperimentEvent>>,
    stop: StopHandle,
}

impl<T: Target> Experiment<T> {
    pub fn new(target: T, registry: ObjectiveRegistry, config: ExperimentConfig) -> AtResult<Self> {
        config.validate()?;
        let evaluator =
            ObjectiveEvaluator::new(registry)?.with_parallel(config.parallel_objectives);
        Ok(Self {
            target,
            evaluator,
            status: ExperimentStatus::new(config.id),
            config,
            custom: None,
            algorithm: None,
            trials: Vec::new(),
            subscribers: Vec::new(),
            stop: StopHandle::default(),
        })
    }

    /// Drive a caller-supplied search instead of the sweep/tabu selection.
    pub fn with_algorithm(mut self, algorithm: Box<dyn SearchAlgorithm>) -> Self {
        self.custom = Some(algorithm);
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn status(&self) -> &ExperimentStatus {
        &self.status
    }

    pub fn trials(&self) -> &[TrialRecord] {
        &self.trials
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Receive every event from now on.
    pub fn subscribe(&mut self) -> Receiver<ExperimentEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: ExperimentEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Run until the search finishes, a stop is requested or a fatal error
    /// occurs. A fatal error leaves the experiment `Failed`; the partial
    /// report stays available through [`Experiment::report`].
    pub fn run(&mut self) -> AtResult<ExperimentReport> {
        if self.status.state != ExperimentState::Initializing {
            return Err(at_types::internal_error!(
                "experiment {} has already run",
                self.config.id
            ));
        }

        match self.iterate() {
            Ok(()) => Ok(self.report()),
            Err(err) => {
                error!(experiment = %self.config.id, error = %err, "experiment failed");
                self.status.mark_failed(err.to_string());
                let best = self.status.best.clone();
                self.emit(ExperimentEvent::Finished {
                    state: ExperimentState::Failed,
                    best,
                });
                Err(err)
            }
        }
    }

    fn initialize(&mut self) -> AtResult<(Algorithm, Candidate)> {
        let space = self.target.parameter_space().clone();
        space.validate()?;

        let mut tabu = self.config.tabu.clone();
        if tabu.seed.is_none() {
            if let Some(seed) = self.config.seed {
                tabu = tabu.with_seed(seed);
            }
        }
        let mut algorithm = match self.custom.take() {
            Some(custom) => Algorithm::Custom(custom),
            None => Algorithm::select(&space, self.config.sweep_cutoff, &tabu)?,
        };

        let own = if algorithm.knows_starting_point() {
            algorithm.select_starting_point()
        } else {
            None
        };
        let start = match (&self.config.start, own) {
            (Some(start), _) => {
                space.check_candidate(start)?;
                start.clone()
            }
            (None, Some(own)) => own,
            (None, None) => {
                let mut rng = match self.config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_os_rng(),
                };
                space.sample(&mut rng)
            }
        };
        algorithm.start(start.clone());

        info!(
            experiment = %self.config.id,
            target_name = self.target.name(),
            algorithm = algorithm.name(),
            candidates = ?space.size(),
            start = %start,
            "experiment initialized"
        );
        Ok((algorithm, start))
    }

    fn iterate(&mut self) -> AtResult<()> {
        let (algorithm, start) = self.initialize()?;
        let kind = algorithm.kind();
        self.algorithm = Some(algorithm);
        self.status.mark_iterating();
        self.emit(ExperimentEvent::Started {
            id: self.config.id,
            algorithm: kind,
            start: start.clone(),
        });

        let mut candidate = start;
        loop {
            if self.stop.is_stopped() {
                info!(experiment = %self.config.id, iterations = self.status.iterations, "stop requested");
                self.status.mark_cancelled();
                break;
            }

            let fitness = self.step(&candidate)?;
            let Some(algorithm) = self.algorithm.as_mut() else {
                return Err(at_types::internal_error!("search algorithm missing"));
            };
            let next = algorithm.run(fitness);
            let finished = algorithm.finished();
            let best = algorithm.best().cloned();

            if let Some(best) = best {
                if self.status.update_best(&best) {
                    info!(fitness = best.fitness, candidate = %best.candidate, "new best");
                    let trial = self.status.iterations - 1;
                    self.emit(ExperimentEvent::NewBest { trial, best });
                }
            }
            if finished {
                self.status.mark_done();
                break;
            }
            candidate = next;
        }

        let termination = self.algorithm.as_ref().and_then(|a| a.termination());
        info!(
            experiment = %self.config.id,
            state = ?self.status.state,
            ?termination,
            iterations = self.status.iterations,
            failures = self.status.failures,
            "experiment finished"
        );
        let state = self.status.state;
        let best = self.status.best.clone();
        self.emit(ExperimentEvent::Finished { state, best });
        Ok(())
    }

    /// Evaluate one candidate under the failure policy and return the
    /// fitness to feed the search.
    fn step(&mut self, candidate: &Candidate) -> AtResult<f64> {
        let number = self.trials.len();
        let mut trial = TrialRecord::new(number, candidate.clone());
        let attempts = match self.config.failure_policy {
            FailurePolicy::Retry { attempts } => attempts + 1,
            _ => 1,
        };
        self.status.iterations += 1;

        let mut last_error = None;
        for attempt in 1..=attempts {
            trial.attempts = attempt;
            match self.attempt(candidate) {
                Ok(evaluation) => {
                    let fitness = evaluation.fitness(self.config.direction);
                    debug!(trial = number, candidate = %candidate, fitness, "trial scored");
                    trial.mark_scored(evaluation, fitness);
                    self.trials.push(trial);
                    self.emit(ExperimentEvent::TrialCompleted {
                        trial: number,
                        candidate: candidate.clone(),
                        fitness,
                    });
                    return Ok(fitness);
                }
                Err(err) if err.is_fatal() => {
                    trial.mark_failed(err.to_string(), WORST_FITNESS);
                    self.trials.push(trial);
                    self.status.failures += 1;
                    return Err(AtError::Trial {
                        trial: number,
                        candidate: candidate.to_string(),
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!(trial = number, attempt, candidate = %candidate, error = %err, "trial failed");
                    last_error = Some(err);
                }
            }
        }

        let err = last_error
            .unwrap_or_else(|| at_types::internal_error!("trial {number} made no attempts"));
        trial.mark_failed(err.to_string(), WORST_FITNESS);
        self.trials.push(trial);
        self.status.failures += 1;
        self.emit(ExperimentEvent::TrialFailed {
            trial: number,
            candidate: candidate.clone(),
            error: err.to_string(),
        });
        if self.config.failure_policy == FailurePolicy::Abort {
            return Err(AtError::Trial {
                trial: number,
                candidate: candidate.to_string(),
                source: Box::new(err),
            });
        }
        Ok(WORST_FITNESS)
    }

    fn attempt(&mut self, candidate: &Candidate) -> AtResult<EvaluationResult> {
        let run = self.target.run(candidate)?;
        self.evaluator.evaluate(
            &run.output,
            &run.outputs,
            self.config.threads,
            self.config.all_results,
        )
    }

    /// Snapshot of the experiment so far.
    pub fn report(&self) -> ExperimentReport {
        ExperimentReport {
            id: self.config.id,
            name: self.config.name.clone(),
            algorithm: self.algorithm.as_ref().map(Algorithm::kind),
            algorithm_name: self.algorithm.as_ref().map(|a| a.name().to_string()),
            state: self.status.state,
            termination: self.algorithm.as_ref().and_then(|a| a.termination()),
            iterations: self.status.iterations,
            failures: self.status.failures,
            best: self.status.best.clone(),
            trials: self.trials.clone(),
            started_at: self.status.started_at,
            finished_at: self.status.finished_at,
            error: self.status.error.clone(),
        }
    }
}
