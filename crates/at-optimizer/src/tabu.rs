//! Tabu search over a discrete parameter space.
//!
//! The search walks from a centre candidate to one of its one-parameter
//! neighbours. Every neighbour in the (possibly truncated) neighbourhood is
//! scored first, one proposal per `run`, then the centre moves to the best
//! admissible neighbour. Moving off a value makes that `parameter = value`
//! attribute tabu for `tenure` iterations, so the walk cannot immediately
//! undo a move; a tabu move is still taken when it beats the best fitness
//! recorded before the neighbourhood was opened (aspiration).
//!
//! Fitness of every evaluated candidate is memoised, so no candidate is ever
//! proposed twice. When the walk runs out of unscored neighbours it restarts
//! from a random unevaluated candidate.

use at_types::{Candidate, ConfigurationError, ParameterSpace, ParameterValue};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::search::{BestRecord, SearchAlgorithm, Termination, WORST_FITNESS};

/// Moves across fully scored neighbourhoods allowed before a restart.
const MAX_IDLE_MOVES: usize = 16;

/// Random draws attempted when looking for an unevaluated restart point.
const RESTART_SAMPLES: usize = 64;

/// Order in which a neighbourhood is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NeighbourOrder {
    /// Shuffled with the search's seeded RNG.
    #[default]
    Shuffled,
    /// Declaration order of parameters and values.
    Declared,
}

/// Hyperparameters of the tabu search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabuConfig {
    /// Iterations an abandoned attribute stays tabu.
    pub tenure: usize,
    /// Maximum number of neighbours scored around one centre.
    pub neighbourhood_size: usize,
    /// Stop after this many evaluations.
    pub max_iterations: Option<usize>,
    /// Stop after this many evaluations without a new best.
    pub stall_limit: Option<usize>,
    pub seed: Option<u64>,
    pub neighbour_order: NeighbourOrder,
}

impl Default for TabuConfig {
    fn default() -> Self {
        Self {
            tenure: 5,
            neighbourhood_size: 16,
            max_iterations: Some(200),
            stall_limit: Some(50),
            seed: None,
            neighbour_order: NeighbourOrder::Shuffled,
        }
    }
}

impl TabuConfig {
    pub fn with_tenure(mut self, tenure: usize) -> Self {
        self.tenure = tenure;
        self
    }

    pub fn with_neighbourhood_size(mut self, size: usize) -> Self {
        self.neighbourhood_size = size;
        self
    }

    pub fn with_max_iterations(mut self, n: Option<usize>) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_stall_limit(mut self, n: Option<usize>) -> Self {
        self.stall_limit = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_neighbour_order(mut self, order: NeighbourOrder) -> Self {
        self.neighbour_order = order;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.tenure == 0 {
            return Err(ConfigurationError::InvalidTenure);
        }
        if self.max_iterations.is_none() && self.stall_limit.is_none() {
            return Err(ConfigurationError::NoTermination);
        }
        if self.neighbourhood_size == 0 {
            return Err(ConfigurationError::Other(
                "tabu neighbourhood size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A `parameter = value` assignment, the unit the tabu list forbids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabuAttribute {
    pub parameter: String,
    pub value: ParameterValue,
}

#[derive(Debug, Clone)]
struct TabuEntry {
    attribute: TabuAttribute,
    expires_at: usize,
}

/// One move of the centre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Evaluations completed when the move was made.
    pub iteration: usize,
    pub parameter: String,
    pub from: ParameterValue,
    pub to: ParameterValue,
    pub fitness: f64,
    /// The attribute moved onto was tabu, and the move was taken because it
    /// beat the best fitness recorded before the neighbourhood opened.
    pub aspiration: bool,
}

#[derive(Debug, Clone)]
struct Neighbour {
    candidate: Candidate,
    /// The attribute this neighbour sets.
    attribute: TabuAttribute,
    fitness: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The last proposal is a fresh centre awaiting its score.
    ScoringCentre,
    /// The last proposal is a member of the centre's neighbourhood.
    ScoringNeighbours,
}

pub struct TabuSearch {
    space: ParameterSpace,
    config: TabuConfig,
    rng: StdRng,
    iteration: usize,
    current: Candidate,
    phase: Phase,
    centre: Candidate,
    centre_fitness: f64,
    neighbourhood: Vec<Neighbour>,
    pending: Option<usize>,
    best_before_neighbourhood: f64,
    memo: HashMap<Candidate, f64>,
    tabu: VecDeque<TabuEntry>,
    moves: Vec<MoveRecord>,
    best: Option<BestRecord>,
    since_improvement: usize,
    termination: Option<Termination>,
}

impl TabuSearch {
    pub fn new(space: ParameterSpace, config: TabuConfig) -> Result<Self, ConfigurationError> {
        space.validate()?;
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        // Placeholder until `start` names the real starting point.
        let current = space.sample(&mut rng);
        Ok(Self {
            centre: current.clone(),
            current,
            space,
            config,
            rng,
            iteration: 0,
            phase: Phase::ScoringCentre,
            centre_fitness: WORST_FITNESS,
            neighbourhood: Vec::new(),
            pending: None,
            best_before_neighbourhood: WORST_FITNESS,
            memo: HashMap::new(),
            tabu: VecDeque::new(),
            moves: Vec::new(),
            best: None,
            since_improvement: 0,
            termination: None,
        })
    }

    pub fn config(&self) -> &TabuConfig {
        &self.config
    }

    /// Evaluations consumed so far.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn centre(&self) -> &Candidate {
        &self.centre
    }

    pub fn centre_fitness(&self) -> f64 {
        self.centre_fitness
    }

    pub fn moves(&self) -> &[MoveRecord] {
        &self.moves
    }

    /// Number of distinct candidates evaluated.
    pub fn evaluated(&self) -> usize {
        self.memo.len()
    }

    /// Attributes that are tabu at the current iteration.
    pub fn tabu_attributes(&self) -> Vec<&TabuAttribute> {
        self.tabu
            .iter()
            .filter(|entry| entry.expires_at > self.iteration)
            .map(|entry| &entry.attribute)
            .collect()
    }

    pub fn is_tabu(&self, attribute: &TabuAttribute) -> bool {
        self.tabu
            .iter()
            .any(|entry| entry.expires_at > self.iteration && entry.attribute == *attribute)
    }

    /// Whether a scored neighbour may become the centre: `None` when it is
    /// tabu without aspiration, otherwise whether aspiration was needed.
    fn admissible(&self, attribute: &TabuAttribute, fitness: f64) -> Option<bool> {
        if !self.is_tabu(attribute) {
            Some(false)
        } else if fitness > self.best_before_neighbourhood {
            Some(true)
        } else {
            None
        }
    }

    fn record(&mut self, fitness: f64) {
        self.memo.insert(self.current.clone(), fitness);
        if BestRecord::offer(&mut self.best, &self.current, fitness) {
            self.since_improvement = 0;
        } else {
            self.since_improvement += 1;
        }
    }

    fn budget_spent(&self) -> Option<Termination> {
        if self
            .config
            .max_iterations
            .is_some_and(|max| self.iteration >= max)
        {
            return Some(Termination::IterationBudget);
        }
        if self
            .config
            .stall_limit
            .is_some_and(|limit| self.since_improvement >= limit)
        {
            return Some(Termination::Stalled);
        }
        None
    }

    fn open_neighbourhood(&mut self) {
        let mut neighbourhood = Vec::new();
        for param in self.space.parameters() {
            let own = self.centre.get(&param.name);
            for value in &param.values {
                if Some(value) == own {
                    continue;
                }
                let candidate = self.centre.with(&param.name, value.clone());
                let fitness = self.memo.get(&candidate).copied();
                neighbourhood.push(Neighbour {
                    candidate,
                    attribute: TabuAttribute {
                        parameter: param.name.clone(),
                        value: value.clone(),
                    },
                    fitness,
                });
            }
        }
        if self.config.neighbour_order == NeighbourOrder::Shuffled {
            neighbourhood.shuffle(&mut self.rng);
        }
        neighbourhood.truncate(self.config.neighbourhood_size);

        self.neighbourhood = neighbourhood;
        self.pending = None;
        self.best_before_neighbourhood = self.best.as_ref().map_or(WORST_FITNESS, |b| b.fitness);
        self.phase = Phase::ScoringNeighbours;
    }

    /// Move the centre to the best admissible scored neighbour. Returns
    /// false when no neighbour is admissible.
    fn make_move(&mut self) -> bool {
        let mut choice: Option<(usize, f64, bool)> = None;
        for (i, neighbour) in self.neighbourhood.iter().enumerate() {
            let Some(fitness) = neighbour.fitness else {
                continue;
            };
            if fitness <= WORST_FITNESS || fitness.is_nan() {
                continue;
            }
            let Some(aspiration) = self.admissible(&neighbour.attribute, fitness) else {
                continue;
            };
            if choice.map_or(true, |(_, best, _)| fitness > best) {
                choice = Some((i, fitness, aspiration));
            }
        }
        let Some((index, fitness, aspiration)) = choice else {
            return false;
        };

        let neighbour = self.neighbourhood.swap_remove(index);
        let parameter = neighbour.attribute.parameter.clone();
        let Some(from) = self.centre.get(&parameter).cloned() else {
            return false;
        };
        self.tabu.push_back(TabuEntry {
            attribute: TabuAttribute {
                parameter: parameter.clone(),
                value: from.clone(),
            },
            expires_at: self.iteration + self.config.tenure,
        });
        self.moves.push(MoveRecord {
            iteration: self.iteration,
            parameter,
            from,
            to: neighbour.attribute.value.clone(),
            fitness,
            aspiration,
        });
        debug!(
            iteration = self.iteration,
            centre = %neighbour.candidate,
            fitness,
            aspiration,
            "tabu search moved"
        );

        self.centre = neighbour.candidate;
        self.centre_fitness = fitness;
        self.open_neighbourhood();
        true
    }

    /// Pick a random unevaluated candidate as a fresh centre.
    fn restart(&mut self) -> Option<Candidate> {
        if let Some(size) = self.space.size() {
            if self.memo.len() >= size {
                return None;
            }
        }
        let mut fresh = None;
        for _ in 0..RESTART_SAMPLES {
            let candidate = self.space.sample(&mut self.rng);
            if !self.memo.contains_key(&candidate) {
                fresh = Some(candidate);
                break;
            }
        }
        // Nearly exhausted space: scan the enumeration order instead.
        if fresh.is_none() {
            let size = self.space.size()?;
            fresh = (0..size)
                .filter_map(|i| self.space.candidate_at(i))
                .find(|c| !self.memo.contains_key(c));
        }

        let candidate = fresh?;
        debug!(iteration = self.iteration, centre = %candidate, "tabu search restarted");
        self.phase = Phase::ScoringCentre;
        self.neighbourhood.clear();
        self.pending = None;
        Some(candidate)
    }

    fn next_proposal(&mut self) -> Option<Candidate> {
        let mut idle_moves = 0;
        loop {
            while let Some(index) = self.neighbourhood.iter().position(|n| n.fitness.is_none()) {
                let neighbour = &mut self.neighbourhood[index];
                if let Some(known) = self.memo.get(&neighbour.candidate) {
                    neighbour.fitness = Some(*known);
                    continue;
                }
                self.pending = Some(index);
                return Some(neighbour.candidate.clone());
            }
            if idle_moves < MAX_IDLE_MOVES && self.make_move() {
                idle_moves += 1;
                continue;
            }
            return self.restart();
        }
    }
}

impl std::fmt::Debug for TabuSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabuSearch")
            .field("config", &self.config)
            .field("iteration", &self.iteration)
            .field("centre", &self.centre)
            .field("best", &self.best)
            .field("termination", &self.termination)
            .finish()
    }
}

impl SearchAlgorithm for TabuSearch {
    fn name(&self) -> &str {
        "tabu-search"
    }

    fn start(&mut self, candidate: Candidate) {
        self.centre = candidate.clone();
        self.current = candidate;
        self.phase = Phase::ScoringCentre;
        self.neighbourhood.clear();
        self.pending = None;
    }

    fn run(&mut self, fitness: f64) -> Candidate {
        if self.termination.is_some() {
            return self.current.clone();
        }
        self.iteration += 1;
        self.record(fitness);

        match self.phase {
            Phase::ScoringCentre => {
                self.centre = self.current.clone();
                self.centre_fitness = fitness;
                self.open_neighbourhood();
            }
            Phase::ScoringNeighbours => {
                if let Some(index) = self.pending.take() {
                    self.neighbourhood[index].fitness = Some(fitness);
                }
            }
        }
        let iteration = self.iteration;
        self.tabu.retain(|entry| entry.expires_at > iteration);

        if let Some(reason) = self.budget_spent() {
            debug!(iteration, ?reason, "tabu search finished");
            self.termination = Some(reason);
            return self.current.clone();
        }

        match self.next_proposal() {
            Some(next) => self.current = next,
            None => {
                debug!(iteration, "tabu search exhausted the space");
                self.termination = Some(Termination::Exhausted);
            }
        }
        self.current.clone()
    }

    fn best(&self) -> Option<&BestRecord> {
        self.best.as_ref()
    }

    fn finished(&self) -> bool {
        self.termination.is_some()
    }

    fn termination(&self) -> Option<Termination> {
        self.termination
    }
}
