//! Search algorithm interface and the exhaustive sweep.

use at_types::{Candidate, ConfigurationError, ParameterSpace};
use serde::{Deserialize, Serialize};

use crate::tabu::{TabuConfig, TabuSearch};

/// Fitness fed to the search for a candidate whose run or evaluation failed.
pub const WORST_FITNESS: f64 = f64::NEG_INFINITY;

/// The best candidate seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestRecord {
    pub candidate: Candidate,
    pub fitness: f64,
}

impl BestRecord {
    /// Replace `slot` if `fitness` strictly beats it. Failed candidates
    /// (`WORST_FITNESS`) and NaN never qualify.
    pub fn offer(slot: &mut Option<BestRecord>, candidate: &Candidate, fitness: f64) -> bool {
        let floor = slot.as_ref().map_or(WORST_FITNESS, |best| best.fitness);
        if fitness > floor {
            *slot = Some(BestRecord {
                candidate: candidate.clone(),
                fitness,
            });
            true
        } else {
            false
        }
    }
}

/// Why a search stopped proposing new candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The configured iteration budget was spent.
    IterationBudget,
    /// The best fitness did not improve within the stall window.
    Stalled,
    /// Every reachable candidate has been evaluated.
    Exhausted,
}

/// Common trait for all search algorithms.
///
/// The controller calls `start` once with the first candidate it evaluates,
/// then calls `run` exactly once per completed evaluation with that
/// candidate's fitness (higher is better). `run` returns the next candidate
/// to evaluate; once `finished` is true it keeps returning the last one.
pub trait SearchAlgorithm: Send {
    /// Human-readable algorithm name.
    fn name(&self) -> &str;

    fn knows_starting_point(&self) -> bool {
        false
    }

    fn select_starting_point(&mut self) -> Option<Candidate> {
        None
    }

    fn start(&mut self, candidate: Candidate);

    fn run(&mut self, fitness: f64) -> Candidate;

    fn best(&self) -> Option<&BestRecord>;

    fn finished(&self) -> bool;

    fn termination(&self) -> Option<Termination> {
        None
    }
}

// ---- Exhaustive sweep ----

/// Enumerates every candidate of the space exactly once, in the space's
/// mixed-radix order.
#[derive(Debug, Clone)]
pub struct ExhaustiveSweep {
    space: ParameterSpace,
    size: usize,
    cursor: usize,
    /// Index of an explicit start candidate, skipped by the enumeration.
    skip: Option<usize>,
    current: Candidate,
    proposed: usize,
    best: Option<BestRecord>,
    finished: bool,
}

impl ExhaustiveSweep {
    pub fn new(space: ParameterSpace) -> Result<Self, ConfigurationError> {
        space.validate()?;
        let size = space.size().ok_or_else(|| {
            ConfigurationError::Other("parameter space is too large to enumerate".to_string())
        })?;
        let current = space
            .candidate_at(0)
            .ok_or(ConfigurationError::EmptySpace)?;
        Ok(Self {
            space,
            size,
            cursor: 0,
            skip: None,
            current,
            proposed: 0,
            best: None,
            finished: false,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of candidates handed out so far, the starting point included.
    pub fn proposed(&self) -> usize {
        self.proposed
    }

    fn next_index(&mut self) -> Option<usize> {
        while self.cursor < self.size {
            let index = self.cursor;
            self.cursor += 1;
            if Some(index) != self.skip {
                return Some(index);
            }
        }
        None
    }
}

impl SearchAlgorithm for ExhaustiveSweep {
    fn name(&self) -> &str {
        "exhaustive-sweep"
    }

    fn knows_starting_point(&self) -> bool {
        true
    }

    fn select_starting_point(&mut self) -> Option<Candidate> {
        self.space.candidate_at(0)
    }

    fn start(&mut self, candidate: Candidate) {
        self.skip = self.space.index_of(&candidate);
        self.current = candidate;
        self.proposed = 1;
    }

    fn run(&mut self, fitness: f64) -> Candidate {
        if self.finished {
            return self.current.clone();
        }
        BestRecord::offer(&mut self.best, &self.current, fitness);

        match self.next_index().and_then(|i| self.space.candidate_at(i)) {
            Some(next) => {
                self.current = next;
                self.proposed += 1;
            }
            None => self.finished = true,
        }
        self.current.clone()
    }

    fn best(&self) -> Option<&BestRecord> {
        self.best.as_ref()
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn termination(&self) -> Option<Termination> {
        self.finished.then_some(Termination::Exhausted)
    }
}

// ---- Algorithm selection ----

/// Discriminant of [`Algorithm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmKind {
    ExhaustiveSweep,
    TabuSearch,
    Custom,
}

/// The search driving an experiment.
pub enum Algorithm {
    ExhaustiveSweep(ExhaustiveSweep),
    TabuSearch(TabuSearch),
    Custom(Box<dyn SearchAlgorithm>),
}

impl Algorithm {
    /// Sweep when the space has fewer than `cutoff` candidates, tabu search
    /// otherwise (including spaces too large to count).
    pub fn select(
        space: &ParameterSpace,
        cutoff: usize,
        tabu: &TabuConfig,
    ) -> Result<Self, ConfigurationError> {
        if cutoff == 0 {
            return Err(ConfigurationError::InvalidCutoff);
        }
        match space.size() {
            Some(size) if size < cutoff => {
                Ok(Self::ExhaustiveSweep(ExhaustiveSweep::new(space.clone())?))
            }
            _ => Ok(Self::TabuSearch(TabuSearch::new(space.clone(), tabu.clone())?)),
        }
    }

    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Self::ExhaustiveSweep(_) => AlgorithmKind::ExhaustiveSweep,
            Self::TabuSearch(_) => AlgorithmKind::TabuSearch,
            Self::Custom(_) => AlgorithmKind::Custom,
        }
    }

    fn inner(&self) -> &dyn SearchAlgorithm {
        match self {
            Self::ExhaustiveSweep(a) => a,
            Self::TabuSearch(a) => a,
            Self::Custom(a) => a.as_ref(),
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SearchAlgorithm {
        match self {
            Self::ExhaustiveSweep(a) => a,
            Self::TabuSearch(a) => a,
            Self::Custom(a) => a.as_mut(),
        }
    }
}

impl std::fmt::Debug for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Algorithm").field(&self.kind()).finish()
    }
}

impl SearchAlgorithm for Algorithm {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn knows_starting_point(&self) -> bool {
        self.inner().knows_starting_point()
    }

    fn select_starting_point(&mut self) -> Option<Candidate> {
        self.inner_mut().select_starting_point()
    }

    fn start(&mut self, candidate: Candidate) {
        self.inner_mut().start(candidate)
    }

    fn run(&mut self, fitness: f64) -> Candidate {
        self.inner_mut().run(fitness)
    }

    fn best(&self) -> Option<&BestRecord> {
        self.inner().best()
    }

    fn finished(&self) -> bool {
        self.inner().finished()
    }

    fn termination(&self) -> Option<Termination> {
        self.inner().termination()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use at_types::ParameterValue;
    use std::collections::HashSet;

    fn sample_space() -> ParameterSpace {
        ParameterSpace::new()
            .add_int_range("a", 1, 3, 1) // 3 values
            .add_choice("b", &["x", "y"]) // 2 values
            .add_float_steps("c", 0.0, 1.0, 2) // 2 values
    }

    fn sweep_all(space: ParameterSpace) -> Vec<Candidate> {
        let mut sweep = ExhaustiveSweep::new(space).unwrap();
        let first = sweep.select_starting_point().unwrap();
        sweep.start(first.clone());
        let mut proposed = vec![first];
        let mut fitness = 0.0;
        while !sweep.finished() {
            fitness += 1.0;
            let next = sweep.run(fitness);
            if !sweep.finished() {
                proposed.push(next);
            }
        }
        proposed
    }

    #[test]
    fn sweep_proposes_every_candidate_once() {
        let space = sample_space();
        assert_eq!(space.size(), Some(12));

        let proposed = sweep_all(space.clone());
        assert_eq!(proposed.len(), 12);
        let distinct: HashSet<_> = proposed.iter().cloned().collect();
        assert_eq!(distinct.len(), 12);
        assert!(proposed.iter().all(|c| space.contains(c)));
    }

    #[test]
    fn sweep_order_is_reproducible() {
        let space = sample_space();
        assert_eq!(sweep_all(space.clone()), sweep_all(space));
    }

    #[test]
    fn sweep_tracks_best_and_stays_terminal() {
        let space = ParameterSpace::new().add_int_range("x", 0, 4, 1);
        let mut sweep = ExhaustiveSweep::new(space).unwrap();
        let start = sweep.select_starting_point().unwrap();
        sweep.start(start);

        // fitness peaks at x = 2
        let score = |c: &Candidate| match c.get("x") {
            Some(ParameterValue::Int(x)) => -((x - 2) * (x - 2)) as f64,
            _ => f64::NAN,
        };
        let mut current = sweep.select_starting_point().unwrap();
        let mut last_best = f64::NEG_INFINITY;
        while !sweep.finished() {
            current = sweep.run(score(&current));
            if let Some(best) = sweep.best() {
                assert!(best.fitness >= last_best);
                last_best = best.fitness;
            }
        }
        let best = sweep.best().unwrap();
        assert_eq!(best.candidate.get("x"), Some(&ParameterValue::Int(2)));
        assert_eq!(best.fitness, 0.0);
        assert_eq!(sweep.termination(), Some(Termination::Exhausted));

        let terminal = sweep.run(100.0);
        assert_eq!(terminal, current);
        assert_eq!(sweep.best().unwrap().fitness, 0.0);
    }

    #[test]
    fn sweep_skips_explicit_start() {
        let space = sample_space();
        let override_start = space.candidate_at(5).unwrap();
        let mut sweep = ExhaustiveSweep::new(space).unwrap();
        sweep.start(override_start.clone());

        let mut proposed = vec![override_start];
        while !sweep.finished() {
            let next = sweep.run(1.0);
            if !sweep.finished() {
                proposed.push(next);
            }
        }
        assert_eq!(proposed.len(), 12);
        assert_eq!(sweep.proposed(), 12);
        let distinct: HashSet<_> = proposed.iter().cloned().collect();
        assert_eq!(distinct.len(), 12);
    }

    #[test]
    fn failed_fitness_never_becomes_best() {
        let candidate = sample_space().candidate_at(0).unwrap();
        let mut slot = None;
        assert!(!BestRecord::offer(&mut slot, &candidate, WORST_FITNESS));
        assert!(!BestRecord::offer(&mut slot, &candidate, f64::NAN));
        assert!(slot.is_none());
        assert!(BestRecord::offer(&mut slot, &candidate, -5.0));
        assert!(!BestRecord::offer(&mut slot, &candidate, -5.0));
        assert!(BestRecord::offer(&mut slot, &candidate, 0.0));
    }

    #[test]
    fn selection_follows_cutoff() {
        let space = sample_space(); // 12 candidates
        let tabu = TabuConfig::default();

        let below = Algorithm::select(&space, 13, &tabu).unwrap();
        assert_eq!(below.kind(), AlgorithmKind::ExhaustiveSweep);

        let at = Algorithm::select(&space, 12, &tabu).unwrap();
        assert_eq!(at.kind(), AlgorithmKind::TabuSearch);

        let above = Algorithm::select(&space, 2, &tabu).unwrap();
        assert_eq!(above.kind(), AlgorithmKind::TabuSearch);

        assert_eq!(
            Algorithm::select(&space, 0, &tabu).unwrap_err(),
            ConfigurationError::InvalidCutoff
        );
    }

    #[test]
    fn repeated_range_value_is_rejected_before_sweeping() {
        let space = ParameterSpace::new().add_values(
            "x",
            vec![
                ParameterValue::Int(1),
                ParameterValue::Int(1),
                ParameterValue::Int(2),
            ],
        );
        assert!(matches!(
            ExhaustiveSweep::new(space.clone()).unwrap_err(),
            ConfigurationError::DuplicateValue { name, .. } if name == "x"
        ));
        assert!(Algorithm::select(&space, 100, &TabuConfig::default()).is_err());
    }

    #[test]
    fn oversized_space_selects_tabu() {
        let mut space = ParameterSpace::new();
        for i in 0..80 {
            space = space.add_int_range(format!("p{i}"), 0, 9, 1);
        }
        let algorithm = Algorithm::select(&space, usize::MAX, &TabuConfig::default()).unwrap();
        assert_eq!(algorithm.kind(), AlgorithmKind::TabuSearch);
    }
}
