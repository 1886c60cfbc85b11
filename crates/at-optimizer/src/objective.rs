//! Objective registry, output checks and multi-objective scalarization.

use at_types::{
    AtResult, ConfigurationError, DeclaredOutputs, MissingOutputError, MissingReason, Objective,
    ObjectiveError, ObjectiveOutput, ObjectiveRecord, OutputFiles, RawOutput,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::trial::ObjectiveDirection;

/// Named objectives, iterated in name order.
#[derive(Clone, Default)]
pub struct ObjectiveRegistry {
    objectives: BTreeMap<String, Arc<dyn Objective>>,
}

impl ObjectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, objective: Arc<dyn Objective>) -> Result<(), ObjectiveError> {
        let name = objective.name().to_string();
        if self.objectives.contains_key(&name) {
            return Err(ObjectiveError::DuplicateName { objective: name });
        }
        self.objectives.insert(name, objective);
        Ok(())
    }

    pub fn with(mut self, objective: impl Objective + 'static) -> Result<Self, ObjectiveError> {
        self.register(Arc::new(objective))?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Objective>> {
        self.objectives.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.objectives.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.objectives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objectives.is_empty()
    }
}

impl std::fmt::Debug for ObjectiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Score of one target run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvaluationResult {
    /// The single objective's result, unmodified.
    Scalar(f64),
    /// Per-objective records reduced to a distance from the ideal point.
    Scalarized {
        reduced: f64,
        results: BTreeMap<String, ObjectiveRecord>,
    },
}

impl EvaluationResult {
    /// Maximize-oriented fitness. A reduced distance is negated; a scalar is
    /// negated only for minimized objectives.
    pub fn fitness(&self, direction: ObjectiveDirection) -> f64 {
        match self {
            Self::Scalar(value) => direction.orient(*value),
            Self::Scalarized { reduced, .. } => -reduced,
        }
    }
}

/// Weighted Euclidean distance from the ideal point, divided by the number
/// of objectives: `sqrt(Σ w·((optimum − result) / max)²) / N`.
///
/// When optimum, result and max are all integer measures the quotient is
/// floored, so records built from integer counts are compared in whole
/// multiples of `max`. Zero means every objective sits at its optimum.
pub fn reduce_dimensions<'a, I>(records: I) -> f64
where
    I: IntoIterator<Item = &'a ObjectiveRecord>,
{
    let mut total = 0.0;
    let mut count = 0usize;
    for record in records {
        total += record.weighted_square_distance();
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    total.sqrt() / count as f64
}

/// Runs every registered objective against a target's output.
#[derive(Debug, Clone)]
pub struct ObjectiveEvaluator {
    registry: ObjectiveRegistry,
    parallel: bool,
}

impl ObjectiveEvaluator {
    pub fn new(registry: ObjectiveRegistry) -> Result<Self, ConfigurationError> {
        if registry.is_empty() {
            return Err(ConfigurationError::NoObjectives);
        }
        Ok(Self {
            registry,
            parallel: true,
        })
    }

    /// Run objectives on the rayon pool (the default) or one after another.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn registry(&self) -> &ObjectiveRegistry {
        &self.registry
    }

    /// Every declared output must have matched at least one file, and every
    /// matched file must exist and be non-empty.
    pub fn check_outputs(outputs: &DeclaredOutputs) -> Result<OutputFiles, MissingOutputError> {
        let mut files = OutputFiles::new();
        for (key, declared) in outputs {
            let missing = |reason| MissingOutputError {
                key: key.clone(),
                pattern: declared.pattern.clone(),
                reason,
            };
            if declared.paths.is_empty() {
                return Err(missing(MissingReason::NotFound));
            }
            for path in &declared.paths {
                match std::fs::metadata(path) {
                    Ok(meta) if meta.len() == 0 => return Err(missing(MissingReason::Empty)),
                    Ok(_) => {}
                    Err(_) => return Err(missing(MissingReason::NotFound)),
                }
            }
            files.insert(key.clone(), declared.paths.clone());
        }
        Ok(files)
    }

    /// Score one run.
    ///
    /// With a single objective and `all_results` unset the objective's result
    /// is returned as is; otherwise every objective must return a structured
    /// record and the records are reduced with [`reduce_dimensions`].
    pub fn evaluate(
        &self,
        output: &RawOutput,
        outputs: &DeclaredOutputs,
        threads: usize,
        all_results: bool,
    ) -> AtResult<EvaluationResult> {
        let files = Self::check_outputs(outputs)?;
        let threads = threads.max(1);

        let entries: Vec<(&String, &Arc<dyn Objective>)> =
            self.registry.objectives.iter().collect();
        let run_one = |(name, objective): &(&String, &Arc<dyn Objective>)| {
            let result = objective.run(output, &files, threads);
            debug!(objective = %name, ?result, "objective finished");
            ((*name).clone(), result)
        };
        let results: Vec<(String, Result<ObjectiveOutput, ObjectiveError>)> =
            if self.parallel && entries.len() > 1 {
                entries.par_iter().map(run_one).collect()
            } else {
                entries.iter().map(run_one).collect()
            };

        // Surface plugin defects ahead of per-run scoring failures.
        let mut first_error: Option<ObjectiveError> = None;
        let mut scored = Vec::with_capacity(results.len());
        for (name, result) in results {
            match result {
                Ok(value) => scored.push((name, value)),
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err.into());
        }

        if !all_results && scored.len() == 1 {
            return Ok(EvaluationResult::Scalar(scored[0].1.result()));
        }

        let mut records = BTreeMap::new();
        for (name, value) in scored {
            let record = match value {
                ObjectiveOutput::Record(record) => record,
                ObjectiveOutput::Scalar(_) => {
                    return Err(ObjectiveError::Integration {
                        objective: name,
                        message: "returned a bare scalar; scalarization needs a record with \
                                  result, optimum, weighting and max"
                            .to_string(),
                    }
                    .into())
                }
            };
            record.validate(&name)?;
            records.insert(name, record);
        }
        let reduced = reduce_dimensions(records.values());
        Ok(EvaluationResult::Scalarized {
            reduced,
            results: records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use at_types::{AtError, DeclaredOutput};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed output and counts its invocations.
    struct Fixed {
        name: String,
        output: ObjectiveOutput,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn scalar(name: &str, value: f64) -> Self {
            Self {
                name: name.to_string(),
                output: ObjectiveOutput::Scalar(value),
                calls: AtomicUsize::new(0),
            }
        }

        fn record(name: &str, record: ObjectiveRecord) -> Self {
            Self {
                name: name.to_string(),
                output: ObjectiveOutput::Record(record),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Objective for Fixed {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(
            &self,
            _output: &RawOutput,
            _files: &OutputFiles,
            threads: usize,
        ) -> Result<ObjectiveOutput, ObjectiveError> {
            assert!(threads >= 1);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output)
        }
    }

    struct Unimplemented;

    impl Objective for Unimplemented {
        fn name(&self) -> &str {
            "unimplemented"
        }
    }

    struct Unscorable;

    impl Objective for Unscorable {
        fn name(&self) -> &str {
            "unscorable"
        }

        fn run(
            &self,
            _output: &RawOutput,
            _files: &OutputFiles,
            _threads: usize,
        ) -> Result<ObjectiveOutput, ObjectiveError> {
            Err(ObjectiveError::InvalidOutput {
                objective: "unscorable".into(),
                message: "no number found".into(),
            })
        }
    }

    fn example_records() -> Vec<(&'static str, ObjectiveRecord)> {
        vec![
            ("a", ObjectiveRecord::new(49i64, 100i64, 1.0, 100i64)),
            ("b", ObjectiveRecord::new(62i64, 1i64, 1.0, 100i64)),
            ("c", ObjectiveRecord::new(33i64, 0i64, 1.0, 66i64)),
        ]
    }

    #[test]
    fn reduction_matches_reference_value() {
        let records: Vec<_> = example_records().into_iter().map(|(_, r)| r).collect();
        let reduced = reduce_dimensions(&records);
        assert!((reduced - 0.4714045).abs() < 1e-6, "got {reduced}");
    }

    #[test]
    fn reduction_is_symmetric_and_zero_at_optimum() {
        let mut records: Vec<_> = example_records().into_iter().map(|(_, r)| r).collect();
        let forward = reduce_dimensions(&records);
        records.reverse();
        assert_eq!(forward, reduce_dimensions(&records));
        records.rotate_left(1);
        assert_eq!(forward, reduce_dimensions(&records));

        let optimal = [
            ObjectiveRecord::new(100i64, 100i64, 1.0, 100i64),
            ObjectiveRecord::new(0.25, 0.25, 3.0, 2.0),
        ];
        assert_eq!(reduce_dimensions(&optimal), 0.0);
        assert_eq!(reduce_dimensions(&[]), 0.0);
    }

    #[test]
    fn fractional_records_use_real_division() {
        let records = [ObjectiveRecord::new(0.5, 1.0, 4.0, 2.0)];
        // sqrt(4 * 0.25^2) / 1
        assert!((reduce_dimensions(&records) - 0.5).abs() < 1e-12);

        // the reference records as real measurements are not floored
        let real: Vec<_> = example_records()
            .into_iter()
            .map(|(_, r)| ObjectiveRecord::new(r.result.value(), r.optimum.value(), r.weighting, r.max.value()))
            .collect();
        let reduced = reduce_dimensions(&real);
        assert!((reduced - 0.4714045).abs() > 0.1, "got {reduced}");
    }

    #[test]
    fn single_objective_returns_result_unmodified() {
        let registry = ObjectiveRegistry::new()
            .with(Fixed::scalar("spread", 0.0))
            .unwrap();
        let evaluator = ObjectiveEvaluator::new(registry).unwrap();
        let result = evaluator
            .evaluate(&RawOutput::default(), &DeclaredOutputs::new(), 4, false)
            .unwrap();
        assert_eq!(result, EvaluationResult::Scalar(0.0));
        assert_eq!(result.fitness(ObjectiveDirection::Maximize), 0.0);
    }

    #[test]
    fn single_record_is_unwrapped() {
        let registry = ObjectiveRegistry::new()
            .with(Fixed::record("n50", ObjectiveRecord::new(12.5, 100.0, 1.0, 100.0)))
            .unwrap();
        let evaluator = ObjectiveEvaluator::new(registry).unwrap();
        let result = evaluator
            .evaluate(&RawOutput::default(), &DeclaredOutputs::new(), 1, false)
            .unwrap();
        assert_eq!(result, EvaluationResult::Scalar(12.5));
    }

    #[test]
    fn multiple_objectives_are_scalarized() {
        let mut registry = ObjectiveRegistry::new();
        for (name, record) in example_records() {
            registry
                .register(Arc::new(Fixed::record(name, record)))
                .unwrap();
        }
        for parallel in [true, false] {
            let evaluator = ObjectiveEvaluator::new(registry.clone())
                .unwrap()
                .with_parallel(parallel);
            let result = evaluator
                .evaluate(&RawOutput::default(), &DeclaredOutputs::new(), 2, true)
                .unwrap();
            match &result {
                EvaluationResult::Scalarized { reduced, results } => {
                    assert_eq!(results.len(), 3);
                    assert!((reduced - 0.4714045).abs() < 1e-6);
                }
                other => panic!("expected scalarized result, got {other:?}"),
            }
            assert!(result.fitness(ObjectiveDirection::Maximize) < 0.0);
        }
    }

    #[test]
    fn all_results_with_bare_scalar_is_integration_error() {
        let registry = ObjectiveRegistry::new()
            .with(Fixed::scalar("plain", 3.0))
            .unwrap();
        let evaluator = ObjectiveEvaluator::new(registry).unwrap();
        let err = evaluator
            .evaluate(&RawOutput::default(), &DeclaredOutputs::new(), 1, true)
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("plain"));
    }

    #[test]
    fn invalid_record_is_rejected() {
        let registry = ObjectiveRegistry::new()
            .with(Fixed::record("zero_max", ObjectiveRecord::new(1.0, 0.0, 1.0, 0.0)))
            .unwrap()
            .with(Fixed::record("ok", ObjectiveRecord::new(1.0, 1.0, 1.0, 1.0)))
            .unwrap();
        let evaluator = ObjectiveEvaluator::new(registry).unwrap();
        let err = evaluator
            .evaluate(&RawOutput::default(), &DeclaredOutputs::new(), 1, false)
            .unwrap_err();
        assert!(matches!(
            err,
            AtError::Objective(ObjectiveError::Integration { ref objective, .. }) if objective == "zero_max"
        ));
    }

    #[test]
    fn unimplemented_objective_is_fatal() {
        let registry = ObjectiveRegistry::new()
            .with(Unscorable)
            .unwrap()
            .with(Unimplemented)
            .unwrap();
        let evaluator = ObjectiveEvaluator::new(registry).unwrap();
        let err = evaluator
            .evaluate(&RawOutput::default(), &DeclaredOutputs::new(), 1, false)
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            AtError::Objective(ObjectiveError::NotImplemented { .. })
        ));
    }

    #[test]
    fn unscorable_output_is_not_fatal() {
        let registry = ObjectiveRegistry::new().with(Unscorable).unwrap();
        let evaluator = ObjectiveEvaluator::new(registry).unwrap();
        let err = evaluator
            .evaluate(&RawOutput::default(), &DeclaredOutputs::new(), 1, false)
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn registry_rejects_duplicates_and_empty() {
        let registry = ObjectiveRegistry::new().with(Fixed::scalar("a", 1.0)).unwrap();
        let err = registry.with(Fixed::scalar("a", 2.0)).unwrap_err();
        assert_eq!(
            err,
            ObjectiveError::DuplicateName {
                objective: "a".into()
            }
        );
        assert_eq!(
            ObjectiveEvaluator::new(ObjectiveRegistry::new()).unwrap_err(),
            ConfigurationError::NoObjectives
        );
    }

    #[test]
    fn missing_and_empty_outputs_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let full = dir.path().join("contigs.fa");
        std::fs::File::create(&full)
            .unwrap()
            .write_all(b">c1\nACGT\n")
            .unwrap();
        let empty = dir.path().join("empty.txt");
        std::fs::File::create(&empty).unwrap();

        let objective = Arc::new(Fixed::scalar("count", 1.0));
        let mut registry = ObjectiveRegistry::new();
        registry.register(objective.clone()).unwrap();
        let evaluator = ObjectiveEvaluator::new(registry).unwrap();

        let mut outputs = DeclaredOutputs::new();
        outputs.insert(
            "contigs".into(),
            DeclaredOutput {
                pattern: "*.fa".into(),
                paths: vec![full.clone()],
            },
        );
        assert!(evaluator
            .evaluate(&RawOutput::default(), &outputs, 1, false)
            .is_ok());

        outputs.insert(
            "log".into(),
            DeclaredOutput {
                pattern: "*.txt".into(),
                paths: vec![empty],
            },
        );
        let err = ObjectiveEvaluator::check_outputs(&outputs).unwrap_err();
        assert_eq!(err.key, "log");
        assert_eq!(err.pattern, "*.txt");
        assert_eq!(err.reason, MissingReason::Empty);

        outputs.insert(
            "log".into(),
            DeclaredOutput {
                pattern: "*.txt".into(),
                paths: Vec::new(),
            },
        );
        let err = evaluator
            .evaluate(&RawOutput::default(), &outputs, 1, false)
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(
            err,
            AtError::MissingOutput(MissingOutputError {
                reason: MissingReason::NotFound,
                ..
            })
        ));
        // objectives never ran for the failing evaluation
        assert_eq!(objective.calls.load(Ordering::SeqCst), 1);
    }
}
