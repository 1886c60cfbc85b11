//! Objectives available without writing a plugin.

use at_types::{
    ConfigurationError, Measure, Objective, ObjectiveError, ObjectiveOutput, ObjectiveRecord,
    OutputFiles, RawOutput,
};
use std::sync::Arc;

/// Optimum, weighting and max applied to a raw result to build a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordTemplate {
    pub optimum: Measure,
    pub weighting: f64,
    pub max: Measure,
}

impl RecordTemplate {
    fn wrap(&self, result: Measure) -> ObjectiveOutput {
        ObjectiveOutput::Record(ObjectiveRecord::new(
            result,
            self.optimum,
            self.weighting,
            self.max,
        ))
    }
}

fn wrap(template: Option<&RecordTemplate>, result: Measure) -> ObjectiveOutput {
    match template {
        Some(template) => template.wrap(result),
        None => ObjectiveOutput::Scalar(result.value()),
    }
}

/// Where [`NumberObjective`] reads its text from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumberSource {
    Stdout,
    /// First file matched by a declared output key.
    Output(String),
}

/// Scores a run by the last number printed to stdout or written to an
/// output file.
#[derive(Debug, Clone)]
pub struct NumberObjective {
    name: String,
    source: NumberSource,
    template: Option<RecordTemplate>,
}

impl NumberObjective {
    pub fn stdout() -> Self {
        Self {
            name: "number".to_string(),
            source: NumberSource::Stdout,
            template: None,
        }
    }

    pub fn output(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            name: format!("number:{key}"),
            source: NumberSource::Output(key),
            template: None,
        }
    }

    pub fn with_record(mut self, template: RecordTemplate) -> Self {
        self.template = Some(template);
        self
    }

    pub fn source(&self) -> &NumberSource {
        &self.source
    }

    fn invalid(&self, message: impl Into<String>) -> ObjectiveError {
        ObjectiveError::InvalidOutput {
            objective: self.name.clone(),
            message: message.into(),
        }
    }
}

/// The last token of `text` that parses as a finite number. Tokens written
/// as integers stay integers.
pub fn last_number(text: &str) -> Option<Measure> {
    text.split(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
        .filter_map(Measure::parse)
        .filter(|value| value.value().is_finite())
        .last()
}

impl Objective for NumberObjective {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        output: &RawOutput,
        output_files: &OutputFiles,
        _threads: usize,
    ) -> Result<ObjectiveOutput, ObjectiveError> {
        let text = match &self.source {
            NumberSource::Stdout => output.stdout.clone(),
            NumberSource::Output(key) => {
                let path = output_files
                    .get(key)
                    .and_then(|paths| paths.first())
                    .ok_or_else(|| self.invalid(format!("no file for output {key}")))?;
                std::fs::read_to_string(path)
                    .map_err(|e| self.invalid(format!("{}: {e}", path.display())))?
            }
        };
        let result = last_number(&text).ok_or_else(|| self.invalid("no number found"))?;
        Ok(wrap(self.template.as_ref(), result))
    }
}

/// Scores a run by its wall-clock time.
///
/// As a scalar the seconds are negated so that faster runs score higher. As a
/// record the seconds are reported as measured and compared to the optimum.
#[derive(Debug, Clone, Default)]
pub struct ElapsedObjective {
    template: Option<RecordTemplate>,
}

impl ElapsedObjective {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, template: RecordTemplate) -> Self {
        self.template = Some(template);
        self
    }
}

impl Objective for ElapsedObjective {
    fn name(&self) -> &str {
        "elapsed"
    }

    fn run(
        &self,
        output: &RawOutput,
        _output_files: &OutputFiles,
        _threads: usize,
    ) -> Result<ObjectiveOutput, ObjectiveError> {
        let seconds = output.elapsed.as_secs_f64();
        Ok(match &self.template {
            Some(template) => template.wrap(Measure::Float(seconds)),
            None => ObjectiveOutput::Scalar(-seconds),
        })
    }
}

fn parse_template(spec: &str, fields: &[&str]) -> Result<RecordTemplate, ConfigurationError> {
    let not_a_number = |field: &str, what: &str| {
        ConfigurationError::Other(format!("objective {spec}: {what} {field:?} is not a number"))
    };
    let measure = |field: &str, what: &str| {
        Measure::parse(field).ok_or_else(|| not_a_number(field, what))
    };
    Ok(RecordTemplate {
        optimum: measure(fields[0], "optimum")?,
        weighting: fields[1]
            .parse::<f64>()
            .map_err(|_| not_a_number(fields[1], "weighting"))?,
        max: measure(fields[2], "max")?,
    })
}

/// Build a built-in objective from its command-line spec.
///
/// Accepted forms: `number`, `number:<key>`, `number:<key>:<optimum>:<weighting>:<max>`,
/// `elapsed` and `elapsed:<optimum>:<weighting>:<max>`. A key of `-` reads stdout.
pub fn parse_objective_spec(spec: &str) -> Result<Arc<dyn Objective>, ConfigurationError> {
    let fields: Vec<&str> = spec.split(':').collect();
    let number = |key: &str| {
        if key == "-" {
            NumberObjective::stdout()
        } else {
            NumberObjective::output(key)
        }
    };
    let objective: Arc<dyn Objective> = match fields.as_slice() {
        ["number"] => Arc::new(NumberObjective::stdout()),
        ["number", key] if !key.is_empty() => Arc::new(number(*key)),
        ["number", key, rest @ ..] if rest.len() == 3 && !key.is_empty() => {
            Arc::new(number(*key).with_record(parse_template(spec, rest)?))
        }
        ["elapsed"] => Arc::new(ElapsedObjective::new()),
        ["elapsed", rest @ ..] if rest.len() == 3 => {
            Arc::new(ElapsedObjective::new().with_record(parse_template(spec, rest)?))
        }
        _ => {
            return Err(ConfigurationError::Other(format!(
                "unrecognised objective {spec:?}; expected number[:key[:optimum:weighting:max]] \
                 or elapsed[:optimum:weighting:max]"
            )))
        }
    };
    Ok(objective)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn stdout(text: &str) -> RawOutput {
        RawOutput {
            stdout: text.to_string(),
            ..RawOutput::default()
        }
    }

    #[test]
    fn last_number_scans_tokens() {
        assert_eq!(last_number("n50: 1234\nmax: 5678.5\n"), Some(Measure::Float(5678.5)));
        assert_eq!(last_number("n50: 1234\n"), Some(Measure::Int(1234)));
        assert_eq!(last_number("loss=-0.25;"), Some(Measure::Float(-0.25)));
        assert_eq!(last_number("score 1e3 done"), Some(Measure::Float(1000.0)));
        assert_eq!(last_number("mean 99.0"), Some(Measure::Float(99.0)));
        assert_eq!(last_number("no digits here"), None);
        assert_eq!(last_number(""), None);
    }

    #[test]
    fn number_reads_stdout() {
        let objective = NumberObjective::stdout();
        assert_eq!(objective.name(), "number");
        let out = objective
            .run(&stdout("contigs 12\nn50 480\n"), &OutputFiles::new(), 1)
            .unwrap();
        assert_eq!(out, ObjectiveOutput::Scalar(480.0));

        let err = objective
            .run(&stdout("nothing"), &OutputFiles::new(), 1)
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn number_reads_first_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.txt");
        std::fs::write(&path, "total 91\n").unwrap();
        let mut files = OutputFiles::new();
        files.insert("stats".into(), vec![path]);

        let objective = NumberObjective::output("stats");
        assert_eq!(objective.name(), "number:stats");
        let out = objective.run(&RawOutput::default(), &files, 1).unwrap();
        assert_eq!(out.result(), 91.0);

        let mut missing = OutputFiles::new();
        missing.insert("stats".into(), vec![PathBuf::from("/nonexistent/stats.txt")]);
        assert!(objective.run(&RawOutput::default(), &missing, 1).is_err());
        assert!(objective
            .run(&RawOutput::default(), &OutputFiles::new(), 1)
            .is_err());
    }

    #[test]
    fn templates_produce_records() {
        let template = RecordTemplate {
            optimum: Measure::Int(100),
            weighting: 1.0,
            max: Measure::Int(100),
        };
        let objective = NumberObjective::stdout().with_record(template);
        let out = objective.run(&stdout("49"), &OutputFiles::new(), 1).unwrap();
        assert_eq!(
            out,
            ObjectiveOutput::Record(ObjectiveRecord::new(49i64, 100i64, 1.0, 100i64))
        );

        // a whole-valued float measurement keeps real division
        let out = objective.run(&stdout("99.0"), &OutputFiles::new(), 1).unwrap();
        match out {
            ObjectiveOutput::Record(record) => {
                assert_eq!(record.result, Measure::Float(99.0));
                assert!(record.weighted_square_distance() > 0.0);
            }
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn elapsed_prefers_faster_runs() {
        let run = RawOutput {
            elapsed: Duration::from_millis(1500),
            ..RawOutput::default()
        };
        let scalar = ElapsedObjective::new()
            .run(&run, &OutputFiles::new(), 1)
            .unwrap();
        assert_eq!(scalar, ObjectiveOutput::Scalar(-1.5));

        let record = ElapsedObjective::new()
            .with_record(RecordTemplate {
                optimum: Measure::Int(0),
                weighting: 1.0,
                max: Measure::Int(10),
            })
            .run(&run, &OutputFiles::new(), 1)
            .unwrap();
        assert_eq!(record.result(), 1.5);
    }

    #[test]
    fn spec_parsing() {
        assert_eq!(parse_objective_spec("number").unwrap().name(), "number");
        assert_eq!(parse_objective_spec("number:-").unwrap().name(), "number");
        assert_eq!(
            parse_objective_spec("number:contigs").unwrap().name(),
            "number:contigs"
        );
        assert_eq!(
            parse_objective_spec("number:contigs:100:1:100")
                .unwrap()
                .name(),
            "number:contigs"
        );
        assert_eq!(parse_objective_spec("elapsed").unwrap().name(), "elapsed");
        assert!(parse_objective_spec("elapsed:0:1:60").is_ok());

        assert!(parse_objective_spec("number:").is_err());
        assert!(parse_objective_spec("number:k:1:x:3").is_err());
        assert!(parse_objective_spec("number:k:1").is_err());
        assert!(parse_objective_spec("accuracy").is_err());
    }
}
