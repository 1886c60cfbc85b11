//! Scoring plugins.

use serde::{Deserialize, Serialize};

use crate::errors::ObjectiveError;
use crate::target::{OutputFiles, RawOutput};

/// A number as an objective produced it. Integer counts and real-valued
/// measurements scalarize differently, so the distinction is kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measure {
    Int(i64),
    Float(f64),
}

impl Measure {
    pub fn value(&self) -> f64 {
        match self {
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    /// An integer when `text` parses as one, otherwise a float.
    pub fn parse(text: &str) -> Option<Self> {
        if let Ok(v) = text.parse::<i64>() {
            return Some(Self::Int(v));
        }
        text.parse::<f64>().ok().map(Self::Float)
    }
}

impl From<i64> for Measure {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Measure {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl std::fmt::Display for Measure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// A structured objective score used for multi-objective scalarization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveRecord {
    /// The measured value.
    pub result: Measure,
    /// The ideal value.
    pub optimum: Measure,
    /// Relative importance, non-negative.
    pub weighting: f64,
    /// Normaliser for the distance to the optimum, non-zero.
    pub max: Measure,
}

impl ObjectiveRecord {
    pub fn new(
        result: impl Into<Measure>,
        optimum: impl Into<Measure>,
        weighting: f64,
        max: impl Into<Measure>,
    ) -> Self {
        Self {
            result: result.into(),
            optimum: optimum.into(),
            weighting,
            max: max.into(),
        }
    }

    pub fn validate(&self, objective: &str) -> Result<(), ObjectiveError> {
        let max = self.max.value();
        let message = if max == 0.0 || !max.is_finite() {
            Some(format!("max must be finite and non-zero, got {max}"))
        } else if !self.result.value().is_finite() || !self.optimum.value().is_finite() {
            Some("result and optimum must be finite".to_string())
        } else if self.weighting < 0.0 || !self.weighting.is_finite() {
            Some(format!(
                "weighting must be finite and non-negative, got {}",
                self.weighting
            ))
        } else {
            None
        };
        match message {
            Some(message) => Err(ObjectiveError::Integration {
                objective: objective.to_string(),
                message,
            }),
            None => Ok(()),
        }
    }

    /// Weighted squared normalised distance to the optimum.
    ///
    /// When optimum, result and max are all integers the normalised distance
    /// is floored, so integer counts move in whole multiples of `max`. A
    /// float that happens to be whole still uses real division.
    pub fn weighted_square_distance(&self) -> f64 {
        let integral = [self.optimum, self.result, self.max]
            .iter()
            .all(Measure::is_int);
        let mut d = (self.optimum.value() - self.result.value()) / self.max.value();
        if integral {
            d = d.floor();
        }
        self.weighting * d * d
    }
}

/// What an objective returns for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectiveOutput {
    Scalar(f64),
    Record(ObjectiveRecord),
}

impl ObjectiveOutput {
    pub fn result(&self) -> f64 {
        match self {
            Self::Scalar(v) => *v,
            Self::Record(r) => r.result.value(),
        }
    }
}

/// A named scoring function over a target's output.
///
/// Objectives may be invoked concurrently with each other within one
/// iteration, so `run` takes `&self` and must not rely on shared mutable
/// state. `threads` is the number of workers the objective may use itself.
pub trait Objective: Send + Sync {
    fn name(&self) -> &str;

    fn run(
        &self,
        _output: &RawOutput,
        _output_files: &OutputFiles,
        _threads: usize,
    ) -> Result<ObjectiveOutput, ObjectiveError> {
        Err(ObjectiveError::NotImplemented {
            objective: self.name().to_string(),
        })
    }
}
