//! Parameter space and candidate definitions.

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::errors::ConfigurationError;

/// A single allowed value of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

// Float values are validated to be finite, so bitwise equality matches `==`
// for every value a validated space can hold.
impl Eq for ParameterValue {}

impl Hash for ParameterValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Int(v) => v.hash(state),
            Self::Float(v) => {
                // Fold -0.0 into 0.0 so equal values hash equally.
                let v = if *v == 0.0 { 0.0 } else { *v };
                v.to_bits().hash(state)
            }
            Self::Text(v) => v.hash(state),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A single parameter dimension: a name and its ordered range of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as it appears in the target's command line.
    pub name: String,
    /// Allowed values, in enumeration order.
    pub values: Vec<ParameterValue>,
}

impl ParameterDef {
    pub fn new(name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn contains(&self, value: &ParameterValue) -> bool {
        self.values.contains(value)
    }
}

/// One point in the parameter space: exactly one value per parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate {
    values: BTreeMap<String, ParameterValue>,
}

impl Candidate {
    pub fn new(values: BTreeMap<String, ParameterValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A copy of this candidate with one parameter replaced.
    pub fn with(&self, name: &str, value: ParameterValue) -> Self {
        let mut values = self.values.clone();
        values.insert(name.to_string(), value);
        Self { values }
    }

    pub fn as_map(&self) -> &BTreeMap<String, ParameterValue> {
        &self.values
    }
}

impl FromIterator<(String, ParameterValue)> for Candidate {
    fn from_iter<I: IntoIterator<Item = (String, ParameterValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (name, value) in &self.values {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// The full search space: an ordered list of discrete parameters.
///
/// Declaration order fixes the enumeration order: candidates are numbered
/// as a mixed-radix integer whose last parameter varies fastest.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSpace {
    parameters: Vec<ParameterDef>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add(mut self, def: ParameterDef) -> Self {
        self.parameters.push(def);
        self
    }

    pub fn add_values(mut self, name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        self.parameters.push(ParameterDef::new(name, values));
        self
    }

    /// Integers from `low` to `high` inclusive in increments of `step`.
    /// A non-positive step yields an empty range, which `validate` rejects.
    pub fn add_int_range(self, name: impl Into<String>, low: i64, high: i64, step: i64) -> Self {
        let mut values = Vec::new();
        if step > 0 {
            let mut v = low;
            while v <= high {
                values.push(ParameterValue::Int(v));
                v = match v.checked_add(step) {
                    Some(next) => next,
                    None => break,
                };
            }
        }
        self.add_values(name, values)
    }

    /// `steps` evenly spaced floats covering `[low, high]`.
    pub fn add_float_steps(self, name: impl Into<String>, low: f64, high: f64, steps: usize) -> Self {
        let values = match steps {
            0 => Vec::new(),
            1 => vec![ParameterValue::Float(low)],
            _ => (0..steps)
                .map(|i| {
                    let t = i as f64 / (steps - 1) as f64;
                    ParameterValue::Float(low + t * (high - low))
                })
                .collect(),
        };
        self.add_values(name, values)
    }

    pub fn add_choice(self, name: impl Into<String>, choices: &[&str]) -> Self {
        let values = choices.iter().map(|c| ParameterValue::from(*c)).collect();
        self.add_values(name, values)
    }

    pub fn parameters(&self) -> &[ParameterDef] {
        &self.parameters
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Check names are unique and every range is a non-empty set of finite
    /// values.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.parameters.is_empty() {
            return Err(ConfigurationError::EmptySpace);
        }
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(ConfigurationError::DuplicateParameter {
                    name: param.name.clone(),
                });
            }
            if param.values.is_empty() {
                return Err(ConfigurationError::EmptyRange {
                    name: param.name.clone(),
                });
            }
            let mut values = HashSet::new();
            for value in &param.values {
                if let ParameterValue::Float(v) = value {
                    if !v.is_finite() {
                        return Err(ConfigurationError::InvalidValue {
                            name: param.name.clone(),
                            message: format!("{v} is not finite"),
                        });
                    }
                }
                if !values.insert(value) {
                    return Err(ConfigurationError::DuplicateValue {
                        name: param.name.clone(),
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Number of candidates in the Cartesian product, or `None` if it does
    /// not fit in a `usize`.
    pub fn size(&self) -> Option<usize> {
        self.parameters
            .iter()
            .try_fold(1usize, |total, p| total.checked_mul(p.values.len()))
    }

    /// Draw one value per parameter uniformly at random.
    ///
    /// Parameters with an empty range are left out; call `validate` first.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Candidate {
        self.parameters
            .iter()
            .filter_map(|p| p.values.choose(rng).map(|v| (p.name.clone(), v.clone())))
            .collect()
    }

    /// The candidate at position `index` of the enumeration order.
    pub fn candidate_at(&self, index: usize) -> Option<Candidate> {
        if index >= self.size()? {
            return None;
        }
        let mut rest = index;
        let mut values = BTreeMap::new();
        for param in self.parameters.iter().rev() {
            let radix = param.values.len();
            values.insert(param.name.clone(), param.values[rest % radix].clone());
            rest /= radix;
        }
        Some(Candidate::new(values))
    }

    /// Inverse of [`candidate_at`](Self::candidate_at).
    pub fn index_of(&self, candidate: &Candidate) -> Option<usize> {
        if candidate.len() != self.parameters.len() {
            return None;
        }
        let mut index = 0usize;
        for param in &self.parameters {
            let value = candidate.get(&param.name)?;
            let position = param.values.iter().position(|v| v == value)?;
            index = index
                .checked_mul(param.values.len())?
                .checked_add(position)?;
        }
        Some(index)
    }

    /// Check that `candidate` assigns an allowed value to every parameter and
    /// names nothing else.
    pub fn check_candidate(&self, candidate: &Candidate) -> Result<(), ConfigurationError> {
        for (name, value) in candidate.iter() {
            let param = self
                .get(name)
                .ok_or_else(|| ConfigurationError::UnknownParameter { name: name.clone() })?;
            if !param.contains(value) {
                return Err(ConfigurationError::InvalidValue {
                    name: name.clone(),
                    message: format!("{value} is not in the declared range"),
                });
            }
        }
        for param in &self.parameters {
            if candidate.get(&param.name).is_none() {
                return Err(ConfigurationError::MissingParameter {
                    name: param.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn contains(&self, candidate: &Candidate) -> bool {
        self.check_candidate(candidate).is_ok()
    }

    /// Every candidate that differs from `candidate` in exactly one
    /// parameter, in declaration order.
    pub fn neighbours(&self, candidate: &Candidate) -> Vec<Candidate> {
        let mut result = Vec::new();
        for param in &self.parameters {
            let current = candidate.get(&param.name);
            for value in &param.values {
                if Some(value) != current {
                    result.push(candidate.with(&param.name, value.clone()));
                }
            }
        }
        result
    }
}
