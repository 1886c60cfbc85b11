//! JSON target declarations.

use at_types::{AtResult, Candidate, ConfigurationError, ParameterSpace, ParameterValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::outputs::validate_pattern;

/// Placeholder replaced by the run directory.
pub const WORKDIR: &str = "workdir";

fn default_step() -> i64 {
    1
}

/// Range of one declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterSpec {
    Int {
        low: i64,
        high: i64,
        #[serde(default = "default_step")]
        step: i64,
    },
    Float {
        low: f64,
        high: f64,
        steps: usize,
    },
    Values {
        values: Vec<ParameterValue>,
    },
}

impl ParameterSpec {
    fn check(&self, name: &str) -> Result<(), ConfigurationError> {
        let invalid = |message: &str| ConfigurationError::InvalidValue {
            name: name.to_string(),
            message: message.to_string(),
        };
        match self {
            Self::Int { low, high, step } => {
                if *step <= 0 {
                    return Err(invalid("step must be positive"));
                }
                if low > high {
                    return Err(invalid("low must not exceed high"));
                }
            }
            Self::Float { low, high, steps } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(invalid("bounds must be finite"));
                }
                if low > high {
                    return Err(invalid("low must not exceed high"));
                }
                if *steps == 0 {
                    return Err(invalid("steps must be at least 1"));
                }
            }
            Self::Values { values } => {
                if values.is_empty() {
                    return Err(ConfigurationError::EmptyRange {
                        name: name.to_string(),
                    });
                }
                let mut seen = HashSet::new();
                if let Some(repeated) = values.iter().find(|v| !seen.insert(*v)) {
                    return Err(ConfigurationError::DuplicateValue {
                        name: name.to_string(),
                        value: repeated.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A program to tune, its parameters and the files it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDeclaration {
    pub name: String,
    /// Program and arguments, with `{name}` placeholders.
    pub command: Vec<String>,
    /// Join the command with spaces and run it through `sh -c`.
    #[serde(default)]
    pub shell: bool,
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub constants: BTreeMap<String, String>,
    /// Output key to a pattern relative to the run directory.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TargetDeclaration {
    pub fn from_json(text: &str) -> AtResult<Self> {
        let declaration: Self = serde_json::from_str(text)?;
        declaration.validate()?;
        Ok(declaration)
    }

    pub fn load(path: impl AsRef<Path>) -> AtResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |message: String| ConfigurationError::InvalidDeclaration { message };

        if self.command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(invalid("command must name a program".to_string()));
        }
        if self.timeout_secs == Some(0) {
            return Err(invalid("timeout_secs must be positive".to_string()));
        }
        for (name, spec) in &self.parameters {
            spec.check(name)?;
        }
        for name in self.constants.keys() {
            if self.parameters.contains_key(name) {
                return Err(invalid(format!("{name} is both a parameter and a constant")));
            }
        }
        for name in self.parameters.keys().chain(self.constants.keys()) {
            if name == WORKDIR {
                return Err(invalid(format!("{WORKDIR} is reserved for the run directory")));
            }
        }
        for placeholder in self.placeholders() {
            let known = placeholder == WORKDIR
                || self.parameters.contains_key(&placeholder)
                || self.constants.contains_key(&placeholder);
            if !known {
                return Err(invalid(format!("unknown placeholder {{{placeholder}}}")));
            }
        }
        for (key, pattern) in &self.outputs {
            validate_pattern(pattern).map_err(|message| invalid(format!("output {key}: {message}")))?;
        }
        self.parameter_space()?.validate()
    }

    /// Parameters in name order.
    pub fn parameter_space(&self) -> Result<ParameterSpace, ConfigurationError> {
        let mut space = ParameterSpace::new();
        for (name, spec) in &self.parameters {
            spec.check(name)?;
            space = match spec {
                ParameterSpec::Int { low, high, step } => {
                    space.add_int_range(name.as_str(), *low, *high, *step)
                }
                ParameterSpec::Float { low, high, steps } => {
                    space.add_float_steps(name.as_str(), *low, *high, *steps)
                }
                ParameterSpec::Values { values } => space.add_values(name.as_str(), values.clone()),
            };
        }
        Ok(space)
    }

    /// Every placeholder named in the command.
    pub fn placeholders(&self) -> BTreeSet<String> {
        self.command
            .iter()
            .flat_map(|arg| placeholders_in(arg))
            .map(str::to_string)
            .collect()
    }

    /// The command with placeholders replaced by the candidate's values,
    /// the constants and the run directory.
    pub fn render(&self, candidate: &Candidate, workdir: &Path) -> Result<Vec<String>, String> {
        let workdir = workdir.to_string_lossy();
        let lookup = |name: &str| -> Option<String> {
            if name == WORKDIR {
                return Some(workdir.to_string());
            }
            candidate
                .get(name)
                .map(ToString::to_string)
                .or_else(|| self.constants.get(name).cloned())
        };
        self.command
            .iter()
            .map(|arg| substitute(arg, &lookup))
            .collect()
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Spans of `{name}` placeholders as `(start, end, name)`. A brace preceded
/// by `$` is left alone for the shell.
fn scan(text: &str) -> Vec<(usize, usize, &str)> {
    let mut found = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && (i == 0 || bytes[i - 1] != b'$') {
            if let Some(len) = text[i + 1..].find('}') {
                let name = &text[i + 1..i + 1 + len];
                if !name.is_empty() && name.chars().all(is_name_char) {
                    found.push((i, i + len + 2, name));
                    i += len + 2;
                    continue;
                }
            }
        }
        i += 1;
    }
    found
}

fn placeholders_in(text: &str) -> Vec<&str> {
    scan(text).into_iter().map(|(_, _, name)| name).collect()
}

/// Replace every placeholder in `text` via `lookup`.
pub fn substitute(text: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, end, name) in scan(text) {
        out.push_str(&text[last..start]);
        let value = lookup(name).ok_or_else(|| format!("no value for placeholder {{{name}}}"))?;
        out.push_str(&value);
        last = end;
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use at_types::AtError;
    use std::path::PathBuf;

    const ASSEMBLER: &str = r#"{
        "name": "assembler",
        "command": ["velveth", "{workdir}/out", "{k}", "-short", "{input}", "--mode={mode}"],
        "parameters": {
            "mode": {"type": "values", "values": ["fast", "careful"]},
            "k": {"type": "int", "low": 21, "high": 61, "step": 2},
            "cov": {"type": "float", "low": 0.5, "high": 2.0, "steps": 4}
        },
        "constants": {"input": "reads.fq"},
        "outputs": {"contigs": "out/contigs.*"},
        "timeout_secs": 600
    }"#;

    #[test]
    fn loads_and_orders_parameters_by_name() {
        let declaration = TargetDeclaration::from_json(ASSEMBLER).unwrap();
        assert_eq!(declaration.name, "assembler");
        assert!(!declaration.shell);
        assert_eq!(declaration.timeout_secs, Some(600));

        let space = declaration.parameter_space().unwrap();
        let names: Vec<_> = space.parameters().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["cov", "k", "mode"]);
        assert_eq!(space.get("k").unwrap().values.len(), 21);
        assert_eq!(space.get("cov").unwrap().values.len(), 4);
        assert_eq!(space.size(), Some(4 * 21 * 2));
    }

    #[test]
    fn renders_placeholders() {
        let declaration = TargetDeclaration::from_json(ASSEMBLER).unwrap();
        let candidate = Candidate::default()
            .with("k", ParameterValue::Int(31))
            .with("cov", ParameterValue::Float(1.0))
            .with("mode", ParameterValue::from("fast"));
        let argv = declaration
            .render(&candidate, &PathBuf::from("/runs/run-0001"))
            .unwrap();
        assert_eq!(
            argv,
            [
                "velveth",
                "/runs/run-0001/out",
                "31",
                "-short",
                "reads.fq",
                "--mode=fast"
            ]
        );
    }

    #[test]
    fn shell_expansions_are_left_alone() {
        let rendered = substitute("echo ${HOME} {k} {not a name}", |name| {
            (name == "k").then(|| "5".to_string())
        })
        .unwrap();
        assert_eq!(rendered, "echo ${HOME} 5 {not a name}");
        assert!(substitute("{missing}", |_| None).is_err());
    }

    #[test]
    fn rejects_malformed_declarations() {
        let cases = [
            r#"{"name": "t", "command": [], "parameters": {"a": {"type": "int", "low": 0, "high": 1}}}"#,
            r#"{"name": "t", "command": ["run", "{b}"], "parameters": {"a": {"type": "int", "low": 0, "high": 1}}}"#,
            r#"{"name": "t", "command": ["run"], "parameters": {"a": {"type": "int", "low": 0, "high": 1}}, "constants": {"a": "1"}}"#,
            r#"{"name": "t", "command": ["run"], "parameters": {"workdir": {"type": "int", "low": 0, "high": 1}}}"#,
            r#"{"name": "t", "command": ["run"], "parameters": {"a": {"type": "int", "low": 0, "high": 1}}, "outputs": {"o": "/abs"}}"#,
            r#"{"name": "t", "command": ["run"], "parameters": {"a": {"type": "int", "low": 0, "high": 1}}, "timeout_secs": 0}"#,
        ];
        for case in cases {
            let err = TargetDeclaration::from_json(case).unwrap_err();
            assert!(
                matches!(err, AtError::Config(ConfigurationError::InvalidDeclaration { .. })),
                "{case}: {err}"
            );
        }
    }

    #[test]
    fn rejects_bad_ranges() {
        let bad_step = r#"{"name": "t", "command": ["run"], "parameters": {"a": {"type": "int", "low": 0, "high": 4, "step": 0}}}"#;
        assert!(matches!(
            TargetDeclaration::from_json(bad_step).unwrap_err(),
            AtError::Config(ConfigurationError::InvalidValue { .. })
        ));

        let empty = r#"{"name": "t", "command": ["run"], "parameters": {"a": {"type": "values", "values": []}}}"#;
        assert!(matches!(
            TargetDeclaration::from_json(empty).unwrap_err(),
            AtError::Config(ConfigurationError::EmptyRange { .. })
        ));

        let repeated = r#"{"name": "t", "command": ["run"], "parameters": {"a": {"type": "values", "values": ["fast", "slow", "fast"]}}}"#;
        assert_eq!(
            TargetDeclaration::from_json(repeated).unwrap_err().to_string(),
            AtError::Config(ConfigurationError::DuplicateValue {
                name: "a".into(),
                value: "fast".into()
            })
            .to_string()
        );

        let collapsed = r#"{"name": "t", "command": ["run"], "parameters": {"f": {"type": "float", "low": 1.0, "high": 1.0, "steps": 3}}}"#;
        assert!(matches!(
            TargetDeclaration::from_json(collapsed).unwrap_err(),
            AtError::Config(ConfigurationError::DuplicateValue { .. })
        ));

        let none = r#"{"name": "t", "command": ["run"], "parameters": {}}"#;
        assert!(matches!(
            TargetDeclaration::from_json(none).unwrap_err(),
            AtError::Config(ConfigurationError::EmptySpace)
        ));

        assert!(matches!(
            TargetDeclaration::from_json("{ not json").unwrap_err(),
            AtError::Serialization(_)
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.json");
        std::fs::write(&path, ASSEMBLER).unwrap();
        assert_eq!(TargetDeclaration::load(&path).unwrap().name, "assembler");
        assert!(matches!(
            TargetDeclaration::load(dir.path().join("missing.json")).unwrap_err(),
            AtError::Io(_)
        ));
    }
}
