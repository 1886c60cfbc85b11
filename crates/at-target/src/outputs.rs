//! Resolution of declared output patterns inside a run directory.
//!
//! Patterns are gitignore-style globs anchored at the run directory: `*` and
//! `?` stay within one path component, `[...]` matches a character class and
//! `**` crosses any number of directories.

use at_types::{DeclaredOutput, DeclaredOutputs};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Strip leading `./` and anchor the glob at the root it is built for.
fn anchored(pattern: &str) -> String {
    format!("/{}", pattern.trim_start_matches("./"))
}

fn matcher(root: &Path, pattern: &str) -> Result<Override, ignore::Error> {
    let mut builder = OverrideBuilder::new(root);
    builder.add(&anchored(pattern))?;
    builder.build()
}

/// How deep the walk has to go, or `None` when `**` can match any depth.
fn walk_depth(pattern: &str) -> Option<usize> {
    let path = Path::new(pattern);
    if path.components().any(|c| c.as_os_str() == "**") {
        return None;
    }
    Some(
        path.components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .count(),
    )
}

/// Reject patterns that could escape the run directory, that cannot name a
/// file, or that do not compile as a glob.
pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Err("pattern is empty".to_string());
    }
    if pattern.starts_with('!') {
        return Err("negated patterns are not supported".to_string());
    }
    if pattern.ends_with('/') {
        return Err("pattern must name files, not a directory".to_string());
    }
    for component in Path::new(pattern).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err("pattern must be relative to the run directory".to_string()),
        }
    }
    matcher(Path::new(""), pattern)
        .map(|_| ())
        .map_err(|e| format!("invalid glob {pattern:?}: {e}"))
}

/// Files under `root` matching `pattern`, sorted. Invalid patterns and
/// unreadable directories resolve to nothing.
pub fn resolve(root: &Path, pattern: &str) -> Vec<PathBuf> {
    let Ok(overrides) = matcher(root, pattern) else {
        return Vec::new();
    };
    let walker = WalkBuilder::new(root)
        .standard_filters(false) // run directories have no ignore files to honour
        .follow_links(false)
        .max_depth(walk_depth(pattern))
        .overrides(overrides)
        .build();

    let mut matches: Vec<PathBuf> = walker
        .filter_map(Result::ok)
        .filter(|entry| entry.depth() > 0 && entry.path().is_file())
        .map(|entry| entry.into_path())
        .collect();
    matches.sort();
    matches
}

/// Resolve every declared `key -> pattern` pair.
pub fn resolve_all(root: &Path, outputs: &BTreeMap<String, String>) -> DeclaredOutputs {
    outputs
        .iter()
        .map(|(key, pattern)| {
            let declared = DeclaredOutput {
                pattern: pattern.clone(),
                paths: resolve(root, pattern),
            };
            (key.clone(), declared)
        })
        .collect()
}
