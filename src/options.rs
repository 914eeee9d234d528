use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::entry::FileStat;
use crate::error::GlobError;
use crate::input::{describe, inspect};

/// Options recognized by the deprecated-option check, with no effect besides
/// failing validation.
const DEPRECATED: &[&str] = &["sync"];

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for a [`GlobStream`](crate::GlobStream).
///
/// Build it with the chained methods below, or parse loosely typed input
/// with [`Options::from_value`]. Every field defaults to "off".
///
/// # Example
///
/// ```rust
/// let opts = globstream::Options::default()
///     .cwd("src")
///     .ignore("**/target/**")
///     .realpath(true)
///     .stat(true);
/// assert!(opts.realpath);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Options {
    /// Working directory for matching and for computing absolute paths.
    pub cwd: Option<PathBuf>,

    /// Filesystem root used for patterns that start with `/`.
    pub root: Option<PathBuf>,

    /// Patterns excluded from matches.
    #[serde(deserialize_with = "one_or_many")]
    pub ignore: Vec<String>,

    /// Resolve every match to its canonical path.
    pub realpath: bool,

    /// Pre-seeded path → canonical path entries.
    pub realpath_cache: HashMap<String, String>,

    /// Report repeated matches instead of deduplicating them.
    pub nounique: bool,

    /// Treat `**` like `*`.
    pub noglobstar: bool,

    /// Report absolute paths.
    pub absolute: bool,

    /// Attach [`FileStat`] info to every match.
    pub stat: bool,

    /// Pre-seeded absolute path → stat entries. A literal pattern found here
    /// matches without touching the filesystem.
    pub stat_cache: HashMap<String, FileStat>,

    /// Let wildcards match names starting with `.`.
    pub dot: bool,

    /// Skip directories.
    pub nodir: bool,

    /// Append `/` to matched directories.
    pub mark: bool,

    /// Match case-insensitively.
    pub nocase: bool,

    /// Follow symlinked directories while walking.
    pub follow: bool,

    /// Suppress warnings about skipped entries.
    pub silent: Option<bool>,

    /// Fail on unreadable entries instead of skipping them.
    pub strict: Option<bool>,
}

impl Options {
    // ── Matching ──────────────────────────────────────────────────────────

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Add one ignore pattern. Call repeatedly for more.
    pub fn ignore(mut self, pattern: impl Into<String>) -> Self {
        self.ignore.push(pattern.into());
        self
    }

    pub fn noglobstar(mut self, yes: bool) -> Self {
        self.noglobstar = yes;
        self
    }

    pub fn dot(mut self, yes: bool) -> Self {
        self.dot = yes;
        self
    }

    pub fn nodir(mut self, yes: bool) -> Self {
        self.nodir = yes;
        self
    }

    pub fn mark(mut self, yes: bool) -> Self {
        self.mark = yes;
        self
    }

    pub fn nocase(mut self, yes: bool) -> Self {
        self.nocase = yes;
        self
    }

    pub fn follow(mut self, yes: bool) -> Self {
        self.follow = yes;
        self
    }

    pub fn silent(mut self, yes: bool) -> Self {
        self.silent = Some(yes);
        self
    }

    pub fn strict(mut self, yes: bool) -> Self {
        self.strict = Some(yes);
        self
    }

    // ── Results ───────────────────────────────────────────────────────────

    pub fn realpath(mut self, yes: bool) -> Self {
        self.realpath = yes;
        self
    }

    pub fn realpath_cache_entry(mut self, path: impl Into<String>, resolved: impl Into<String>) -> Self {
        self.realpath_cache.insert(path.into(), resolved.into());
        self
    }

    pub fn nounique(mut self, yes: bool) -> Self {
        self.nounique = yes;
        self
    }

    pub fn absolute(mut self, yes: bool) -> Self {
        self.absolute = yes;
        self
    }

    pub fn stat(mut self, yes: bool) -> Self {
        self.stat = yes;
        self
    }

    pub fn stat_cache_entry(mut self, path: impl Into<String>, stat: FileStat) -> Self {
        self.stat_cache.insert(path.into(), stat);
        self
    }

    // ── Validation ────────────────────────────────────────────────────────

    /// Parse and validate loosely typed options.
    ///
    /// # Errors
    ///
    /// [`GlobError::InvalidOptions`] when `value` is not an object, holds an
    /// unknown key or a mistyped value; [`GlobError::DeprecatedOption`] when a
    /// deprecated key is present, whatever its value.
    pub fn from_value(value: &Value) -> Result<Self, GlobError> {
        let Some(map) = value.as_object() else {
            return Err(GlobError::InvalidOptions(format!(
                "Expected glob options to be an object, but got {}.",
                describe(value)
            )));
        };

        for &option in DEPRECATED {
            if let Some(v) = map.get(option) {
                return Err(GlobError::DeprecatedOption { option, value: inspect(v) });
            }
        }

        let opts: Self = serde_json::from_value(value.clone())
            .map_err(|e| GlobError::InvalidOptions(format!("Invalid glob options: {e}.")))?;
        opts.check()?;
        Ok(opts)
    }

    /// Semantic checks the type system can't express.
    pub(crate) fn check(&self) -> Result<(), GlobError> {
        if let Some(cwd) = &self.cwd {
            if cwd.as_os_str().is_empty() {
                return Err(GlobError::InvalidOptions(
                    "`cwd` option must be a non-empty path, but got ''.".into(),
                ));
            }
        }

        if self.ignore.iter().any(String::is_empty) {
            return Err(GlobError::InvalidOptions(
                "`ignore` option must not contain empty patterns.".into(),
            ));
        }

        Ok(())
    }

    /// The options handed to the match source: quiet and strict unless the
    /// caller said otherwise, and never resolving realpaths itself.
    pub(crate) fn for_source(&self) -> Self {
        Self {
            silent: self.silent.or(Some(true)),
            strict: self.strict.or(Some(true)),
            realpath: false,
            ..self.clone()
        }
    }
}

fn one_or_many<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(de)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_camel_case_keys() {
        let opts = Options::from_value(&json!({
            "cwd": ".",
            "ignore": "index.js",
            "realpathCache": { "/a": "/b" },
            "nounique": true,
            "statCache": { "/x": { "kind": "dir", "size": 0 } },
        }))
        .unwrap();

        assert_eq!(opts.cwd, Some(PathBuf::from(".")));
        assert_eq!(opts.ignore, vec!["index.js".to_string()]);
        assert_eq!(opts.realpath_cache.get("/a").map(String::as_str), Some("/b"));
        assert!(opts.nounique);
        assert!(opts.stat_cache["/x"].is_dir());
    }

    #[test]
    fn rejects_arrays_naming_the_type() {
        let err = Options::from_value(&json!([1, 2])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected glob options to be an object, but got an array [ 1, 2 ]."
        );
    }

    #[test]
    fn rejects_deprecated_sync_with_any_value() {
        let err = Options::from_value(&json!({ "sync": true })).unwrap_err();
        assert!(matches!(err, GlobError::DeprecatedOption { option: "sync", .. }));
        assert!(err.to_string().ends_with("but true was provided."));

        let err = Options::from_value(&json!({ "sync": false })).unwrap_err();
        assert!(err.to_string().ends_with("but false was provided."));
    }

    #[test]
    fn rejects_unknown_and_mistyped_keys() {
        let err = Options::from_value(&json!({ "nonsense": 1 })).unwrap_err();
        assert!(err.to_string().contains("unknown field `nonsense`"), "{err}");

        let err = Options::from_value(&json!({ "stat": "yes" })).unwrap_err();
        assert!(err.to_string().contains("invalid type"), "{err}");
    }

    #[test]
    fn rejects_empty_cwd() {
        let err = Options::default().cwd("").check().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn source_options_force_quiet_strict_no_realpath() {
        let source = Options::default().realpath(true).silent(false).for_source();
        assert!(!source.realpath);
        assert_eq!(source.silent, Some(false));
        assert_eq!(source.strict, Some(true));
    }
}
