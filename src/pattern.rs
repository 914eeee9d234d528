//! Pattern preprocessing shared by the default source.
//!
//! `glob::Pattern` handles `*`, `?`, `[...]` and whole-component `**`.
//! Everything else the source promises (brace alternation, numeric ranges,
//! `noglobstar`, walk-base extraction) happens here before compilation.

use glob::{MatchOptions, Pattern};

use crate::error::GlobError;

/// Expand `{a,b}` alternation and `{1..3}` numeric ranges.
///
/// Groups may nest. A group without a top-level comma or range (e.g. `{x}`)
/// and an unbalanced `{` are kept literally. Backslash escapes are preserved.
pub(crate) fn expand_braces(pattern: &str) -> Vec<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '{' => {
                if let Some((close, alternatives)) = parse_group(&chars, i) {
                    let pre: String = chars[..i].iter().collect();
                    let post: String = chars[close + 1..].iter().collect();
                    return alternatives
                        .iter()
                        .flat_map(|alt| expand_braces(&format!("{pre}{alt}{post}")))
                        .collect();
                }
            }
            _ => {}
        }
        i += 1;
    }

    vec![pattern.to_string()]
}

/// Parse the brace group opening at `open`. Returns the closing index and the
/// group's alternatives, or `None` when the group is not expandable.
fn parse_group(chars: &[char], open: usize) -> Option<(usize, Vec<String>)> {
    let mut depth = 0usize;
    let mut commas = Vec::new();
    let mut i = open + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '{' => depth += 1,
            '}' if depth > 0 => depth -= 1,
            '}' => {
                let body = &chars[open + 1..i];
                if commas.is_empty() {
                    let body: String = body.iter().collect();
                    return numeric_range(&body).map(|seq| (i, seq));
                }
                let mut alternatives = Vec::with_capacity(commas.len() + 1);
                let mut start = open + 1;
                for &comma in &commas {
                    alternatives.push(chars[start..comma].iter().collect());
                    start = comma + 1;
                }
                alternatives.push(chars[start..i].iter().collect());
                return Some((i, alternatives));
            }
            ',' if depth == 0 => commas.push(i),
            _ => {}
        }
        i += 1;
    }

    None
}

fn numeric_range(body: &str) -> Option<Vec<String>> {
    let (from, to) = body.split_once("..")?;
    let from: i64 = from.parse().ok()?;
    let to: i64 = to.parse().ok()?;
    let seq: Vec<String> = if from <= to {
        (from..=to).map(|n| n.to_string()).collect()
    } else {
        (to..=from).rev().map(|n| n.to_string()).collect()
    };
    Some(seq)
}

/// Whether a single path component needs pattern matching.
pub(crate) fn has_magic(component: &str) -> bool {
    let mut escaped = false;
    for c in component.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

/// Remove backslash escapes from a literal component.
pub(crate) fn unescape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    let mut chars = component.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Rewrite one component's stars. `**` survives only as a whole component and
/// only while globstar is enabled; every other run of stars becomes `*`.
fn rewrite_stars(component: &str, globstar: bool) -> String {
    if component == "**" && globstar {
        return component.to_string();
    }
    let mut out = String::with_capacity(component.len());
    let mut prev_star = false;
    let mut escaped = false;
    for c in component.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            prev_star = false;
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '*' if prev_star => {}
            _ => out.push(c),
        }
        prev_star = c == '*';
    }
    out
}

/// One brace-expanded pattern, split into the literal part the walker starts
/// from and the part that needs matching.
#[derive(Debug)]
pub(crate) enum Segment {
    /// No magic at all: the path is checked directly.
    Literal { path: String, dir_only: bool },

    /// Walk `prefix` (as written, possibly empty) and match the remainder
    /// against paths relative to it.
    Walk {
        prefix: String,
        absolute: bool,
        remainder: Pattern,
        /// Maximum walk depth below the prefix, `None` when a `**` is present.
        depth: Option<usize>,
        /// The remainder consists only of `**` components, so the prefix
        /// itself matches too.
        matches_base: bool,
        dir_only: bool,
    },
}

impl Segment {
    /// Split and compile one expanded pattern.
    pub(crate) fn compile(pattern: &str, globstar: bool) -> Result<Option<Self>, GlobError> {
        if pattern.is_empty() {
            return Ok(None);
        }

        let absolute = pattern.starts_with('/');
        let dir_only = pattern.len() > 1 && pattern.ends_with('/');
        let trimmed = pattern.trim_end_matches('/');
        let components: Vec<String> = trimmed
            .split('/')
            .enumerate()
            .filter(|(i, c)| !(c.is_empty() && *i != 0))
            .map(|(_, c)| rewrite_stars(c, globstar))
            .collect();

        let split = components.iter().position(|c| has_magic(c));
        let Some(split) = split else {
            let path = components.iter().map(|c| unescape(c)).collect::<Vec<_>>().join("/");
            let path = if path.is_empty() && absolute { "/".to_string() } else { path };
            return Ok(Some(Self::Literal { path, dir_only }));
        };

        let prefix = components[..split].iter().map(|c| unescape(c)).collect::<Vec<_>>().join("/");
        let prefix = if prefix.is_empty() && absolute { "/".to_string() } else { prefix };
        let rest = &components[split..];
        let remainder_text = rest.join("/");

        let remainder = Pattern::new(&remainder_text).map_err(|e| GlobError::InvalidGlob {
            pattern: pattern.to_string(),
            message: e.msg.to_string(),
        })?;

        let depth = if rest.iter().any(|c| c == "**") { None } else { Some(rest.len()) };
        let matches_base = rest.iter().all(|c| c == "**");

        Ok(Some(Self::Walk { prefix, absolute, remainder, depth, matches_base, dir_only }))
    }
}

/// Matching flags derived from the `dot` and `nocase` options.
pub(crate) fn match_options(dot: bool, nocase: bool) -> MatchOptions {
    MatchOptions {
        case_sensitive: !nocase,
        require_literal_separator: true,
        require_literal_leading_dot: !dot,
    }
}
