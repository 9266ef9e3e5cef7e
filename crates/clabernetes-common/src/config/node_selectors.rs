//! Node selector resolution by image name
//!
//! Patterns are matched with an explicit [`ImageMatchStrategy`] taken from
//! the global config. Glob patterns use `globset` syntax, where `*` also
//! crosses `/`. The reserved `default` pattern applies only when no
//! other pattern matches.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use globset::{Glob, GlobMatcher};

/// Pattern key applied when nothing else matches
pub const DEFAULT_PATTERN_KEY: &str = "default";

/// How node selector patterns are compared with image names
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageMatchStrategy {
    /// `*` matches any run of characters; the pattern with most literal characters wins
    #[default]
    Glob,
    /// Pattern is a literal prefix of the image; the longest prefix wins
    Prefix,
    /// Pattern must equal the image
    Exact,
}

impl ImageMatchStrategy {
    /// Specificity of `pattern` against `image`, `None` when it does not match
    ///
    /// Higher is more specific.
    pub fn score(&self, pattern: &str, image: &str) -> Option<usize> {
        match self {
            Self::Glob => glob_matcher(pattern)
                .ok()
                .filter(|matcher| matcher.is_match(image))
                .map(|_| literal_len(pattern)),
            Self::Prefix => image.starts_with(pattern).then_some(pattern.len()),
            Self::Exact => (pattern == image).then_some(pattern.len()),
        }
    }
}

impl FromStr for ImageMatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "glob" => Ok(Self::Glob),
            "prefix" => Ok(Self::Prefix),
            "exact" => Ok(Self::Exact),
            other => Err(format!(
                "unknown match strategy '{other}', expected one of glob, prefix, exact"
            )),
        }
    }
}

impl fmt::Display for ImageMatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Glob => write!(f, "glob"),
            Self::Prefix => write!(f, "prefix"),
            Self::Exact => write!(f, "exact"),
        }
    }
}

/// Resolve the node selectors for `image`
///
/// Ties on specificity go to the lexicographically first pattern, which is the
/// iteration order of the map. Always returns a (possibly empty) owned map.
pub fn resolve_node_selectors(
    image: &str,
    rules: &BTreeMap<String, BTreeMap<String, String>>,
    strategy: ImageMatchStrategy,
) -> BTreeMap<String, String> {
    let mut best: Option<(usize, &BTreeMap<String, String>)> = None;

    for (pattern, selectors) in rules {
        if pattern == DEFAULT_PATTERN_KEY {
            continue;
        }
        let Some(score) = strategy.score(pattern, image) else {
            continue;
        };
        if best.map_or(true, |(best_score, _)| score > best_score) {
            best = Some((score, selectors));
        }
    }

    best.map(|(_, selectors)| selectors)
        .or_else(|| rules.get(DEFAULT_PATTERN_KEY))
        .cloned()
        .unwrap_or_default()
}

/// Check every pattern in `rules` compiles under `strategy`
///
/// Only glob patterns can be malformed; the `default` key is never compiled.
pub fn validate_patterns(
    rules: &BTreeMap<String, BTreeMap<String, String>>,
    strategy: ImageMatchStrategy,
) -> Result<(), String> {
    if strategy != ImageMatchStrategy::Glob {
        return Ok(());
    }

    rules
        .keys()
        .filter(|pattern| pattern.as_str() != DEFAULT_PATTERN_KEY)
        .try_for_each(|pattern| {
            glob_matcher(pattern)
                .map(|_| ())
                .map_err(|e| format!("invalid image pattern '{pattern}': {e}"))
        })
}

fn glob_matcher(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    Ok(Glob::new(pattern)?.compile_matcher())
}

/// Characters in `pattern` that are not wildcards
fn literal_len(pattern: &str) -> usize {
    pattern.chars().filter(|c| !matches!(c, '*' | '?')).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(zone: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("topology.kubernetes.io/zone".to_string(), zone.to_string())])
    }

    fn rules() -> BTreeMap<String, BTreeMap<String, String>> {
        BTreeMap::from([
            ("ghcr.io/nokia/srlinux*".to_string(), selector("a")),
            ("ghcr.io/nokia/srlinux:24.*".to_string(), selector("b")),
            ("*/ceos:*".to_string(), selector("c")),
            (DEFAULT_PATTERN_KEY.to_string(), selector("default")),
        ])
    }

    fn glob_matches(pattern: &str, image: &str) -> bool {
        ImageMatchStrategy::Glob.score(pattern, image).is_some()
    }

    #[test]
    fn glob_matching() {
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("*", ""));
        assert!(glob_matches("a*c", "abc"));
        assert!(glob_matches("a*c", "ac"));
        assert!(glob_matches("a*b*c", "a-b-c"));
        assert!(!glob_matches("a*b*c", "a-c-b"));
        assert!(!glob_matches("ab*ba", "aba"));
        assert!(glob_matches("exact", "exact"));
        assert!(!glob_matches("exact", "exactly"));
        // `*` crosses registry path separators
        assert!(glob_matches("ghcr.io/*:24.*", "ghcr.io/nokia/srlinux:24.3.1"));
    }

    #[test]
    fn glob_score_counts_literal_characters() {
        assert_eq!(
            ImageMatchStrategy::Glob.score("ghcr.io/*", "ghcr.io/nokia/srlinux"),
            Some(8)
        );
        assert_eq!(ImageMatchStrategy::Glob.score("*", "alpine"), Some(0));
    }

    #[test]
    fn malformed_glob_never_matches() {
        assert_eq!(ImageMatchStrategy::Glob.score("ghcr.io/[nokia*", "ghcr.io/[nokia"), None);
    }

    #[test]
    fn validates_glob_patterns_only() {
        let malformed = BTreeMap::from([
            ("ghcr.io/[nokia*".to_string(), selector("a")),
            (DEFAULT_PATTERN_KEY.to_string(), selector("default")),
        ]);

        let err = validate_patterns(&malformed, ImageMatchStrategy::Glob).unwrap_err();
        assert!(err.contains("ghcr.io/[nokia*"));

        assert!(validate_patterns(&malformed, ImageMatchStrategy::Prefix).is_ok());
        assert!(validate_patterns(&rules(), ImageMatchStrategy::Glob).is_ok());
    }

    #[test]
    fn most_specific_glob_wins() {
        let got = resolve_node_selectors(
            "ghcr.io/nokia/srlinux:24.3.1",
            &rules(),
            ImageMatchStrategy::Glob,
        );
        assert_eq!(got, selector("b"));

        let got = resolve_node_selectors(
            "ghcr.io/nokia/srlinux:23.10",
            &rules(),
            ImageMatchStrategy::Glob,
        );
        assert_eq!(got, selector("a"));
    }

    #[test]
    fn default_pattern_applies_on_miss() {
        let got = resolve_node_selectors("docker.io/library/alpine", &rules(), ImageMatchStrategy::Glob);
        assert_eq!(got, selector("default"));
    }

    #[test]
    fn default_key_is_not_a_literal_pattern() {
        let got = resolve_node_selectors("default", &rules(), ImageMatchStrategy::Exact);
        assert_eq!(got, selector("default"));
    }

    #[test]
    fn no_match_without_default_is_empty() {
        let mut rules = rules();
        rules.remove(DEFAULT_PATTERN_KEY);
        let got = resolve_node_selectors("docker.io/library/alpine", &rules, ImageMatchStrategy::Glob);
        assert!(got.is_empty());
        assert!(resolve_node_selectors("x", &BTreeMap::new(), ImageMatchStrategy::Glob).is_empty());
    }

    #[test]
    fn prefix_strategy_prefers_longest_prefix() {
        let rules = BTreeMap::from([
            ("ghcr.io/".to_string(), selector("registry")),
            ("ghcr.io/nokia/".to_string(), selector("nokia")),
        ]);
        let got = resolve_node_selectors("ghcr.io/nokia/srlinux", &rules, ImageMatchStrategy::Prefix);
        assert_eq!(got, selector("nokia"));
    }

    #[test]
    fn exact_strategy_ignores_wildcards() {
        let got = resolve_node_selectors(
            "ghcr.io/nokia/srlinux:24.3.1",
            &rules(),
            ImageMatchStrategy::Exact,
        );
        assert_eq!(got, selector("default"));
    }

    #[test]
    fn equal_specificity_goes_to_first_pattern() {
        let rules = BTreeMap::from([
            ("a*".to_string(), selector("first")),
            ("*a".to_string(), selector("second")),
        ]);
        let got = resolve_node_selectors("aa", &rules, ImageMatchStrategy::Glob);
        // "*a" sorts before "a*"
        assert_eq!(got, selector("second"));
    }

    #[test]
    fn parses_strategy_names() {
        assert_eq!("".parse::<ImageMatchStrategy>(), Ok(ImageMatchStrategy::Glob));
        assert_eq!("Prefix".parse::<ImageMatchStrategy>(), Ok(ImageMatchStrategy::Prefix));
        assert_eq!("exact".parse::<ImageMatchStrategy>(), Ok(ImageMatchStrategy::Exact));
        assert!("regex".parse::<ImageMatchStrategy>().is_err());
    }
}
