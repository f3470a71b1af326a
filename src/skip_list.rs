use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use tracing::debug;

use crate::error::Error;

// -------------------------------------------------------------------------------------------------
// SkipAction
// -------------------------------------------------------------------------------------------------
/// What a matching skip rule decides for a path.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SkipAction {
    Include,
    Exclude,
}

// -------------------------------------------------------------------------------------------------
// SkipRule
// -------------------------------------------------------------------------------------------------
/// One `+`/`-` glob rule from a skip list.
#[derive(Debug, Clone)]
pub struct SkipRule {
    pub action: SkipAction,
    pub pattern: String,
    matcher: Regex,
}

impl SkipRule {
    fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

// -------------------------------------------------------------------------------------------------
// SkipList
// -------------------------------------------------------------------------------------------------
/// An ordered sequence of skip rules, evaluated top to bottom with first match winning.
///
/// A path matching no rule is included. The same machinery serves both call sites: analysis-time
/// skip filtering and report-time path filtering.
///
/// Text format, one rule per line: a sign (`+` to include, `-` to exclude) immediately followed
/// by a glob pattern. Blank lines and lines starting with `#` are ignored. Glob semantics:
/// a leading `/` anchors to an absolute path, a leading `*` matches any path prefix, and `*`
/// elsewhere matches zero or more characters including path separators.
#[derive(Debug, Clone, Default)]
pub struct SkipList {
    rules: Vec<SkipRule>,
}

impl SkipList {
    /// A skip list with no rules, which includes every path.
    pub fn empty() -> Self {
        SkipList::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[SkipRule] {
        &self.rules
    }

    /// Parse a skip list from its text format.
    ///
    /// Any line that does not parse fails the whole load: silently ignoring a bad line would
    /// silently change which files get analyzed.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut rules = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let malformed = || Error::MalformedSkipRule {
                line_no: idx + 1,
                line: raw.to_string(),
            };

            let (action, pattern) = match line.split_at(1) {
                ("+", rest) => (SkipAction::Include, rest),
                ("-", rest) => (SkipAction::Exclude, rest),
                _ => return Err(malformed()),
            };
            if pattern.is_empty() {
                return Err(malformed());
            }

            let matcher = glob_to_regex(pattern).map_err(|_| malformed())?;
            rules.push(SkipRule {
                action,
                pattern: pattern.to_string(),
                matcher,
            });
        }
        debug!("Parsed skip list with {} rules", rules.len());
        Ok(SkipList { rules })
    }

    /// Load a skip list from a file in the text format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read skip list from {}", path.display()))?;
        let skip_list = Self::parse(&text)
            .with_context(|| format!("Failed to parse skip list from {}", path.display()))?;
        Ok(skip_list)
    }

    /// Decide whether `path` participates in analysis or reporting.
    ///
    /// Pure: evaluating this twice on the same input never differs.
    pub fn is_included(&self, path: &str) -> bool {
        for rule in &self.rules {
            if rule.matches(path) {
                return rule.action == SkipAction::Include;
            }
        }
        true
    }
}

/// Translate a skip glob into an anchored regex.
///
/// `*` becomes `.*` (crossing path separators), `?` becomes any single character, everything else
/// is matched literally. The whole path must match, so `/lib/*` covers `/lib/keep.c` but not
/// `/src/lib/keep.c`, while `*/lib/*` covers both.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_match_wins() {
        let sl = SkipList::parse("-/lib/*\n+/lib/keep.c\n").unwrap();
        // The exclude rule is first, so it decides for everything under /lib, including keep.c.
        assert!(!sl.is_included("/lib/keep.c"));
        assert!(!sl.is_included("/lib/other.c"));
        assert!(sl.is_included("/src/main.c"));

        let sl = SkipList::parse("+/lib/keep.c\n-/lib/*\n").unwrap();
        assert!(sl.is_included("/lib/keep.c"));
        assert!(!sl.is_included("/lib/other.c"));
    }

    #[test]
    fn default_is_include() {
        let sl = SkipList::empty();
        assert!(sl.is_included("/anything/at/all.c"));
    }

    #[test]
    fn leading_star_matches_any_prefix() {
        let sl = SkipList::parse("-*/third_party/*\n").unwrap();
        assert!(!sl.is_included("/home/user/project/third_party/zlib/inflate.c"));
        assert!(sl.is_included("/home/user/project/src/main.c"));
    }

    #[test]
    fn star_crosses_path_separators() {
        let sl = SkipList::parse("-/build/*\n").unwrap();
        assert!(!sl.is_included("/build/generated/deep/nested/file.c"));
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let sl = SkipList::parse("# exclude generated sources\n\n-*/gen/*\n").unwrap();
        assert_eq!(sl.rules().len(), 1);
    }

    #[test]
    fn malformed_line_fails_whole_load() {
        let err = SkipList::parse("-/lib/*\nbogus\n").unwrap_err();
        match err {
            Error::MalformedSkipRule { line_no, line } => {
                assert_eq!(line_no, 2);
                assert_eq!(line, "bogus");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sign_without_pattern_is_malformed() {
        assert!(SkipList::parse("-\n").is_err());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let sl = SkipList::parse("-/lib/*\n+*/keep/*\n-*\n").unwrap();
        for path in ["/lib/a.c", "/x/keep/b.c", "/src/c.c"] {
            assert_eq!(sl.is_included(path), sl.is_included(path));
        }
    }
}
