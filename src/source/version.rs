//! Minimal version comparison for lock/metadata agreement checks
//!
//! Only the release segment (`1.2.3`) participates in ordering. Pre-release,
//! post, dev and local suffixes are accepted but ignored, which is enough to
//! detect a lock file that pins a version outside the declared range.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// PEP 440 suffixes allowed after the release segment
fn suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:[-_.]?(?:a|b|c|rc|alpha|beta|pre|preview)[-_.]?\d*)?(?:-\d+|[-_.]?(?:post|rev|r)[-_.]?\d*)?(?:[-_.]?dev[-_.]?\d*)?(?:\+[a-z0-9]+(?:[-_.][a-z0-9]+)*)?$",
        )
        .expect("valid regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    release: Vec<u64>,
}

impl Version {
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim().trim_start_matches(|c: char| c == 'v' || c == 'V');
        let end = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (mut numeric, mut suffix) = trimmed.split_at(end);
        // `1.0.post1`: the dot belongs to the suffix
        if !suffix.is_empty() && numeric.ends_with('.') {
            numeric = &numeric[..numeric.len() - 1];
            suffix = &trimmed[numeric.len()..];
        }
        if numeric.is_empty() || !suffix_re().is_match(suffix) {
            return None;
        }
        let release: Vec<u64> = numeric
            .split('.')
            .map(|s| s.parse::<u64>())
            .collect::<Result<_, _>>()
            .ok()?;
        Some(Self { release })
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    fn segment(&self, idx: usize) -> u64 {
        self.release.get(idx).copied().unwrap_or(0)
    }

    /// Upper bound for `^` constraints: bump the first non-zero segment
    fn caret_upper(&self) -> Version {
        let idx = self
            .release
            .iter()
            .position(|s| *s != 0)
            .unwrap_or(self.release.len().saturating_sub(1));
        self.bump(idx)
    }

    /// Upper bound for `~` constraints: bump minor, or major when only major given
    fn tilde_upper(&self) -> Version {
        if self.release.len() >= 2 {
            self.bump(1)
        } else {
            self.bump(0)
        }
    }

    /// Upper bound for `~=`: bump the second-to-last segment
    fn compatible_upper(&self) -> Version {
        let idx = self.release.len().saturating_sub(2);
        self.bump(idx)
    }

    fn bump(&self, idx: usize) -> Version {
        let mut release: Vec<u64> = (0..=idx).map(|i| self.segment(i)).collect();
        release[idx] += 1;
        Version { release }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for idx in 0..len {
            match self.segment(idx).cmp(&other.segment(idx)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

fn clause_satisfied(version: &Version, clause: &str) -> Option<bool> {
    let clause = clause.trim();
    if clause.is_empty() || clause == "*" {
        return Some(true);
    }

    const OPERATORS: [&str; 10] = ["===", "==", "!=", "~=", ">=", "<=", ">", "<", "^", "~"];
    let (op, rest) = OPERATORS
        .iter()
        .find_map(|op| clause.strip_prefix(*op).map(|rest| (*op, rest.trim())))
        .unwrap_or(("==", clause));

    if let Some(prefix) = rest.strip_suffix(".*") {
        let wanted = Version::parse(prefix)?;
        let matches = wanted
            .release
            .iter()
            .enumerate()
            .all(|(i, seg)| version.segment(i) == *seg);
        return match op {
            "==" => Some(matches),
            "!=" => Some(!matches),
            _ => None,
        };
    }

    let bound = Version::parse(rest)?;
    let result = match op {
        "===" | "==" => *version == bound,
        "!=" => *version != bound,
        ">=" => *version >= bound,
        "<=" => *version <= bound,
        ">" => *version > bound,
        "<" => *version < bound,
        "^" => *version >= bound && *version < bound.caret_upper(),
        "~" => *version >= bound && *version < bound.tilde_upper(),
        "~=" => *version >= bound && *version < bound.compatible_upper(),
        _ => return None,
    };
    Some(result)
}

/// Canonical constraint text: no whitespace, clauses joined by `,`.
///
/// Whitespace after an operator is dropped (`>= 0.29`), whitespace between two
/// clauses is an AND the way Poetry reads it (`>=0.100 <0.110`).
pub fn normalize_constraint(constraint: &str) -> String {
    let mut out = String::with_capacity(constraint.len());
    for token in constraint.split_whitespace() {
        let glue = out.is_empty()
            || out.ends_with([',', '|', '<', '>', '=', '!', '~', '^'])
            || token.starts_with([',', '|']);
        if !glue {
            out.push(',');
        }
        out.push_str(token);
    }
    out
}

/// Check `version` against a PEP 440 or Poetry-style constraint.
///
/// Returns `None` when either side cannot be interpreted.
pub fn satisfies(version: &str, constraint: &str) -> Option<bool> {
    let version = Version::parse(version)?;
    let constraint = normalize_constraint(constraint);
    let mut any_branch = false;
    for branch in constraint.split("||") {
        let mut all = true;
        for clause in branch.split(',') {
            if !clause_satisfied(&version, clause)? {
                all = false;
                break;
            }
        }
        any_branch |= all;
    }
    Some(any_branch)
}
