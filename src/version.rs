//! Release-version parsing/comparison and the bootstrap-version fallback
//! table.
//!
//! The knowledge base keys forced changes by a small monotonic bootstrap
//! integer, not by release version -- but callers that haven't populated
//! `bootstrap_version` in every `defaults.json` need a fallback, so a
//! release version like `v7.1.0` also has to compare sensibly against
//! `v7.1` or `v7`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;

/// A release version string of the form `vM.m.p...`, compared
/// component-wise as integers with missing trailing positions treated as
/// zero (so `v7.1` and `v7.1.0` are equal).
#[derive(Clone, Debug, Default)]
pub struct ReleaseVersion(Vec<u64>);

impl ReleaseVersion {
    pub fn parse(s: &str) -> ReleaseVersion {
        let trimmed = s.trim().trim_start_matches('v').trim_start_matches('V');
        if trimmed.is_empty() {
            return ReleaseVersion(Vec::new());
        }
        let parts = trimmed
            .split('.')
            .map(|p| p.trim().parse::<u64>().unwrap_or(0))
            .collect();
        ReleaseVersion(parts)
    }

    fn component(&self, i: usize) -> u64 {
        *self.0.get(i).unwrap_or(&0)
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    /// Canonical `vM.m.p` form used as a key into the bootstrap fallback
    /// table; always exactly three components.
    pub fn canonical(&self) -> String {
        format!("v{}.{}.{}", self.component(0), self.component(1), self.component(2))
    }
}

impl FromStr for ReleaseVersion {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ReleaseVersion::parse(s))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("v0");
        }
        write!(f, "v")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReleaseVersion {}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let longest = self.len().max(other.len());
        for i in 0..longest {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => continue,
                other_ordering => return other_ordering,
            }
        }
        Ordering::Equal
    }
}

/// True iff `v` falls in `[from, to)`, treating a missing bound as
/// unbounded on that side.
pub fn in_half_open_range(v: &ReleaseVersion, from: Option<&ReleaseVersion>, to: Option<&ReleaseVersion>) -> bool {
    if let Some(from) = from {
        if v < from {
            return false;
        }
    }
    if let Some(to) = to {
        if v >= to {
            return false;
        }
    }
    true
}

lazy_static! {
    /// Intentionally sparse seed set: release version -> bootstrap integer.
    /// A KB that wants complete coverage should populate `bootstrap_version`
    /// in every `defaults.json` instead of relying on this table.
    static ref BOOTSTRAP_FALLBACK: HashMap<&'static str, u32> = {
        let mut m = HashMap::new();
        m.insert("v6.5.0", 66);
        m.insert("v7.0.0", 91);
        m.insert("v7.1.0", 95);
        m.insert("v7.5.0", 105);
        m.insert("v8.0.0", 120);
        m.insert("v8.5.0", 130);
        m
    };
}

/// Bootstrap version for a release version, via the fallback table. `0`
/// means unknown -- callers must then fall back further to release-version
/// range comparison.
pub fn bootstrap_fallback(v: &ReleaseVersion) -> u32 {
    BOOTSTRAP_FALLBACK.get(v.canonical().as_str()).copied().unwrap_or(0)
}

/// Bootstrap version to use: the KB-declared one if non-zero, else the
/// fallback table, else `0` (unknown).
pub fn resolve_bootstrap(declared: u32, release: &ReleaseVersion) -> u32 {
    if declared != 0 {
        declared
    } else {
        bootstrap_fallback(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_components_treated_as_zero() {
        assert_eq!(ReleaseVersion::parse("v7.1"), ReleaseVersion::parse("v7.1.0"));
        assert_eq!(ReleaseVersion::parse("v7"), ReleaseVersion::parse("v7.0.0"));
    }

    #[test]
    fn component_wise_ordering() {
        assert!(ReleaseVersion::parse("v6.5.0") < ReleaseVersion::parse("v7.0.0"));
        assert!(ReleaseVersion::parse("v7.1.0") < ReleaseVersion::parse("v7.10.0"));
        assert!(ReleaseVersion::parse("v7.5.0") < ReleaseVersion::parse("v7.5.1"));
    }

    #[test]
    fn half_open_range() {
        let from = ReleaseVersion::parse("v7.5.0");
        let to = ReleaseVersion::parse("v8.5.0");
        assert!(in_half_open_range(&ReleaseVersion::parse("v7.5.0"), Some(&from), Some(&to)));
        assert!(!in_half_open_range(&ReleaseVersion::parse("v8.5.0"), Some(&from), Some(&to)));
        assert!(!in_half_open_range(&ReleaseVersion::parse("v7.0.0"), Some(&from), Some(&to)));
    }

    #[test]
    fn bootstrap_fallback_is_sparse() {
        assert_eq!(bootstrap_fallback(&ReleaseVersion::parse("v7.5.0")), 105);
        assert_eq!(bootstrap_fallback(&ReleaseVersion::parse("v7.5.3")), 0);
    }
}
