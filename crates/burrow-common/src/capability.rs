//! Capability strings.
//!
//! A capability looks a lot like the `$name-$version` strings used by
//! package managers: `python3-devel-3.9.2-rc1`. The version part is a
//! dot-separated list of atoms, each an optional integer followed by an
//! optional suffix. A capability satisfies a requirement when the names
//! are equal and its version is greater than or equal to the required one.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// One dot-separated version atom, e.g. `15` or `15rc` or `beta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionAtom {
    /// Leading numeric part; zero when the atom has none.
    pub number: u64,
    /// Trailing suffix, if any. No suffix sorts above any suffix, so
    /// `15` is greater than `15rc`.
    pub suffix: Option<String>,
}

impl VersionAtom {
    fn parse(word: &str) -> Self {
        let digits = word.bytes().take_while(u8::is_ascii_digit).count();
        let number = word[..digits].parse().unwrap_or(0);
        let rest = &word[digits..];
        VersionAtom {
            number,
            suffix: (!rest.is_empty()).then(|| rest.to_string()),
        }
    }

    fn cmp_atom(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number).then_with(|| {
            match (&self.suffix, &other.suffix) {
                (None, None) => Ordering::Equal,
                // 15 is greater than 15rc
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            }
        })
    }
}

/// A parsed capability identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// The identifier as given.
    pub id: String,
    /// Name part, everything up to the version.
    pub name: String,
    /// Version atoms, left to right.
    pub version: Vec<VersionAtom>,
}

impl Capability {
    /// Parse a `name-version` identifier.
    ///
    /// Returns `None` when the identifier carries no version: the version
    /// starts at the last `-` that is immediately followed by a digit.
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        let dash = id
            .char_indices()
            .rev()
            .find(|&(i, c)| {
                c == '-'
                    && id[i + 1..]
                        .chars()
                        .next()
                        .is_some_and(|next| next.is_ascii_digit())
            })
            .map(|(i, _)| i)?;

        let name = &id[..dash];
        let version_part = &id[dash + 1..];
        if name.is_empty() || version_part.is_empty() {
            return None;
        }

        let mut version = Vec::new();
        for word in version_part.split('.') {
            if word.is_empty() {
                return None;
            }
            version.push(VersionAtom::parse(word));
        }

        Some(Capability {
            id: id.to_string(),
            name: name.to_string(),
            version,
        })
    }

    /// Compare versions of two capabilities with the same name.
    ///
    /// Returns `None` when the names differ (the capabilities are
    /// incomparable). Atoms compare numerically left to right; at equal
    /// numeric parts an absent suffix beats any suffix, otherwise suffixes
    /// compare lexically. A shorter version list compares less than a
    /// longer one with an equal prefix.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        if self.name != other.name {
            return None;
        }

        for (a, b) in self.version.iter().zip(&other.version) {
            match a.cmp_atom(b) {
                Ordering::Equal => continue,
                unequal => return Some(unequal),
            }
        }

        Some(self.version.len().cmp(&other.version.len()))
    }

    /// True when this capability satisfies `requirement`: equal names and
    /// a version greater than or equal to the required one.
    #[must_use]
    pub fn satisfies(&self, requirement: &Self) -> bool {
        matches!(
            self.compare(requirement),
            Some(Ordering::Equal | Ordering::Greater)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(id: &str) -> Capability {
        Capability::parse(id).expect(id)
    }

    #[test]
    fn parse_splits_name_and_version() {
        let c = cap("python3-devel-3.9.2");
        assert_eq!(c.name, "python3-devel");
        assert_eq!(c.version.len(), 3);
        assert_eq!(c.version[0].number, 3);
        assert_eq!(c.version[2].number, 2);
    }

    #[test]
    fn parse_rejects_unversioned() {
        assert!(Capability::parse("python3-devel").is_none());
        assert!(Capability::parse("plain").is_none());
    }

    #[test]
    fn parse_suffix_atoms() {
        let c = cap("pkg-1.0rc2");
        assert_eq!(c.version[1].number, 0);
        assert_eq!(c.version[1].suffix.as_deref(), Some("rc2"));

        let c = cap("pkg-2.beta");
        assert_eq!(c.version[1].number, 0);
        assert_eq!(c.version[1].suffix.as_deref(), Some("beta"));
    }

    #[test]
    fn numeric_ordering() {
        assert_eq!(cap("a-1.2").compare(&cap("a-1.10")), Some(Ordering::Less));
        assert_eq!(cap("a-2.0").compare(&cap("a-1.9")), Some(Ordering::Greater));
        assert_eq!(cap("a-1.2").compare(&cap("a-1.2")), Some(Ordering::Equal));
    }

    #[test]
    fn no_suffix_beats_suffix() {
        // 15 > 15rc
        assert_eq!(cap("a-15").compare(&cap("a-15rc")), Some(Ordering::Greater));
        assert_eq!(cap("a-15rc").compare(&cap("a-15")), Some(Ordering::Less));
        // suffixes compare lexically
        assert_eq!(
            cap("a-15alpha").compare(&cap("a-15beta")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn shorter_version_is_less() {
        assert_eq!(cap("a-1.2").compare(&cap("a-1.2.1")), Some(Ordering::Less));
    }

    #[test]
    fn different_names_incomparable() {
        assert_eq!(cap("a-1").compare(&cap("b-1")), None);
    }

    #[test]
    fn requirement_matching() {
        let req = cap("python3-devel-3.8");
        assert!(cap("python3-devel-3.8.1").satisfies(&req));
        assert!(!cap("python3-devel-3.7.9").satisfies(&req));
        // 3.8.0rc: equal up to 3.8, extra atom makes it longer hence greater
        assert!(cap("python3-devel-3.8.0rc").satisfies(&req));
    }

    #[test]
    fn winner_among_candidates() {
        let req = cap("python3-devel-3.8");
        let candidates = ["python3-devel-3.7.9", "python3-devel-3.8.1", "python3-devel-3.8.0rc"];
        let best = candidates
            .iter()
            .map(|id| cap(id))
            .filter(|c| c.satisfies(&req))
            .max_by(|a, b| a.compare(b).unwrap());
        assert_eq!(best.unwrap().id, "python3-devel-3.8.1");
    }
}
