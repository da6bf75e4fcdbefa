use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

/// Case-insensitive identity of a username: trimmed and lowercased, never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameKey(String);

impl NameKey {
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_lowercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NameKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub type NameSet = BTreeSet<NameKey>;

/// Builds a normalized set, silently dropping names that are blank after trimming.
pub fn name_set<I, S>(names: I) -> NameSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| NameKey::new(name.as_ref()))
        .collect()
}

/// Appends `incoming` to `existing`, skipping names already present case-insensitively.
/// The first spelling and the original order are kept.
pub fn merge_names(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen: NameSet = name_set(existing);
    let mut merged = existing.to_vec();
    for name in incoming {
        let trimmed = name.trim();
        let Some(key) = NameKey::new(trimmed) else {
            continue;
        };
        if seen.insert(key) {
            merged.push(trimmed.to_string());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_key_trims_and_lowercases() {
        assert_eq!(NameKey::new("  PG ").unwrap().as_str(), "pg");
        assert!(NameKey::new("   ").is_none());
        assert!(NameKey::new("").is_none());
    }

    #[test]
    fn name_set_collapses_case_variants() {
        let set = name_set(["dang", "DANG", " Dang", "", "tptacek"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&NameKey::new("dang").unwrap()));
    }

    #[test]
    fn merge_names_keeps_first_spelling() {
        let existing = vec!["Alice".to_string(), "bob".to_string()];
        let incoming = vec!["alice".to_string(), " Carol ".to_string(), "  ".to_string()];
        assert_eq!(
            merge_names(&existing, &incoming),
            vec!["Alice".to_string(), "bob".to_string(), "Carol".to_string()]
        );
    }
}
