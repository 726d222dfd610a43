//! Validates cached skill lists using SHA-256 checksums
//!
//! Skill entries are stored as JSON payloads carrying the list and a checksum
//! of its contents. A payload that fails to parse, or whose checksum does not
//! match, is reported as absent so the caller treats it as a cache miss and
//! rebuilds it from the store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Wrapper for a cached skill list with integrity validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedSkills {
    /// Skill names in the order they were written
    pub skills: Vec<String>,
    /// SHA-256 checksum of the skill list (hex encoded)
    pub checksum: String,
}

impl ValidatedSkills {
    pub fn new(skills: Vec<String>) -> Self {
        let checksum = Self::compute_checksum(&skills);
        Self { skills, checksum }
    }

    /// Length-prefixes every name so `["ab"]` and `["a", "b"]` hash differently.
    fn compute_checksum(skills: &[String]) -> String {
        let mut hasher = Sha256::new();
        for skill in skills {
            hasher.update((skill.len() as u64).to_be_bytes());
            hasher.update(skill.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.skills) == self.checksum
    }

    /// Serializes the entry for storage in cache
    pub fn seal(skills: &[String]) -> String {
        serde_json::to_string(&Self::new(skills.to_vec())).unwrap_or_default()
    }

    /// Deserializes and validates a cached payload
    ///
    /// Returns `Some(skills)` if valid, `None` if corrupted or not JSON.
    pub fn open(serialized: &str) -> Option<Vec<String>> {
        let entry: ValidatedSkills = serde_json::from_str(serialized).ok()?;

        if entry.is_valid() {
            Some(entry.skills)
        } else {
            tracing::warn!(
                "Skill cache validation failed: checksum mismatch. Expected: {}, Skills: {}",
                entry.checksum,
                entry.skills.len()
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skills(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_seal_open_preserves_order() {
        let list = skills(&["rust", "go", "kubernetes"]);
        let sealed = ValidatedSkills::seal(&list);
        assert_eq!(ValidatedSkills::open(&sealed), Some(list));
    }

    #[test]
    fn test_empty_list_is_a_valid_entry() {
        let sealed = ValidatedSkills::seal(&[]);
        assert_eq!(ValidatedSkills::open(&sealed), Some(vec![]));
    }

    #[test]
    fn test_tampered_cache_returns_none() {
        let sealed = ValidatedSkills::seal(&skills(&["solidity"]));
        let tampered = sealed.replace("solidity", "cobol");
        assert_eq!(ValidatedSkills::open(&tampered), None);
    }

    #[test]
    fn test_garbage_returns_none() {
        assert_eq!(ValidatedSkills::open("not json"), None);
        assert_eq!(ValidatedSkills::open(r#"["rust"]"#), None);
    }

    #[test]
    fn test_checksum_distinguishes_boundaries() {
        let joined = ValidatedSkills::new(skills(&["ab"]));
        let split = ValidatedSkills::new(skills(&["a", "b"]));
        assert_ne!(joined.checksum, split.checksum);
    }
}
