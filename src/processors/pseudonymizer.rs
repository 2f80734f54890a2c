use crate::utils::constants::PSEUDONYM_SALT;
use sha2::{Digest, Sha256};

/// Length of a pseudonym: hex-encoded SHA-256.
pub const PSEUDONYM_LEN: usize = 64;

/// Deterministic, one-way replacement for direct identifiers.
///
/// `sha256(identifier || salt)`, hex encoded. The salt is a fixed,
/// non-secret constant so the same sensor always maps to the same pseudonym.
#[derive(Debug, Clone)]
pub struct Pseudonymizer {
    salt: String,
}

impl Pseudonymizer {
    pub fn new() -> Self {
        Self::with_salt(PSEUDONYM_SALT)
    }

    pub fn with_salt(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    pub fn pseudonymize(&self, sensor_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(sensor_id.as_bytes());
        hasher.update(self.salt.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Default for Pseudonymizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_deterministic() {
        let p = Pseudonymizer::new();
        assert_eq!(p.pseudonymize("sensor-42"), p.pseudonymize("sensor-42"));
        assert_eq!(
            p.pseudonymize("sensor-42"),
            Pseudonymizer::default().pseudonymize("sensor-42")
        );
    }

    #[test]
    fn test_fixed_length_hex_without_identifier() {
        let hash = Pseudonymizer::new().pseudonymize("sensor-42");
        assert_eq!(hash.len(), PSEUDONYM_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!hash.contains("sensor-42"));
    }

    #[test]
    fn test_salt_is_applied() {
        let plain = hex::encode(Sha256::digest(b"sensor-42"));
        assert_ne!(Pseudonymizer::new().pseudonymize("sensor-42"), plain);
        assert_ne!(
            Pseudonymizer::with_salt("a").pseudonymize("sensor-42"),
            Pseudonymizer::with_salt("b").pseudonymize("sensor-42")
        );
    }

    #[test]
    fn test_distinct_ids_do_not_collide() {
        let p = Pseudonymizer::new();
        let hashes: HashSet<String> = (0..10_000)
            .map(|i| p.pseudonymize(&format!("sensor-{:05}", i)))
            .collect();
        assert_eq!(hashes.len(), 10_000);
    }
}
