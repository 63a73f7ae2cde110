use rand::{TryRngCore, rngs::OsRng};

use crate::errors::AppError;

/// Source of random bytes for tokens and session ids.
pub trait EntropySource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<(), AppError>;
}

/// Operating system RNG. Failures are reported, not panicked on.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), AppError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| AppError::RandomnessFailure(e.to_string()))
    }
}

/// Hex string of `len` random bytes (so `2 * len` characters).
pub fn random_hex(entropy: &dyn EntropySource, len: usize) -> Result<String, AppError> {
    let mut bytes = vec![0u8; len];
    entropy.fill(&mut bytes)?;
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenEntropy;

    impl EntropySource for BrokenEntropy {
        fn fill(&self, _dest: &mut [u8]) -> Result<(), AppError> {
            Err(AppError::RandomnessFailure("device unavailable".into()))
        }
    }

    #[test]
    fn random_hex_is_lowercase_hex_of_double_length() {
        let token = random_hex(&OsEntropy, 32).expect("entropy");
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn random_hex_differs_between_calls() {
        let a = random_hex(&OsEntropy, 32).expect("entropy");
        let b = random_hex(&OsEntropy, 32).expect("entropy");
        assert_ne!(a, b);
    }

    #[test]
    fn entropy_failure_propagates() {
        let err = random_hex(&BrokenEntropy, 32).unwrap_err();
        assert!(matches!(err, AppError::RandomnessFailure(_)));
    }
}
