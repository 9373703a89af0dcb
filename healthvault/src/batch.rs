//! HealthVault - Batch results

use crate::error::VaultError;

/// Per-item outcome of a batch; one failure never aborts the rest
#[derive(Debug)]
pub struct BatchResult<T, F> {
    pub successes: Vec<T>,
    /// Failed input with the error it produced
    pub failures: Vec<(F, VaultError)>,
}

impl<T, F> Default for BatchResult<T, F> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T, F> BatchResult<T, F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, input: F, outcome: Result<T, VaultError>) {
        match outcome {
            Ok(value) => self.successes.push(value),
            Err(e) => {
                log::warn!("Batch item failed: {}", e);
                self.failures.push((input, e));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}
