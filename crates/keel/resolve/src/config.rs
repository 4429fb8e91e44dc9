//! Resolver configuration

use serde::{Deserialize, Serialize};

/// Resolver configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Maximum number of claims resolved in parallel.
    /// Defaults to the number of available CPUs.
    #[serde(default)]
    pub max_workers: Option<usize>,
}

impl ResolverConfig {
    /// Effective number of workers, always at least one
    pub fn workers(&self) -> usize {
        match self.max_workers {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}
