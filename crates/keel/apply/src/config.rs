//! Engine configuration

use keel_resolve::ResolverConfig;
use serde::{Deserialize, Serialize};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Resolver configuration
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Apply configuration
    #[serde(default)]
    pub apply: ApplyConfig,
}

/// Apply configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Maximum number of actions running at the same time
    #[serde(default = "default_max_concurrent_actions")]
    pub max_concurrent_actions: usize,

    /// Run post-process plugins after the action graph drains
    #[serde(default = "default_true")]
    pub run_post_process: bool,

    /// Walk the plan and count actions without calling any plugin
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_actions: default_max_concurrent_actions(),
            run_post_process: true,
            dry_run: false,
        }
    }
}

fn default_max_concurrent_actions() -> usize {
    8
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.apply.max_concurrent_actions, 8);
        assert!(config.apply.run_post_process);
        assert!(!config.apply.dry_run);
    }

    #[test]
    fn test_partial_sections() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"apply": {"max_concurrent_actions": 2}, "resolver": {"max_workers": 3}}"#)
                .unwrap();
        assert_eq!(config.apply.max_concurrent_actions, 2);
        assert!(config.apply.run_post_process);
        assert_eq!(config.resolver.max_workers, Some(3));
    }
}
