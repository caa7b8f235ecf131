use serde::{Deserialize, Serialize};

use super::task::MAX_LEVEL;

/// Configuration from canopy/config.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanopyConfig {
    #[serde(default)]
    pub project: ProjectInfo,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub name: String,
    /// Recorded as the creator of tasks made from the CLI
    #[serde(default)]
    pub user: Option<String>,
}

/// Tunables for the sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Gap left between consecutive siblings
    #[serde(default = "default_position_step")]
    pub position_step: f64,
    /// Below this gap two neighbours are considered indistinguishable
    #[serde(default = "default_min_position_gap")]
    pub min_position_gap: f64,
    /// Deepest allowed level (0 = project)
    #[serde(default = "default_max_level")]
    pub max_level: usize,
    /// Projects fetched per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Marking a task complete also completes its descendants
    #[serde(default = "default_true")]
    pub cascade_complete: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            position_step: default_position_step(),
            min_position_gap: default_min_position_gap(),
            max_level: default_max_level(),
            page_size: default_page_size(),
            cascade_complete: true,
        }
    }
}

fn default_position_step() -> f64 {
    1000.0
}

fn default_min_position_gap() -> f64 {
    1e-4
}

fn default_max_level() -> usize {
    MAX_LEVEL
}

fn default_page_size() -> usize {
    50
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config: CanopyConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.engine.max_level, 4);
        assert!(config.project.user.is_none());
    }

    #[test]
    fn partial_engine_table() {
        let config: CanopyConfig = toml::from_str(
            r#"[project]
name = "demo"

[engine]
position_step = 10.0
cascade_complete = false
"#,
        )
        .unwrap();
        assert_eq!(config.project.name, "demo");
        assert_eq!(config.engine.position_step, 10.0);
        assert!(!config.engine.cascade_complete);
        assert_eq!(config.engine.page_size, 50);
    }
}
