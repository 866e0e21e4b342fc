use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Firewall configuration.
///
/// `rules_dir` is writable and watched; the system rule directories are
/// read once per load, in order, and never watched — changing them takes a
/// restart.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    pub rules_dir: PathBuf,
    pub system_rules_dirs: Vec<PathBuf>,
    pub log_level: String,
}

impl FirewallConfig {
    /// Load configuration from the given TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: FirewallConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Returns the default config file path.
    pub fn default_path() -> PathBuf {
        PathBuf::from("/etc/intent-firewall/config.toml")
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            rules_dir: PathBuf::from("/data/system/ifw"),
            system_rules_dirs: vec![
                PathBuf::from("/system/etc/ifw.d"),
                PathBuf::from("/system_ext/etc/ifw.d"),
                PathBuf::from("/product/etc/ifw.d"),
                PathBuf::from("/odm/etc/ifw.d"),
                PathBuf::from("/vendor/etc/ifw.d"),
            ],
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_the_platform_layout() {
        let config = FirewallConfig::default();
        assert_eq!(config.rules_dir, PathBuf::from("/data/system/ifw"));
        assert_eq!(config.system_rules_dirs.len(), 5);
        assert_eq!(
            config.system_rules_dirs[0],
            PathBuf::from("/system/etc/ifw.d")
        );
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "rules_dir = \"/tmp/ifw\"\n").unwrap();

        let config = FirewallConfig::load(&path).unwrap();
        assert_eq!(config.rules_dir, PathBuf::from("/tmp/ifw"));
        // Unspecified fields keep their defaults.
        assert_eq!(config.system_rules_dirs.len(), 5);
    }

    #[test]
    fn load_fails_on_missing_file() {
        assert!(FirewallConfig::load(Path::new("/nonexistent/config.toml")).is_err());
    }
}
