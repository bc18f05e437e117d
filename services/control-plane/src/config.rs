use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use herd_model::NodeSize;
use serde::Deserialize;

use crate::scheduler::CapacityConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub dev_mode: bool,
    pub capacity: CapacityConfig,
    /// How often node readiness is refreshed from the kubes.
    pub node_observer_interval: Duration,
    pub node_sizes: NodeSizeCatalog,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_level = std::env::var("HERD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = env_flag("HERD_DEV", false);

        let defaults = CapacityConfig::default();
        let capacity = CapacityConfig {
            enabled: env_flag("HERD_CAPACITY_SERVICE_ENABLED", defaults.enabled),
            interval: env_interval("HERD_CAPACITY_INTERVAL_SECS", defaults.interval)?,
            wait_before_scale: env_secs("HERD_WAIT_BEFORE_SCALE_SECS", defaults.wait_before_scale)?,
            min_node_age: env_secs("HERD_MIN_NODE_AGE_SECS", defaults.min_node_age)?,
            ..defaults
        };

        let node_observer_interval = env_interval(
            "HERD_NODE_OBSERVER_INTERVAL_SECS",
            Duration::from_secs(30),
        )?;

        let node_sizes = match std::env::var("HERD_NODE_SIZES_FILE") {
            Ok(path) => NodeSizeCatalog::load(&path)?,
            Err(_) => NodeSizeCatalog::defaults(),
        };

        Ok(Self {
            log_level,
            dev_mode,
            capacity,
            node_observer_interval,
            node_sizes,
        })
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(v) => {
            let secs: u64 = v
                .parse()
                .with_context(|| format!("{name} must be a whole number of seconds, got {v:?}"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

/// Like [`env_secs`], but zero is rejected since a worker cannot tick at
/// a zero period.
fn env_interval(name: &str, default: Duration) -> Result<Duration> {
    let interval = env_secs(name, default)?;
    anyhow::ensure!(!interval.is_zero(), "{name} must be at least one second");
    Ok(interval)
}

/// Node sizes offered by each provider, ascending by cost.
///
/// Loaded from TOML, one array of tables per provider:
///
/// ```toml
/// [[digitalocean]]
/// name = "2gb"
/// cpu_cores = 2
/// ram_gib = 2
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct NodeSizeCatalog {
    providers: BTreeMap<String, Vec<NodeSize>>,
}

impl NodeSizeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in sizes used when no catalog file is configured.
    pub fn defaults() -> Self {
        Self::new()
            .with(
                "aws",
                vec![
                    NodeSize::new("m4.large", 2.0, 8.0),
                    NodeSize::new("m4.xlarge", 4.0, 16.0),
                    NodeSize::new("m4.2xlarge", 8.0, 32.0),
                    NodeSize::new("m4.4xlarge", 16.0, 64.0),
                ],
            )
            .with(
                "digitalocean",
                vec![
                    NodeSize::new("1gb", 1.0, 1.0),
                    NodeSize::new("2gb", 2.0, 2.0),
                    NodeSize::new("4gb", 2.0, 4.0),
                    NodeSize::new("8gb", 4.0, 8.0),
                    NodeSize::new("16gb", 8.0, 16.0),
                ],
            )
    }

    pub fn with(mut self, provider: impl Into<String>, sizes: Vec<NodeSize>) -> Self {
        self.providers.insert(provider.into(), sizes);
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("invalid node size catalog")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading node size catalog {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Sizes for `provider`, cheapest first. Empty for unknown providers.
    pub fn sizes(&self, provider: &str) -> &[NodeSize] {
        self.providers.get(provider).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_catalog_from_toml() {
        let catalog = NodeSizeCatalog::from_toml_str(
            r#"
            [[digitalocean]]
            name = "1gb"
            cpu_cores = 1
            ram_gib = 1

            [[digitalocean]]
            name = "4gb"
            cpu_cores = 2
            ram_gib = 4.0
            "#,
        )
        .unwrap();

        let sizes = catalog.sizes("digitalocean");
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[1], NodeSize::new("4gb", 2.0, 4.0));
        assert!(catalog.sizes("aws").is_empty());
    }

    #[test]
    fn test_catalog_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[aws]]\nname = \"m4.large\"\ncpu_cores = 2\nram_gib = 8").unwrap();

        let catalog = NodeSizeCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.sizes("aws")[0].name, "m4.large");
    }

    #[test]
    fn test_invalid_catalog() {
        assert!(NodeSizeCatalog::from_toml_str("[[aws]]\nname = 3").is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        std::env::set_var("HERD_TEST_ZERO_INTERVAL_SECS", "0");
        let err = env_interval("HERD_TEST_ZERO_INTERVAL_SECS", Duration::from_secs(30)).unwrap_err();
        assert_eq!(err.to_string(), "HERD_TEST_ZERO_INTERVAL_SECS must be at least one second");

        std::env::set_var("HERD_TEST_SOME_INTERVAL_SECS", "15");
        let interval = env_interval("HERD_TEST_SOME_INTERVAL_SECS", Duration::from_secs(30)).unwrap();
        assert_eq!(interval, Duration::from_secs(15));

        let interval = env_interval("HERD_TEST_UNSET_INTERVAL_SECS", Duration::from_secs(30)).unwrap();
        assert_eq!(interval, Duration::from_secs(30));
    }

    #[test]
    fn test_default_sizes_ascend() {
        let catalog = NodeSizeCatalog::defaults();
        for provider in ["aws", "digitalocean"] {
            let sizes = catalog.sizes(provider);
            assert!(sizes
                .windows(2)
                .all(|w| w[0].ram_gib <= w[1].ram_gib && w[0].cpu_cores <= w[1].cpu_cores));
        }
    }
}
