//! TOML configuration for the sanity daemon.
//!
//! Every section is optional. Without a config file the daemon keeps its
//! queue under `~/.sanity`, knows no cluster and uses the stock profiles.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use sanity_cluster::{BackoffConfig, ClusterConfig, ExternalIndex};
use sanity_jobs::{ProfileRepository, WriteConfig};
use sanity_types::{IndexConfig, PageRecord};
use serde::Deserialize;

/// Default deadline of a single cluster write, in milliseconds.
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Local state.
    pub node: NodeSection,
    /// Canonical page data.
    pub pages: PagesSection,
    /// Document id and index naming.
    pub index: IndexConfig,
    /// Index clusters, one `[[clusters]]` table each.
    pub clusters: Vec<ClusterConfig>,
    /// Other wikis' indices this wiki updates, one `[[external_indices]]` table each.
    pub external_indices: Vec<ExternalIndex>,
    /// Client settings shared by every cluster.
    pub client: ClientSection,
    /// Backoff exponents per job type.
    pub backoff: BackoffConfig,
    /// Retry ceilings of single-cluster writes.
    pub write: WriteConfig,
    /// Sanitization profiles. Replaces the stock set when present.
    pub profiles: ProfileRepository,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory holding the job queue.
    pub data_dir: PathBuf,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".sanity"))
            .unwrap_or_else(|| PathBuf::from(".sanity"));
        Self { data_dir }
    }
}

/// `[pages]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PagesSection {
    /// TOML file with a `[[pages]]` table per page.
    pub file: Option<PathBuf>,
}

/// `[client]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Deadline of a single write in milliseconds.
    pub write_timeout_ms: Option<u64>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
    /// Log every page a checker finds sane.
    pub log_sane: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_sane: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PagesFile {
    #[serde(default)]
    pages: Vec<PageRecord>,
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("cannot read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective write deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(
            self.client
                .write_timeout_ms
                .unwrap_or(DEFAULT_WRITE_TIMEOUT_MS),
        )
    }

    /// Path of the job queue database.
    pub fn queue_path(&self) -> PathBuf {
        self.node.data_dir.join("queue")
    }

    /// Pages listed in the configured pages file, or none.
    pub fn load_pages(&self) -> anyhow::Result<Vec<PageRecord>> {
        let Some(path) = &self.pages.file else {
            return Ok(Vec::new());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read pages file {}", path.display()))?;
        let file: PagesFile = toml::from_str(&content)
            .with_context(|| format!("invalid pages file {}", path.display()))?;
        Ok(file.pages)
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[node]
data_dir = "/tmp/sanity-test"

[pages]
file = "/tmp/pages.toml"

[index]
base_name = "enwiki"
id_prefix = "enwiki"
content_namespaces = [0, 100]

[[clusters]]
name = "eqiad"

[[clusters]]
name = "codfw"
writable = false
private = true

[[external_indices]]
name = "commonswiki_file"
cluster_blacklist = ["cloudelastic"]
replica_group = "psi"

[client]
write_timeout_ms = 250

[backoff]
default_exponent = 5

[backoff.exponents]
checker_job = 7

[write]
drop_timeout = 3600
max_error_retry = 2

[profiles.tiny]
max_wiki_size = 1000
update_jobs_max_pressure = 10
checker_batch_size = 5
jobs_chunk_size = 10
checker_job_max_time = 30
min_loop_duration = 60
max_checker_jobs = 2

[log]
level = "debug"
log_sane = true
"#;

        let config = CliConfig::from_toml(toml).unwrap();
        assert_eq!(config.node.data_dir, PathBuf::from("/tmp/sanity-test"));
        assert_eq!(config.queue_path(), PathBuf::from("/tmp/sanity-test/queue"));
        assert_eq!(config.pages.file, Some(PathBuf::from("/tmp/pages.toml")));
        assert_eq!(config.index.base_name, "enwiki");
        assert_eq!(config.index.id_prefix.as_deref(), Some("enwiki"));
        assert!(config.index.content_namespaces.contains(&100));
        assert_eq!(config.clusters.len(), 2);
        assert!(config.clusters[0].writable);
        assert!(!config.clusters[1].writable);
        assert!(config.clusters[1].private);
        assert_eq!(config.external_indices.len(), 1);
        assert_eq!(config.external_indices[0].name, "commonswiki_file");
        assert!(config.external_indices[0].cluster_blacklist.contains("cloudelastic"));
        assert_eq!(config.external_indices[0].replica_group.as_deref(), Some("psi"));
        assert_eq!(config.write_timeout(), Duration::from_millis(250));
        assert_eq!(config.backoff.default_exponent, 5);
        assert_eq!(config.backoff.exponent_for("checker_job"), 7);
        assert_eq!(config.write.drop_timeout, 3600);
        assert_eq!(config.write.max_error_retry, 2);
        assert_eq!(config.profiles.select_for_span(999), Some("tiny"));
        assert!(config.profiles.get("XS").is_none());
        assert_eq!(config.log.level, "debug");
        assert!(config.log.log_sane);
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = CliConfig::from_toml("").unwrap();
        let expected_default = dirs::home_dir()
            .map(|h| h.join(".sanity"))
            .unwrap_or_else(|| PathBuf::from(".sanity"));
        assert_eq!(config.node.data_dir, expected_default);
        assert!(config.clusters.is_empty());
        assert_eq!(config.index, IndexConfig::default());
        assert_eq!(config.write, WriteConfig::default());
        assert_eq!(config.profiles, ProfileRepository::builtin());
        assert_eq!(config.write_timeout(), Duration::from_secs(5));
        assert_eq!(config.log.level, "info");
        assert!(!config.log.log_sane);
        assert!(config.external_indices.is_empty());
        assert!(config.load_pages().unwrap().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let pages = dir.path().join("pages.toml");
        std::fs::write(
            &pages,
            r#"
[[pages]]
page_id = 1
namespace = 0
title = "Main Page"
latest_revision_id = 10
is_redirect = false

[[pages]]
page_id = 2
namespace = 1
title = "Main Page"
latest_revision_id = 12
is_redirect = false
"#,
        )
        .unwrap();
        let path = dir.path().join("sanity.toml");
        std::fs::write(
            &path,
            format!(
                "[pages]\nfile = {:?}\n\n[[clusters]]\nname = \"local\"\n",
                pages.display().to_string()
            ),
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.clusters[0].name, "local");
        let loaded = config.load_pages().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].namespace, 1);
        assert_eq!(loaded[1].latest_revision_id, 12);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CliConfig::load(Some(&dir.path().join("absent.toml"))).is_err());

        let config = CliConfig {
            pages: PagesSection {
                file: Some(dir.path().join("absent.toml")),
            },
            ..CliConfig::default()
        };
        assert!(config.load_pages().is_err());
    }
}
