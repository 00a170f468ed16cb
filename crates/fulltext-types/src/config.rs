//! Configuration loading for the full-text pipeline.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/fulltext-indexer/config.toml`.

use std::collections::HashMap;
use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::FulltextError;
use crate::hierarchy::{ClassHierarchy, FullTextSearchContext};
use crate::ClassId;

/// Tuning knobs for the scheduling loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Documents per stage invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pending documents picked up per scheduling pass
    #[serde(default = "default_max_docs_per_pass")]
    pub max_docs_per_pass: usize,

    /// Concurrent stage invocations
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Idle wait between passes (ms)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Upper bound for one stage invocation (ms); the batch is retried after
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,

    /// Buffered state updates before a forced flush
    #[serde(default = "default_write_buffer_limit")]
    pub write_buffer_limit: usize,

    /// Physically delete tombstoned states once every stage acknowledged
    #[serde(default = "default_true")]
    pub purge_removed: bool,

    /// Maximum summary length in characters
    #[serde(default = "default_summary_limit")]
    pub summary_limit: usize,
}

fn default_batch_size() -> usize {
    50
}

fn default_max_docs_per_pass() -> usize {
    500
}

fn default_workers() -> usize {
    4
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_stage_timeout_ms() -> u64 {
    30_000
}

fn default_write_buffer_limit() -> usize {
    200
}

fn default_true() -> bool {
    true
}

fn default_summary_limit() -> usize {
    65_536
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_docs_per_pass: default_max_docs_per_pass(),
            workers: default_workers(),
            flush_interval_ms: default_flush_interval_ms(),
            stage_timeout_ms: default_stage_timeout_ms(),
            write_buffer_limit: default_write_buffer_limit(),
            purge_removed: true,
            summary_limit: default_summary_limit(),
        }
    }
}

impl PipelineSettings {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_stage_timeout_ms(mut self, ms: u64) -> Self {
        self.stage_timeout_ms = ms;
        self
    }

    /// Sleep between passes when the queue is idle.
    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }

    /// Reject zero-sized batches, pools and limits.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.max_docs_per_pass == 0 {
            return Err("max_docs_per_pass must be > 0".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be > 0".to_string());
        }
        if self.stage_timeout_ms == 0 {
            return Err("stage_timeout_ms must be > 0".to_string());
        }
        if self.write_buffer_limit == 0 {
            return Err("write_buffer_limit must be > 0".to_string());
        }
        Ok(())
    }
}

/// Enable flags for the built-in stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSettings {
    #[serde(default = "default_true")]
    pub content: bool,
    #[serde(default = "default_true")]
    pub field: bool,
    #[serde(default = "default_true")]
    pub full_text_push: bool,
    #[serde(default = "default_true")]
    pub summary: bool,
    #[serde(default = "default_true")]
    pub collab: bool,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            content: true,
            field: true,
            full_text_push: true,
            summary: true,
            collab: true,
        }
    }
}

/// One class of the document model, as declared in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSettings {
    /// Class identifier
    pub id: ClassId,

    /// Parent class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<ClassId>,

    /// Full-text context declared on this class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<FullTextSearchContext>,
}

/// Daemon settings: storage locations, pipeline tuning and the class model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// RocksDB state store directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Path to the Tantivy index directory
    #[serde(default = "default_search_index_path")]
    pub search_index_path: String,

    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Scheduling loop tuning
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Stage enable flags
    #[serde(default)]
    pub stages: StageSettings,

    /// Document model
    #[serde(default)]
    pub classes: Vec<ClassSettings>,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "fulltext-indexer")
}

/// `name` under the platform data dir, or under the working dir.
fn data_path(name: &str) -> String {
    project_dirs()
        .map(|p| p.data_local_dir().join(name))
        .unwrap_or_else(|| PathBuf::from(".").join(name))
        .to_string_lossy()
        .into_owned()
}

fn default_db_path() -> String {
    data_path("db")
}

fn default_search_index_path() -> String {
    data_path("fts-index")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn config_err(e: config::ConfigError) -> FulltextError {
    FulltextError::Config(e.to_string())
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            search_index_path: default_search_index_path(),
            log_level: default_log_level(),
            pipeline: PipelineSettings::default(),
            stages: StageSettings::default(),
            classes: Vec::new(),
        }
    }
}

impl Settings {
    /// Layered load, later layers winning: defaults, the user config file
    /// (`<config dir>/fulltext-indexer/config.toml`, optional), the file
    /// passed with `--config`, then `FULLTEXT_*` variables. The daemon
    /// applies its CLI flags on top.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, FulltextError> {
        let user_file = project_dirs()
            .map(|p| p.config_dir().join("config"))
            .unwrap_or_else(|| PathBuf::from("config"));

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .and_then(|b| b.set_default("search_index_path", default_search_index_path()))
            .and_then(|b| b.set_default("log_level", default_log_level()))
            .map_err(config_err)?
            .add_source(File::with_name(&user_file.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: FULLTEXT_DB_PATH, FULLTEXT_PIPELINE__BATCH_SIZE, ...
        builder = builder.add_source(
            Environment::with_prefix("FULLTEXT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_err)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate pipeline values and the declared model.
    pub fn validate(&self) -> Result<(), FulltextError> {
        self.pipeline.validate().map_err(FulltextError::Config)?;

        for class in &self.classes {
            if let Some(parent) = &class.extends {
                if !self.classes.iter().any(|c| &c.id == parent) {
                    return Err(FulltextError::Config(format!(
                        "class {} extends unknown class {}",
                        class.id, parent
                    )));
                }
            }
        }
        self.hierarchy()?;
        Ok(())
    }

    /// Build the class hierarchy declared in `classes`.
    pub fn hierarchy(&self) -> Result<ClassHierarchy, FulltextError> {
        let mut hierarchy = ClassHierarchy::new();
        for class in &self.classes {
            hierarchy.add_class(class.id.clone(), class.extends.as_deref());
        }
        hierarchy.validate()?;
        Ok(hierarchy)
    }

    /// Contexts declared in `classes`.
    pub fn contexts(&self) -> HashMap<ClassId, FullTextSearchContext> {
        self.classes
            .iter()
            .filter_map(|c| c.context.clone().map(|ctx| (c.id.clone(), ctx)))
            .collect()
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Expand ~ in search_index_path to the home directory
    pub fn expanded_search_index_path(&self) -> PathBuf {
        expand_home(&self.search_index_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
