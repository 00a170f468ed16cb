//! Command implementations for the indexing daemon.
//!
//! Handles:
//! - run: Open storage and index, run the pipeline worker until a signal
//! - ingest: Apply a JSONL batch of document changes and index until idle
//! - search: Query the index with the pipeline's completeness flag
//! - status: Per-stage progress counts
//! - config: Print the effective configuration

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{info, warn};

use fulltext_indexer::{default_stages, FullTextPipeline, PassReport};
use fulltext_search::{SearchIndexConfig, TantivyBackend};
use fulltext_storage::Storage;
use fulltext_types::{ClassId, QueuedChange, SearchHits, SearchQuery, Settings};

use crate::ingest::{parse_ingest, IngestOp};

/// Load configuration and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    index_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    if let Some(index_path) = index_path_override {
        settings.search_index_path = index_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }

    Ok(settings)
}

/// Install the global tracing subscriber on stderr. `RUST_LOG` wins over
/// the configured level.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Opened collaborators plus the pipeline wired over them.
pub struct Runtime {
    pub storage: Arc<Storage>,
    pub pipeline: FullTextPipeline,
    classes: Vec<ClassId>,
}

impl Runtime {
    /// Open storage and the search index, then build the default pipeline.
    pub fn open(settings: &Settings) -> Result<Self> {
        let db_path = settings.expanded_db_path();
        let index_path = settings.expanded_search_index_path();
        info!("Opening storage at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let storage = Arc::new(Storage::open(&db_path).context("Failed to open storage")?);
        let backend = Arc::new(
            TantivyBackend::open(SearchIndexConfig::new(&index_path))
                .context("Failed to open search index")?,
        );

        let pipeline = FullTextPipeline::builder(storage.clone(), storage.clone(), backend)
            .settings(settings.pipeline.clone())
            .hierarchy(settings.hierarchy().context("Invalid class hierarchy")?)
            .contexts(settings.contexts())
            .stages(default_stages(&settings.stages, &settings.pipeline)?)
            .build()
            .context("Failed to build pipeline")?;

        Ok(Self {
            storage,
            pipeline,
            classes: settings.classes.iter().map(|c| c.id.clone()).collect(),
        })
    }

    /// Write source documents, queue the matching changes and run passes
    /// until idle.
    pub async fn ingest(&self, ops: Vec<IngestOp>, max_passes: usize) -> Result<PassReport> {
        let ctx = self.pipeline.context();
        let mut changes = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                IngestOp::Put { doc } => {
                    self.storage
                        .put_document(&doc)
                        .with_context(|| format!("Failed to store document {}", doc.id))?;
                    let change = match self.pipeline.get_state(&doc.id)? {
                        Some(_) => QueuedChange::updated(),
                        None => QueuedChange::created(doc.initial_state()),
                    };
                    changes.push((doc.id, change));
                }
                IngestOp::Remove { id } => {
                    if !self.storage.delete_document(&id)? {
                        warn!(doc_id = %id, "Removing unknown source document");
                    }
                    changes.push((id, QueuedChange::removed()));
                }
            }
        }

        self.pipeline.queue(&ctx, changes);

        let mut total = PassReport::default();
        let reports = self.pipeline.run_until_idle(&ctx, max_passes).await?;
        let passes = reports.len();
        for report in reports {
            total.merge(report);
        }
        if passes == max_passes && self.pipeline.stats().await?.pending > 0 {
            warn!(max_passes, "Pass limit reached with work remaining");
        }
        Ok(total)
    }

    /// Search `classes`, or every configured class when empty.
    pub async fn search(
        &self,
        query: &SearchQuery,
        classes: Vec<ClassId>,
        size: usize,
        from: usize,
    ) -> Result<SearchHits> {
        let classes = if classes.is_empty() {
            self.classes.clone()
        } else {
            classes
        };
        if classes.is_empty() {
            bail!("No classes configured; pass --class or declare [[classes]] in the config");
        }
        Ok(self.pipeline.search(&classes, query, size, from).await?)
    }
}

/// Run the pipeline worker until Ctrl+C or SIGTERM.
pub async fn run_daemon(settings: &Settings) -> Result<()> {
    info!("Fulltext daemon starting...");
    info!("Configuration:");
    info!("  Database path: {}", settings.db_path);
    info!("  Search index path: {}", settings.search_index_path);
    info!("  Log level: {}", settings.log_level);

    let runtime = Runtime::open(settings)?;
    let pipeline = runtime.pipeline.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down...");
            }
        }
        pipeline.cancel();
    });

    let ctx = runtime.pipeline.context();
    runtime
        .pipeline
        .run(&ctx)
        .await
        .context("Pipeline worker failed")?;
    runtime.storage.flush()?;
    Ok(())
}

/// Apply an ingest file and print the merged pass report as JSON.
pub async fn ingest_file(settings: &Settings, file: &Path, max_passes: usize) -> Result<()> {
    let body = fs::read_to_string(file)
        .with_context(|| format!("Failed to read ingest file {:?}", file))?;
    let ops = parse_ingest(&body)?;
    info!(ops = ops.len(), "Ingesting {:?}", file);

    let runtime = Runtime::open(settings)?;
    let report = runtime.ingest(ops, max_passes).await?;
    runtime.storage.flush()?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run a search and print the hits as JSON.
pub async fn search(
    settings: &Settings,
    query: SearchQuery,
    classes: Vec<ClassId>,
    size: usize,
    from: usize,
) -> Result<()> {
    let runtime = Runtime::open(settings)?;
    let hits = runtime.search(&query, classes, size, from).await?;
    println!("{}", serde_json::to_string_pretty(&hits)?);
    Ok(())
}

/// Print storage counts and per-stage progress.
pub async fn show_status(settings: &Settings) -> Result<()> {
    let runtime = Runtime::open(settings)?;
    let storage = runtime.storage.get_stats()?;
    let stats = runtime.pipeline.stats().await?;

    println!("Database: {}", settings.db_path);
    println!("  Source documents: {}", storage.document_count);
    println!("  Index states: {}", storage.state_count);
    println!("  Disk usage: {} bytes", storage.disk_usage_bytes);
    println!("Pipeline:");
    println!("  Tracked: {}", stats.total);
    println!("  Pending: {}", stats.pending);
    println!("  Removed (awaiting purge): {}", stats.removed);
    for (stage, done) in &stats.stages {
        println!("  {:<12} {}", stage, done);
    }
    Ok(())
}

/// Print the effective configuration as TOML.
pub fn show_config(settings: &Settings) -> Result<()> {
    let rendered = toml::to_string_pretty(settings).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fulltext_types::{ClassSettings, ContentBlob, FullTextSearchContext, SourceDoc};
    use tempfile::TempDir;

    fn test_settings(dir: &TempDir) -> Settings {
        let mut settings = Settings {
            db_path: dir.path().join("db").to_string_lossy().to_string(),
            search_index_path: dir.path().join("index").to_string_lossy().to_string(),
            ..Default::default()
        };
        settings.classes = vec![
            ClassSettings {
                id: "doc".into(),
                extends: None,
                context: None,
            },
            ClassSettings {
                id: "task".into(),
                extends: Some("doc".into()),
                context: Some(FullTextSearchContext {
                    full_text_summary: true,
                    child_processing_allowed: true,
                    ..Default::default()
                }),
            },
            ClassSettings {
                id: "comment".into(),
                extends: Some("doc".into()),
                context: Some(FullTextSearchContext {
                    propagate: vec!["task".into()],
                    ..Default::default()
                }),
            },
        ];
        settings
    }

    #[test]
    fn test_show_config_renders() {
        let dir = TempDir::new().unwrap();
        let settings = test_settings(&dir);
        assert!(show_config(&settings).is_ok());
        let rendered = toml::to_string_pretty(&settings).unwrap();
        assert!(rendered.contains("[[classes]]"));
    }

    #[tokio::test]
    async fn test_ingest_then_search() {
        let dir = TempDir::new().unwrap();
        let settings = test_settings(&dir);

        let ops = vec![
            IngestOp::Put {
                doc: SourceDoc::new("t1", "task")
                    .in_space("sp1")
                    .with_attribute("title", "Login page fails")
                    .with_content(ContentBlob::new("body", "text/plain", "Steps to reproduce")),
            },
            IngestOp::Put {
                doc: SourceDoc::new("c1", "comment")
                    .in_space("sp1")
                    .attached("t1", "task")
                    .with_attribute("message", "Seen on staging too"),
            },
        ];

        {
            let runtime = Runtime::open(&settings).unwrap();
            let report = runtime.ingest(ops, 50).await.unwrap();
            assert_eq!(report.failed_total(), 0);

            let hits = runtime
                .search(&SearchQuery::text("login"), vec![], 10, 0)
                .await
                .unwrap();
            assert!(!hits.pass);
            let ids: Vec<&str> = hits.docs.iter().map(|d| d.id.as_str()).collect();
            assert_eq!(ids, vec!["t1"]);
        }

        // Reopen: state survives, removal tombstones and purges
        let runtime = Runtime::open(&settings).unwrap();
        let report = runtime
            .ingest(vec![IngestOp::Remove { id: "t1".into() }], 50)
            .await
            .unwrap();
        assert!(report.purged.contains(&"t1".to_string()));

        let hits = runtime
            .search(&SearchQuery::text("login"), vec!["task".into()], 10, 0)
            .await
            .unwrap();
        assert!(hits.docs.is_empty());
    }

    #[tokio::test]
    async fn test_search_without_classes_errors() {
        let dir = TempDir::new().unwrap();
        let mut settings = test_settings(&dir);
        settings.classes.clear();

        let runtime = Runtime::open(&settings).unwrap();
        let result = runtime.search(&SearchQuery::default(), vec![], 10, 0).await;
        assert!(result.is_err());
    }
}
