//! Full-text indexing pipeline.
//!
//! This crate runs documents through an ordered chain of stages, tracks
//! per-document per-stage completion by version-qualified stage identifier,
//! and answers searches with a `pass` flag when coverage is incomplete.
//!
//! ## Key Components
//!
//! - [`FullTextPipeline`]: Orchestrator; serializes state mutations per document
//! - [`Stage`]: Capability interface implemented by every stage
//! - [`UpdateQueue`]: Coalesces change notifications between passes
//! - [`PropagationResolver`]: Re-enqueues related documents on change
//! - [`WriteBuffer`]: Batches non-durable state writes
//! - [`OpContext`]: Tracing span and cancellation token passed to every call
//!
//! ## Architecture
//!
//! 1. Collaborators feed change notifications through [`FullTextPipeline::queue`]
//! 2. Each pass applies the changes and plans propagation (one hop at most)
//! 3. Pending documents are grouped by their next runnable stage
//! 4. Stage batches run on a bounded worker pool, each under a timeout
//! 5. Stages report progress through [`FullTextPipeline::update`]
//! 6. Tombstoned documents are routed to every stage's `remove` and purged
//!    once all stages acknowledged
//!
//! ## Example
//!
//! ```ignore
//! use fulltext_indexer::{default_stages, FullTextPipeline};
//!
//! let pipeline = FullTextPipeline::builder(storage.clone(), storage, backend)
//!     .settings(settings.pipeline.clone())
//!     .hierarchy(settings.hierarchy()?)
//!     .contexts(settings.contexts())
//!     .stages(default_stages(&settings.stages, &settings.pipeline)?)
//!     .build()?;
//!
//! let ctx = pipeline.context();
//! pipeline.queue(&ctx, changes);
//! pipeline.run_until_idle(&ctx, 100).await?;
//! ```

pub mod buffer;
pub mod context;
pub mod error;
pub mod pass;
pub mod pipeline;
pub mod propagation;
pub mod queue;
pub mod stage;
pub mod stages;

pub use buffer::WriteBuffer;
pub use context::OpContext;
pub use error::IndexingError;
pub use pass::PassReport;
pub use pipeline::{FullTextPipeline, PipelineBuilder, PipelineEvent, PipelineStats};
pub use propagation::{PropagationResolver, MAX_PROPAGATION_HOPS};
pub use queue::UpdateQueue;
pub use stage::{Stage, StageDescriptor, StageReport, UpdateFieldsHandler};
pub use stages::{
    default_stages, CollabStage, ContentStage, FieldStage, FullTextPushStage, SummaryStage,
};
