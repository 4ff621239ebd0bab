//! Source-agnostic sync framework
//!
//! Everything here talks to providers and stores through traits, so the same
//! root/batch/incremental/prune flow serves every connector. PostgreSQL
//! implementations live next to each trait; in-memory ones are in [`memory`].

pub mod connector;
pub mod coordinator;
pub mod cursor;
pub mod deletion;
pub mod documents;
pub mod incremental;
pub mod indexing;
pub mod memory;
pub mod progress;
pub mod pruner;
pub mod search;
pub mod storage;
pub mod types;
pub mod worker;

pub use connector::{Connector, ConnectorError, ConnectorResult};
pub use coordinator::{ChildBatch, ChildDispatcher, RootExtractor};
pub use cursor::{CursorKey, CursorValue, PgCursorStore, SyncCursorStore};
pub use deletion::DocumentDeleter;
pub use documents::{DocumentStore, IndexedDocument, PgDocumentStore, ReferenceContribution};
pub use incremental::IncrementalExtractor;
pub use indexing::{IndexRequest, IndexedEntity, IndexingTrigger, QueueIndexingTrigger};
pub use progress::{
    BackfillNotifier, BackfillProgress, BackfillTracker, LogNotifier, PgProgressCounters,
    ProgressCounters,
};
pub use pruner::Pruner;
pub use search::{HttpSearchIndex, SearchIndex};
pub use storage::{ArtifactStore, PgArtifactStore};
pub use types::{
    Artifact, ArtifactMetadata, BatchReport, DeletionReport, DiscoveryFilter, IncrementalReport,
    ItemPage, ItemRef, JobContext, JobOutcome, JobSummary, ListOrder, PruneReport, RootReport,
};
pub use worker::BatchWorker;
