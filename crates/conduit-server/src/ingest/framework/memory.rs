//! In-memory backends
//!
//! Every store, index and trigger the core talks to has an in-memory
//! counterpart here, for local development without PostgreSQL and for
//! tests. Each one can be told to fail specific calls.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_common::types::{BackfillId, EntityType, Source, TenantId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::cursor::{CursorKey, CursorValue, SyncCursorStore};
use super::documents::{DocumentStore, IndexedDocument, ReferenceContribution};
use super::indexing::{IndexRequest, IndexingTrigger};
use super::progress::{BackfillNotifier, BackfillProgress, ProgressCounters, ProgressField};
use super::search::SearchIndex;
use super::storage::ArtifactStore;
use super::types::Artifact;

type ArtifactKey = (String, Source, String, String);

fn artifact_key(tenant_id: &TenantId, source: Source, entity_type: &EntityType, entity_id: &str) -> ArtifactKey {
    (
        tenant_id.to_string(),
        source,
        entity_type.to_string(),
        entity_id.to_string(),
    )
}

#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<BTreeMap<ArtifactKey, Artifact>>,
    writes: Mutex<usize>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.artifacts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn all(&self) -> Vec<Artifact> {
        self.artifacts.lock().await.values().cloned().collect()
    }

    /// Number of `upsert_many` calls made
    pub async fn write_calls(&self) -> usize {
        *self.writes.lock().await
    }

    pub async fn contains(&self, tenant_id: &TenantId, source: Source, entity_type: &EntityType, entity_id: &str) -> bool {
        self.artifacts
            .lock()
            .await
            .contains_key(&artifact_key(tenant_id, source, entity_type, entity_id))
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn upsert_many(&self, artifacts: &[Artifact]) -> Result<()> {
        let mut stored = self.artifacts.lock().await;
        for artifact in artifacts {
            stored.insert(
                artifact_key(
                    &artifact.tenant_id,
                    artifact.source,
                    &artifact.entity_type,
                    &artifact.entity_id,
                ),
                artifact.clone(),
            );
        }
        *self.writes.lock().await += 1;
        Ok(())
    }

    async fn get_by_entity_ids(
        &self,
        tenant_id: &TenantId,
        source: Source,
        entity_type: &EntityType,
        entity_ids: &[String],
    ) -> Result<Vec<Artifact>> {
        let stored = self.artifacts.lock().await;
        Ok(entity_ids
            .iter()
            .filter_map(|id| stored.get(&artifact_key(tenant_id, source, entity_type, id)))
            .cloned()
            .collect())
    }

    async fn delete_by_entity_id(
        &self,
        tenant_id: &TenantId,
        source: Source,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<bool> {
        Ok(self
            .artifacts
            .lock()
            .await
            .remove(&artifact_key(tenant_id, source, entity_type, entity_id))
            .is_some())
    }
}

#[derive(Default)]
struct ProgressRows {
    rows: HashMap<(BackfillId, String), BackfillProgress>,
    order: Vec<(BackfillId, String)>,
}

#[derive(Default)]
pub struct MemoryProgressCounters {
    state: Mutex<ProgressRows>,
}

impl MemoryProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressCounters for MemoryProgressCounters {
    async fn increment(
        &self,
        backfill_id: BackfillId,
        tenant_id: &TenantId,
        field: ProgressField,
        delta: i64,
    ) -> Result<BackfillProgress> {
        let mut state = self.state.lock().await;
        let key = (backfill_id, tenant_id.to_string());
        if !state.rows.contains_key(&key) {
            state.order.push(key.clone());
        }
        let row = state.rows.entry(key).or_insert_with(|| BackfillProgress {
            backfill_id: backfill_id.as_uuid(),
            tenant_id: tenant_id.to_string(),
            ..Default::default()
        });

        let counter = match field {
            ProgressField::TotalIngestJobs => &mut row.total_ingest_jobs,
            ProgressField::AttemptedIngestJobs => &mut row.attempted_ingest_jobs,
            ProgressField::DoneIngestJobs => &mut row.done_ingest_jobs,
            ProgressField::TotalIndexJobs => &mut row.total_index_jobs,
            ProgressField::DoneIndexJobs => &mut row.done_index_jobs,
        };
        *counter += delta;

        Ok(row.clone())
    }

    async fn get(
        &self,
        backfill_id: BackfillId,
        tenant_id: &TenantId,
    ) -> Result<Option<BackfillProgress>> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .get(&(backfill_id, tenant_id.to_string()))
            .cloned())
    }

    async fn list_recent(&self, tenant_id: &TenantId, limit: i64) -> Result<Vec<BackfillProgress>> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .rev()
            .filter(|(_, tenant)| tenant == tenant_id.as_str())
            .filter_map(|key| state.rows.get(key).cloned())
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn claim_completion(&self, backfill_id: BackfillId, tenant_id: &TenantId) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.rows.get_mut(&(backfill_id, tenant_id.to_string())) {
            Some(row) if row.completed_at.is_none() => {
                row.completed_at = Some(Utc::now());
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<(String, Source, CursorKey), CursorValue>>,
    fail_next_set: AtomicBool,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `set` fail
    pub fn fail_next_set(&self) {
        self.fail_next_set.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SyncCursorStore for MemoryCursorStore {
    async fn get(
        &self,
        tenant_id: &TenantId,
        source: Source,
        key: CursorKey,
    ) -> Result<Option<CursorValue>> {
        Ok(self
            .cursors
            .lock()
            .await
            .get(&(tenant_id.to_string(), source, key))
            .copied())
    }

    async fn set(
        &self,
        tenant_id: &TenantId,
        source: Source,
        key: CursorKey,
        value: CursorValue,
    ) -> Result<()> {
        if self.fail_next_set.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("cursor store unavailable"));
        }
        self.cursors
            .lock()
            .await
            .insert((tenant_id.to_string(), source, key), value);
        Ok(())
    }

    async fn advance_timestamp(
        &self,
        tenant_id: &TenantId,
        source: Source,
        key: CursorKey,
        candidate: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let mut cursors = self.cursors.lock().await;
        let slot = (tenant_id.to_string(), source, key);
        let current = cursors.get(&slot).and_then(CursorValue::as_timestamp);
        let stored = current.map_or(candidate, |current| current.max(candidate));
        cursors.insert(slot, CursorValue::Timestamp(stored));
        Ok(stored)
    }

    async fn clear(&self, tenant_id: &TenantId, source: Source, keys: &[CursorKey]) -> Result<()> {
        let mut cursors = self.cursors.lock().await;
        for key in keys {
            cursors.remove(&(tenant_id.to_string(), source, *key));
        }
        Ok(())
    }
}

#[derive(Default)]
struct DocumentGraph {
    documents: BTreeMap<(String, String), (IndexedDocument, i64)>,
    references: BTreeMap<(String, String, String), i64>,
    failing: HashSet<String>,
}

/// Primary document store with a referrer graph
#[derive(Default)]
pub struct MemoryDocumentStore {
    graph: Mutex<DocumentGraph>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tenant_id: &TenantId, document: IndexedDocument) {
        let mut graph = self.graph.lock().await;
        graph
            .documents
            .insert((tenant_id.to_string(), document.document_id.clone()), (document, 0));
    }

    /// Record that `from` cites `to` `count` times and bump `to`'s count
    pub async fn cite(&self, tenant_id: &TenantId, from: &str, to: &str, count: i64) {
        let mut graph = self.graph.lock().await;
        *graph
            .references
            .entry((tenant_id.to_string(), from.to_string(), to.to_string()))
            .or_insert(0) += count;
        if let Some((_, referrers)) = graph.documents.get_mut(&(tenant_id.to_string(), to.to_string())) {
            *referrers += count;
        }
    }

    /// Make deletion of this document fail until cleared
    pub async fn fail_deletion_of(&self, document_id: &str) {
        self.graph.lock().await.failing.insert(document_id.to_string());
    }

    pub async fn clear_failures(&self) {
        self.graph.lock().await.failing.clear();
    }

    pub async fn contains(&self, tenant_id: &TenantId, document_id: &str) -> bool {
        self.graph
            .lock()
            .await
            .documents
            .contains_key(&(tenant_id.to_string(), document_id.to_string()))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_indexed(&self, tenant_id: &TenantId, source: Source) -> Result<Vec<IndexedDocument>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .documents
            .iter()
            .filter(|((tenant, _), (doc, _))| tenant == tenant_id.as_str() && doc.source == source)
            .map(|(_, (doc, _))| doc.clone())
            .collect())
    }

    async fn children_of(
        &self,
        tenant_id: &TenantId,
        document_id: &str,
    ) -> Result<Vec<IndexedDocument>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .documents
            .iter()
            .filter(|((tenant, _), (doc, _))| {
                tenant == tenant_id.as_str() && doc.parent_document_id.as_deref() == Some(document_id)
            })
            .map(|(_, (doc, _))| doc.clone())
            .collect())
    }

    async fn references_of(
        &self,
        tenant_id: &TenantId,
        document_id: &str,
    ) -> Result<Vec<ReferenceContribution>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .references
            .iter()
            .filter(|((t, from, _), _)| t == tenant_id.as_str() && from == document_id)
            .map(|((_, _, to), count)| ReferenceContribution {
                target_document_id: to.clone(),
                count: *count,
            })
            .collect())
    }

    async fn release_reference(
        &self,
        tenant_id: &TenantId,
        document_id: &str,
        target_document_id: &str,
    ) -> Result<()> {
        let mut graph = self.graph.lock().await;
        let tenant = tenant_id.to_string();
        let removed = graph.references.remove(&(
            tenant.clone(),
            document_id.to_string(),
            target_document_id.to_string(),
        ));
        if let Some(count) = removed {
            if let Some((_, referrers)) = graph
                .documents
                .get_mut(&(tenant, target_document_id.to_string()))
            {
                *referrers -= count;
            }
        }
        Ok(())
    }

    async fn delete_document(&self, tenant_id: &TenantId, document_id: &str) -> Result<()> {
        let mut graph = self.graph.lock().await;
        if graph.failing.contains(document_id) {
            return Err(anyhow!("injected deletion failure for {}", document_id));
        }
        graph
            .documents
            .remove(&(tenant_id.to_string(), document_id.to_string()));
        Ok(())
    }

    async fn referrer_count(&self, tenant_id: &TenantId, document_id: &str) -> Result<Option<i64>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .documents
            .get(&(tenant_id.to_string(), document_id.to_string()))
            .map(|(_, count)| *count))
    }
}

#[derive(Default)]
struct SearchState {
    deleted: Vec<String>,
    referrers: HashMap<String, i64>,
}

/// Search index that records what it was asked to do
#[derive(Default)]
pub struct MemorySearchIndex {
    state: Mutex<SearchState>,
    fail_next_adjustment: AtomicBool,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_referrer_count(&self, document_id: &str, count: i64) {
        self.state
            .lock()
            .await
            .referrers
            .insert(document_id.to_string(), count);
    }

    pub async fn referrer_count(&self, document_id: &str) -> i64 {
        self.state
            .lock()
            .await
            .referrers
            .get(document_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn deleted(&self) -> Vec<String> {
        self.state.lock().await.deleted.clone()
    }

    /// Make the next referrer adjustment fail
    pub fn fail_next_adjustment(&self) {
        self.fail_next_adjustment.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn delete_document(&self, _tenant_id: &TenantId, document_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.deleted.push(document_id.to_string());
        state.referrers.remove(document_id);
        Ok(())
    }

    async fn adjust_referrer_count(
        &self,
        _tenant_id: &TenantId,
        document_id: &str,
        delta: i64,
    ) -> Result<()> {
        if self.fail_next_adjustment.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("search index unavailable"));
        }
        *self
            .state
            .lock()
            .await
            .referrers
            .entry(document_id.to_string())
            .or_insert(0) += delta;
        Ok(())
    }
}

/// Indexing trigger that records every request
#[derive(Default)]
pub struct RecordingIndexingTrigger {
    requests: Mutex<Vec<IndexRequest>>,
    failing: AtomicBool,
}

impl RecordingIndexingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn requests(&self) -> Vec<IndexRequest> {
        self.requests.lock().await.clone()
    }

    /// Every entity id passed to the trigger, in call order
    pub async fn entity_ids(&self) -> Vec<String> {
        self.requests
            .lock()
            .await
            .iter()
            .flat_map(|r| r.entities.iter().map(|e| e.entity_id.clone()))
            .collect()
    }
}

#[async_trait]
impl IndexingTrigger for RecordingIndexingTrigger {
    async fn trigger(&self, request: IndexRequest) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("indexing unavailable"));
        }
        self.requests.lock().await.push(request);
        Ok(())
    }
}

/// Notifier that records completions
#[derive(Default)]
pub struct RecordingNotifier {
    completed: Mutex<Vec<(TenantId, Source, BackfillId)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn completed(&self) -> Vec<(TenantId, Source, BackfillId)> {
        self.completed.lock().await.clone()
    }
}

#[async_trait]
impl BackfillNotifier for RecordingNotifier {
    async fn backfill_completed(
        &self,
        tenant_id: &TenantId,
        source: Source,
        backfill_id: BackfillId,
        _progress: &BackfillProgress,
    ) -> Result<()> {
        self.completed
            .lock()
            .await
            .push((tenant_id.clone(), source, backfill_id));
        Ok(())
    }
}
