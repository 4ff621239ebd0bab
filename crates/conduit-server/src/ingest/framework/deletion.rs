//! Cascading document deletion
//!
//! Children are deleted before their parent. If any child fails the parent
//! is left in place and reported as failed, so the next pass retries it;
//! children already deleted stay deleted, and deleting them again is a no-op.
//!
//! A citation is released in the primary store only after the search index
//! has taken its count off, and the primary row goes last. A failure at any
//! step leaves the document listed with its unreleased citations, so the
//! next pass finishes both stores. Only a crash between the two halves of one
//! release can apply that citation twice on the search side.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::documents::{DocumentStore, IndexedDocument};
use super::search::SearchIndex;
use super::storage::ArtifactStore;
use super::types::DeletionReport;
use conduit_common::types::TenantId;

#[derive(Default)]
struct Walk {
    deleted: HashSet<String>,
    failed: HashSet<String>,
    report: DeletionReport,
}

impl Walk {
    fn visited(&self, document_id: &str) -> bool {
        self.deleted.contains(document_id) || self.failed.contains(document_id)
    }

    fn succeed(&mut self, document_id: String) {
        self.deleted.insert(document_id.clone());
        self.report.deleted.push(document_id);
    }

    fn fail(&mut self, document_id: String) {
        if self.failed.insert(document_id.clone()) {
            self.report.failed.push(document_id);
        }
    }
}

pub struct DocumentDeleter {
    artifacts: Arc<dyn ArtifactStore>,
    documents: Arc<dyn DocumentStore>,
    search: Arc<dyn SearchIndex>,
}

impl DocumentDeleter {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        documents: Arc<dyn DocumentStore>,
        search: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            artifacts,
            documents,
            search,
        }
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Delete every document in `targets`, cascading into children
    pub async fn delete_all(&self, tenant_id: &TenantId, targets: &[IndexedDocument]) -> DeletionReport {
        let mut walk = Walk::default();

        for document in targets {
            if walk.visited(&document.document_id) {
                continue;
            }
            self.delete_tree(tenant_id, document.clone(), &mut walk).await;
        }

        walk.report
    }

    fn delete_tree<'a>(
        &'a self,
        tenant_id: &'a TenantId,
        document: IndexedDocument,
        walk: &'a mut Walk,
    ) -> BoxFuture<'a, bool> {
        async move {
            if walk.deleted.contains(&document.document_id) {
                return true;
            }
            if walk.failed.contains(&document.document_id) {
                return false;
            }

            let children = match self
                .documents
                .children_of(tenant_id, &document.document_id)
                .await
            {
                Ok(children) => children,
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        document_id = %document.document_id,
                        error = %e,
                        "Failed to list child documents"
                    );
                    walk.fail(document.document_id);
                    return false;
                },
            };

            let mut children_ok = true;
            for child in children {
                if !self.delete_tree(tenant_id, child, walk).await {
                    children_ok = false;
                }
            }
            if !children_ok {
                warn!(
                    tenant_id = %tenant_id,
                    document_id = %document.document_id,
                    "Keeping document until its children are deleted"
                );
                walk.fail(document.document_id);
                return false;
            }

            match self.delete_one(tenant_id, &document).await {
                Ok(()) => {
                    walk.succeed(document.document_id);
                    true
                },
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        document_id = %document.document_id,
                        error = %e,
                        "Document deletion failed"
                    );
                    walk.fail(document.document_id);
                    false
                },
            }
        }
        .boxed()
    }

    /// Artifact, search document, each citation in both stores, then the
    /// primary row
    async fn delete_one(&self, tenant_id: &TenantId, document: &IndexedDocument) -> anyhow::Result<()> {
        self.artifacts
            .delete_by_entity_id(
                tenant_id,
                document.source,
                &document.entity_type,
                &document.entity_id,
            )
            .await?;

        let contributions = self
            .documents
            .references_of(tenant_id, &document.document_id)
            .await?;

        self.search
            .delete_document(tenant_id, &document.document_id)
            .await?;

        for contribution in &contributions {
            self.search
                .adjust_referrer_count(tenant_id, &contribution.target_document_id, -contribution.count)
                .await?;
            self.documents
                .release_reference(tenant_id, &document.document_id, &contribution.target_document_id)
                .await?;
        }

        self.documents
            .delete_document(tenant_id, &document.document_id)
            .await?;

        debug!(
            tenant_id = %tenant_id,
            document_id = %document.document_id,
            references = contributions.len(),
            "Document deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::framework::memory::{
        MemoryArtifactStore, MemoryDocumentStore, MemorySearchIndex,
    };
    use conduit_common::types::{EntityType, Source};

    fn tenant() -> TenantId {
        TenantId::parse("t1").unwrap()
    }

    fn doc(id: &str, parent: Option<&str>) -> IndexedDocument {
        IndexedDocument {
            document_id: id.to_string(),
            source: Source::HttpFeed,
            entity_type: EntityType::parse("page").unwrap(),
            entity_id: id.to_string(),
            parent_document_id: parent.map(str::to_string),
        }
    }

    struct Fixture {
        documents: Arc<MemoryDocumentStore>,
        search: Arc<MemorySearchIndex>,
        deleter: DocumentDeleter,
    }

    fn fixture() -> Fixture {
        let documents = Arc::new(MemoryDocumentStore::new());
        let search = Arc::new(MemorySearchIndex::new());
        let deleter = DocumentDeleter::new(
            Arc::new(MemoryArtifactStore::new()),
            documents.clone(),
            search.clone(),
        );
        Fixture {
            documents,
            search,
            deleter,
        }
    }

    #[tokio::test]
    async fn test_decrements_by_contributed_count_in_both_stores() {
        let f = fixture();
        for id in ["gone", "doc-a", "doc-b"] {
            f.documents.insert(&tenant(), doc(id, None)).await;
        }
        f.documents.cite(&tenant(), "gone", "doc-a", 3).await;
        f.documents.cite(&tenant(), "gone", "doc-b", 1).await;
        f.documents.cite(&tenant(), "doc-b", "doc-a", 2).await;
        f.search.set_referrer_count("doc-a", 5).await;
        f.search.set_referrer_count("doc-b", 1).await;

        let report = f.deleter.delete_all(&tenant(), &[doc("gone", None)]).await;

        assert_eq!(report.deleted, vec!["gone".to_string()]);
        assert!(report.fully_succeeded());
        assert_eq!(f.documents.referrer_count(&tenant(), "doc-a").await.unwrap(), Some(2));
        assert_eq!(f.documents.referrer_count(&tenant(), "doc-b").await.unwrap(), Some(0));
        assert_eq!(f.search.referrer_count("doc-a").await, 2);
        assert_eq!(f.search.referrer_count("doc-b").await, 0);
        assert_eq!(f.search.deleted().await, vec!["gone".to_string()]);
    }

    #[tokio::test]
    async fn test_search_failure_keeps_document_for_retry() {
        let f = fixture();
        for id in ["gone", "doc-a"] {
            f.documents.insert(&tenant(), doc(id, None)).await;
        }
        f.documents.cite(&tenant(), "gone", "doc-a", 3).await;
        f.search.set_referrer_count("doc-a", 3).await;
        f.search.fail_next_adjustment();

        let first = f.deleter.delete_all(&tenant(), &[doc("gone", None)]).await;
        assert_eq!(first.failed, vec!["gone".to_string()]);
        assert!(f.documents.contains(&tenant(), "gone").await);
        assert_eq!(f.documents.referrer_count(&tenant(), "doc-a").await.unwrap(), Some(3));
        assert_eq!(f.search.referrer_count("doc-a").await, 3);

        let retry = f.deleter.delete_all(&tenant(), &[doc("gone", None)]).await;
        assert_eq!(retry.deleted, vec!["gone".to_string()]);
        assert!(!f.documents.contains(&tenant(), "gone").await);
        assert_eq!(f.documents.referrer_count(&tenant(), "doc-a").await.unwrap(), Some(0));
        assert_eq!(f.search.referrer_count("doc-a").await, 0);
    }

    #[tokio::test]
    async fn test_children_deleted_before_parent() {
        let f = fixture();
        f.documents.insert(&tenant(), doc("folder", None)).await;
        f.documents.insert(&tenant(), doc("child-1", Some("folder"))).await;
        f.documents.insert(&tenant(), doc("child-2", Some("folder"))).await;

        let report = f.deleter.delete_all(&tenant(), &[doc("folder", None)]).await;

        assert_eq!(report.deleted.len(), 3);
        assert_eq!(report.deleted.last().map(String::as_str), Some("folder"));
        assert!(!f.documents.contains(&tenant(), "folder").await);
    }

    #[tokio::test]
    async fn test_failed_child_keeps_parent_for_next_pass() {
        let f = fixture();
        f.documents.insert(&tenant(), doc("folder", None)).await;
        f.documents.insert(&tenant(), doc("child-1", Some("folder"))).await;
        f.documents.insert(&tenant(), doc("child-2", Some("folder"))).await;
        f.documents.fail_deletion_of("child-2").await;

        let report = f.deleter.delete_all(&tenant(), &[doc("folder", None)]).await;

        assert_eq!(report.deleted, vec!["child-1".to_string()]);
        assert_eq!(report.failed, vec!["child-2".to_string(), "folder".to_string()]);
        assert!(f.documents.contains(&tenant(), "folder").await);
        assert!(!f.documents.contains(&tenant(), "child-1").await);

        f.documents.clear_failures().await;
        let retry = f.deleter.delete_all(&tenant(), &[doc("folder", None)]).await;
        assert!(retry.fully_succeeded());
        assert_eq!(retry.deleted, vec!["child-2".to_string(), "folder".to_string()]);
    }

    #[tokio::test]
    async fn test_target_listed_twice_is_deleted_once() {
        let f = fixture();
        f.documents.insert(&tenant(), doc("folder", None)).await;
        f.documents.insert(&tenant(), doc("child", Some("folder"))).await;

        let report = f
            .deleter
            .delete_all(&tenant(), &[doc("folder", None), doc("child", Some("folder"))])
            .await;

        assert_eq!(report.deleted, vec!["child".to_string(), "folder".to_string()]);
    }
}
