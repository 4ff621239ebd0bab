//! JSON documents in a directory, one file per entity
//!
//! Layout is `{root}/{tenant_id}/{entity_id}.json`. Each file is a JSON object
//! with an optional `entity_type` (default `document`) and optional
//! `modified_at`; the file's modification time is used when the latter is
//! missing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_common::types::{EntityType, Source};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use super::artifact_from_json;
use crate::ingest::config::{DEFAULT_BATCH_SIZE, DEFAULT_PER_BATCH_DELAY_SECS};
use crate::ingest::framework::connector::{Connector, ConnectorError, ConnectorResult};
use crate::ingest::framework::types::{Artifact, ItemPage, ItemRef, JobContext, ListOrder};

const DEFAULT_ENTITY_TYPE: &str = "document";

pub struct LocalDirConnector {
    root: PathBuf,
    batch_size: usize,
    per_batch_delay: Duration,
}

impl LocalDirConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            per_batch_delay: Duration::from_secs(DEFAULT_PER_BATCH_DELAY_SECS),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_per_batch_delay(mut self, delay: Duration) -> Self {
        self.per_batch_delay = delay;
        self
    }

    fn tenant_dir(&self, ctx: &JobContext) -> PathBuf {
        self.root.join(ctx.tenant_id.as_str())
    }

    async fn read_object(path: &Path) -> ConnectorResult<Value> {
        let raw = fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ConnectorError::NotFound(path.display().to_string()),
            _ => ConnectorError::Transient(format!("{}: {}", path.display(), e)),
        })?;
        serde_json::from_slice(&raw)
            .map_err(|e| ConnectorError::Malformed(format!("{}: {}", path.display(), e)))
    }

    async fn item_for(path: &Path, id: String) -> ConnectorResult<ItemRef> {
        let value = Self::read_object(path).await?;
        let entity_type = value
            .get("entity_type")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ENTITY_TYPE);
        let entity_type = EntityType::parse(entity_type)
            .map_err(|e| ConnectorError::Malformed(format!("{}: {}", path.display(), e)))?;

        let declared = value
            .get("modified_at")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc));
        let modified_at = match declared {
            Some(ts) => Some(ts),
            None => fs::metadata(path)
                .await
                .ok()
                .and_then(|meta| meta.modified().ok())
                .map(DateTime::<Utc>::from),
        };

        Ok(ItemRef {
            id,
            entity_type,
            modified_at,
            hint: None,
        })
    }
}

#[async_trait]
impl Connector for LocalDirConnector {
    fn source(&self) -> Source {
        Source::LocalDir
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn per_batch_delay(&self) -> Duration {
        self.per_batch_delay
    }

    /// The whole directory is one page
    async fn list_page(
        &self,
        ctx: &JobContext,
        _page_token: Option<&str>,
        order: ListOrder,
    ) -> ConnectorResult<ItemPage> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            return Err(ConnectorError::Config(format!(
                "directory {} does not exist",
                self.root.display()
            )));
        }

        let dir = self.tenant_dir(ctx);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ItemPage::default()),
            Err(e) => return Err(ConnectorError::Unreachable(format!("{}: {}", dir.display(), e))),
        };

        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ConnectorError::Transient(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            items.push(Self::item_for(&path, id.to_string()).await?);
        }

        match order {
            ListOrder::Natural => items.sort_by(|a, b| a.id.cmp(&b.id)),
            ListOrder::RecentlyModified => {
                items.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| a.id.cmp(&b.id)))
            },
        }

        Ok(ItemPage {
            items,
            next_page_token: None,
        })
    }

    async fn fetch_detail(&self, ctx: &JobContext, item: &ItemRef) -> ConnectorResult<Value> {
        if item.id.contains(['/', '\\']) || item.id.starts_with('.') {
            return Err(ConnectorError::Malformed(format!("invalid entity id {}", item.id)));
        }
        let path = self.tenant_dir(ctx).join(format!("{}.json", item.id));
        Self::read_object(&path).await
    }

    fn transform(
        &self,
        ctx: &JobContext,
        item: &ItemRef,
        detail: Value,
    ) -> ConnectorResult<Artifact> {
        artifact_from_json(ctx, item, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_common::types::TenantId;
    use serde_json::json;
    use tempfile::TempDir;

    fn ctx() -> JobContext {
        JobContext::new(TenantId::parse("acme").unwrap(), Source::LocalDir)
    }

    fn write(dir: &TempDir, id: &str, body: Value) {
        let tenant = dir.path().join("acme");
        std::fs::create_dir_all(&tenant).unwrap();
        std::fs::write(tenant.join(format!("{}.json", id)), body.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_lists_recently_modified_first() {
        let dir = TempDir::new().unwrap();
        write(&dir, "old", json!({ "modified_at": "2026-01-01T00:00:00Z" }));
        write(&dir, "new", json!({ "modified_at": "2026-03-01T00:00:00Z", "entity_type": "Page" }));
        std::fs::write(dir.path().join("acme").join("notes.txt"), "ignored").unwrap();

        let connector = LocalDirConnector::new(dir.path());
        let page = connector
            .list_page(&ctx(), None, ListOrder::RecentlyModified)
            .await
            .unwrap();

        let ids: Vec<&str> = page.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(page.items[0].entity_type.as_str(), "page");
        assert_eq!(page.items[1].entity_type.as_str(), "document");
    }

    #[tokio::test]
    async fn test_missing_tenant_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let page = LocalDirConnector::new(dir.path())
            .list_page(&ctx(), None, ListOrder::Natural)
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_is_fatal() {
        let result = LocalDirConnector::new("/nonexistent/conduit-root")
            .list_page(&ctx(), None, ListOrder::Natural)
            .await;
        assert!(matches!(&result, Err(e) if e.is_fatal()));
    }

    #[tokio::test]
    async fn test_fetch_detail_and_missing_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a", json!({ "title": "A" }));
        let connector = LocalDirConnector::new(dir.path());
        let document = EntityType::parse("document").unwrap();

        let detail = connector
            .fetch_detail(&ctx(), &ItemRef::new("a", document.clone()))
            .await
            .unwrap();
        assert_eq!(detail["title"], "A");

        let missing = connector
            .fetch_detail(&ctx(), &ItemRef::new("b", document.clone()))
            .await;
        assert!(matches!(missing, Err(ConnectorError::NotFound(_))));

        let escape = connector
            .fetch_detail(&ctx(), &ItemRef::new("../etc", document))
            .await;
        assert!(matches!(escape, Err(ConnectorError::Malformed(_))));
    }
}
