//! Bundled connectors and the registry that resolves them by source

pub mod http_feed;
pub mod local_dir;

use anyhow::Result;
use chrono::{DateTime, Utc};
use conduit_common::types::Source;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::config::IngestConfig;
use super::framework::connector::{Connector, ConnectorError, ConnectorResult};
use super::framework::types::{Artifact, ArtifactMetadata, ItemRef, JobContext};

pub use http_feed::HttpFeedConnector;
pub use local_dir::LocalDirConnector;

/// Maps each source to the connector serving it
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<Source, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every bundled connector that has configuration
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        let mut registry = Self::new();
        if config.http_feed.base_url.is_some() {
            registry.register(Arc::new(HttpFeedConnector::from_config(
                &config.http_feed,
                config.batch_size,
                config.per_batch_delay(),
            )?));
        }
        if let Some(path) = &config.local_dir.path {
            registry.register(Arc::new(
                LocalDirConnector::new(path.clone())
                    .with_batch_size(config.batch_size)
                    .with_per_batch_delay(config.per_batch_delay()),
            ));
        }
        Ok(registry)
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.source(), connector);
    }

    /// Connector for `source`; an unregistered source is a configuration error
    pub fn get(&self, source: Source) -> ConnectorResult<Arc<dyn Connector>> {
        self.connectors
            .get(&source)
            .cloned()
            .ok_or_else(|| ConnectorError::Config(format!("no connector configured for {}", source)))
    }

    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.connectors.keys().copied().collect();
        sources.sort();
        sources
    }
}

/// Build an artifact from a JSON object shaped like the bundled feeds
///
/// Known keys (`title`, `url`, `container_id`, `parent_id`, `updated_at`)
/// become typed metadata; the whole object is kept as content.
pub(crate) fn artifact_from_json(
    ctx: &JobContext,
    item: &ItemRef,
    detail: Value,
) -> ConnectorResult<Artifact> {
    let Value::Object(fields) = &detail else {
        return Err(ConnectorError::Malformed(format!(
            "item {} is not a JSON object",
            item.id
        )));
    };

    let string = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
    let updated_at = string("updated_at")
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .or(item.modified_at);

    let metadata = ArtifactMetadata {
        title: string("title"),
        container_id: string("container_id").or_else(|| ctx.container.clone()),
        parent_entity_id: string("parent_id"),
        url: string("url"),
        extra: BTreeMap::new(),
    };

    Ok(Artifact {
        tenant_id: ctx.tenant_id.clone(),
        source: ctx.source,
        entity_type: item.entity_type.clone(),
        entity_id: item.id.clone(),
        metadata,
        source_updated_at: updated_at,
        ingest_job_id: ctx.job_id,
        content: detail,
    })
}
