//! Generic paginated JSON feed
//!
//! - `GET {base}/items?order=..&page_token=..` returns an [`ItemPage`]
//! - `GET {base}/items/{id}` returns the item as a JSON object
//!
//! Every request carries the bearer token and the tenant in `X-Tenant-Id`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use conduit_common::types::Source;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::artifact_from_json;
use crate::ingest::config::HttpFeedConfig;
use crate::ingest::framework::connector::{Connector, ConnectorError, ConnectorResult};
use crate::ingest::framework::types::{Artifact, ItemPage, ItemRef, JobContext, ListOrder};

pub const TENANT_HEADER: &str = "X-Tenant-Id";

pub struct HttpFeedConnector {
    client: Client,
    base_url: String,
    token: Option<String>,
    batch_size: usize,
    per_batch_delay: Duration,
}

impl HttpFeedConnector {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP feed client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            batch_size: crate::ingest::config::DEFAULT_BATCH_SIZE,
            per_batch_delay: Duration::from_secs(crate::ingest::config::DEFAULT_PER_BATCH_DELAY_SECS),
        })
    }

    pub fn from_config(
        config: &HttpFeedConfig,
        default_batch_size: usize,
        per_batch_delay: Duration,
    ) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .context("INGEST_HTTP_FEED_BASE_URL is not set")?;
        let mut connector = Self::new(base_url, config.token.clone(), config.timeout())?;
        connector.batch_size = config.batch_size.unwrap_or(default_batch_size).max(1);
        connector.per_batch_delay = per_batch_delay;
        Ok(connector)
    }

    fn get(&self, ctx: &JobContext, url: String) -> RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(TENANT_HEADER, ctx.tenant_id.as_str());
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> ConnectorResult<T> {
        let response = request.send().await.map_err(send_error)?;
        let response = check_status(response, what)?;
        response
            .json::<T>()
            .await
            .map_err(|e| ConnectorError::Malformed(format!("{}: {}", what, e)))
    }
}

fn send_error(error: reqwest::Error) -> ConnectorError {
    if error.is_connect() {
        ConnectorError::Unreachable(error.to_string())
    } else if error.is_builder() {
        ConnectorError::Config(error.to_string())
    } else {
        ConnectorError::Transient(error.to_string())
    }
}

fn check_status(response: Response, what: &str) -> ConnectorResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = format!("{} returned {}", what, status);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ConnectorError::Config(message),
        StatusCode::NOT_FOUND => ConnectorError::NotFound(message),
        status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
            ConnectorError::Transient(message)
        },
        _ => ConnectorError::Malformed(message),
    })
}

#[async_trait]
impl Connector for HttpFeedConnector {
    fn source(&self) -> Source {
        Source::HttpFeed
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn per_batch_delay(&self) -> Duration {
        self.per_batch_delay
    }

    async fn list_page(
        &self,
        ctx: &JobContext,
        page_token: Option<&str>,
        order: ListOrder,
    ) -> ConnectorResult<ItemPage> {
        debug!(
            tenant_id = %ctx.tenant_id,
            order = order.as_str(),
            page_token = page_token.unwrap_or(""),
            "Listing feed page"
        );

        let mut request = self
            .get(ctx, format!("{}/items", self.base_url))
            .query(&[("order", order.as_str())]);
        if let Some(token) = page_token {
            request = request.query(&[("page_token", token)]);
        }

        self.fetch_json(request, "item listing").await
    }

    async fn fetch_detail(&self, ctx: &JobContext, item: &ItemRef) -> ConnectorResult<Value> {
        let url = format!("{}/items/{}", self.base_url, urlencoding::encode(&item.id));
        self.fetch_json(self.get(ctx, url), &format!("item {}", item.id))
            .await
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
