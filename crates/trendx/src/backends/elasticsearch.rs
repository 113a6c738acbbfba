//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN: INT. SEARCH CLUSTER, 4:02 AM
//!
//! Forty thousand partial updates arrive in chunks of five hundred. Each one wants to
//! change exactly one number on a product document. The cluster has seen worse.
//! The cluster has seen a full reindex on a Friday afternoon. The cluster is tired.
//!
//! 🚀 This module is the HTTP side of the index: the `_bulk` write path for the pipeline,
//! and a few read-only searches (stats, range buckets, sorted hits, a single `_doc`) for
//! the reporting commands. Request/response shapes live in `wire`; this file only talks HTTP.
//!
//! 🔒 Auth is tri-modal: api_key, username+password, or anonymous-and-hopeful.
//! API key wins when both are configured. This is not a democracy.
//!
//! 🦆

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::backends::SearchIndex;
use crate::bulk::UpsertAction;
use crate::common::{
    BulkReport, ClusterHealth, FieldStats, RangeBucket, RangeSpec, RankedDocument, SortOrder,
};

mod wire;

/// 📡 Where the cluster lives and how to get past the bouncer.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchIndexConfig {
    /// 📡 Cluster root, e.g. `https://search.internal:9200`.
    pub url: String,
    /// 🔒 Username. The bouncer at the club. Except the club is a database.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key: the velvet rope variant of authentication.
    #[serde(default)]
    pub api_key: Option<String>,
    /// ⏱️ Whole-request timeout. Bulk requests can be meaty.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// ⏱️ TCP connect timeout. If the handshake takes longer than this, nobody is having fun.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// ✍️ When true, updates for unknown ids create the document. Off by default: a trending
    /// score on a product nobody indexed is an orphan, and orphans confuse the storefront.
    #[serde(default)]
    pub doc_as_upsert: bool,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl ElasticsearchIndexConfig {
    /// 🏗️ Anonymous config with default timeouts. Handy in tests.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            doc_as_upsert: false,
        }
    }
}

/// 🕳️ The Elasticsearch adapter. One `reqwest::Client`, reused for every request.
#[derive(Debug)]
pub struct ElasticsearchIndex {
    client: reqwest::Client,
    base_url: Url,
    config: ElasticsearchIndexConfig,
}

impl ElasticsearchIndex {
    /// 🚀 Build the HTTP client. Nothing is sent until `prepare` (or a read) is called.
    pub fn new(config: ElasticsearchIndexConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url).with_context(|| {
            format!(
                "💀 '{}' is not a URL. It might be a dream, or a hostname missing its scheme. Try http:// or https://.",
                config.url
            )
        })?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. Probably a missing cert store or a cursed system OpenSSL.")?;
        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// 🔗 `base_url` + path segments, each percent-encoded. Item ids with slashes stay one segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("💀 '{}' cannot be a base URL", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// 🔒 API key beats basic auth. Neither means anonymous.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {api_key}"))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    /// 🔎 POST a search body to `/{index}/_search` and hand back the parsed JSON.
    async fn search(&self, index: &str, body: &Value) -> Result<Value> {
        let url = self.endpoint(&[index, "_search"])?;
        trace!("🔎 POST {url} {body}");
        let response = self
            .authorize(self.client.post(url))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .with_context(|| format!("💀 The search against '{index}' never made it to the cluster. Check connectivity."))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("💀 Search against '{index}' came back {status}. The cluster said: '{text}'");
        }
        serde_json::from_str(&text)
            .with_context(|| format!("💀 Search against '{index}' returned something that isn't JSON"))
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    /// 🛫 Ping the root, then make sure the index exists. Fail here, not 40,000 docs deep.
    async fn prepare(&self, index: &str) -> Result<()> {
        let root = self
            .authorize(self.client.get(self.base_url.clone()))
            .send()
            .await
            .context("💀 Pinged the cluster root. Got ghosted. The network is giving us the silent treatment, or the firewall is on a power trip again.")?;
        if !root.status().is_success() {
            bail!(
                "💀 The cluster root answered {}. Check the URL and credentials.",
                root.status()
            );
        }

        let response = self
            .authorize(self.client.get(self.endpoint(&[index])?))
            .send()
            .await
            .context("💀 Reached out to check if the index exists. No answer. We refuse to write into a maybe.")?;
        if !response.status().is_success() {
            bail!(
                "💀 Index '{index}' does not exist (status {}). We knocked. Nobody answered. Check your spelling; easy mistake, no judgment.",
                response.status()
            );
        }
        debug!("✅ Index '{index}' exists and is accepting visitors");
        Ok(())
    }

    /// 📡 One chunk, one `_bulk` POST. Transport errors and non-2xx fail the whole chunk.
    async fn bulk_upsert(&self, index: &str, chunk: &[UpsertAction]) -> Result<BulkReport> {
        let body = wire::bulk_body(index, chunk, self.config.doc_as_upsert)?;
        debug!(
            "📡 Sending {} docs ({} bytes) to /_bulk",
            chunk.len(),
            body.len()
        );
        let response = self
            .authorize(self.client.post(self.endpoint(&["_bulk"])?))
            // ⚠️ application/x-ndjson, not application/json. The cluster notices.
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("💀 The bulk request never made it to Elasticsearch. Check connectivity, check timeouts, check your feelings.")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!(
                "💀 The bulk request arrived, but Elasticsearch said '{status}'. The body read: '{text}'"
            );
        }
        let report = wire::parse_bulk_response(&text, chunk)?;
        trace!(
            "🚀 Bulk landed: {} updated, {} failed",
            report.success_count,
            report.failures.len()
        );
        Ok(report)
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let response = self
            .authorize(self.client.get(self.endpoint(&[index, "_doc", id])?))
            .send()
            .await
            .with_context(|| format!("💀 Couldn't fetch document '{id}' from '{index}'"))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("💀 Fetching '{id}' from '{index}' came back {status}: '{text}'");
        }
        let body: Value = serde_json::from_str(&text)
            .with_context(|| format!("💀 Document '{id}' came back as something that isn't JSON"))?;
        Ok(body.get("_source").cloned())
    }

    async fn field_stats(&self, index: &str, field: &str) -> Result<FieldStats> {
        let body = self.search(index, &wire::stats_query(field)).await?;
        wire::parse_stats(&body)
    }

    async fn range_buckets(
        &self,
        index: &str,
        field: &str,
        ranges: &[RangeSpec],
        avg_field: Option<&str>,
    ) -> Result<Vec<RangeBucket>> {
        let body = self
            .search(index, &wire::range_query(field, ranges, avg_field))
            .await?;
        wire::parse_range_buckets(&body, ranges)
    }

    async fn ranked(
        &self,
        index: &str,
        field: &str,
        order: SortOrder,
        limit: usize,
        source_fields: &[&str],
    ) -> Result<Vec<RankedDocument>> {
        let body = self
            .search(index, &wire::ranked_query(field, order, limit, source_fields))
            .await?;
        wire::parse_ranked(&body)
    }

    async fn health(&self) -> Result<ClusterHealth> {
        let response = self
            .authorize(self.client.get(self.base_url.clone()))
            .send()
            .await
            .context("💀 The cluster didn't pick up. Is it running? Is it reachable? Is it a cluster?")?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("💀 The cluster root answered {status}: '{text}'");
        }
        wire::parse_health(&text)
    }
}
