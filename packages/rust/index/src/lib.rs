//! Search index client for finding documents.
//!
//! Talks to an Elasticsearch-compatible REST API. The index is created lazily
//! with a fixed schema: `query` and `data` as full-text fields and `date` as an
//! epoch-millisecond date. `query` also carries a `raw` keyword sub-field so a
//! finding can be matched back to its identifier exactly.
//!
//! A document written alongside a relational row uses the row id as its `_id`,
//! which lets reconciliation tell exactly which rows the index already holds.

use std::collections::HashSet;
use std::time::Duration;

use breachwatch_shared::{BreachWatchError, Finding, Result, SearchConfig};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Default timeout in seconds for index requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for index requests.
const USER_AGENT: &str = concat!("BreachWatch/", env!("CARGO_PKG_VERSION"));

/// Error type Elasticsearch reports when creating an index that already exists.
const ALREADY_EXISTS: &str = "resource_already_exists_exception";

/// Row ids sent per membership query.
const ID_BATCH: usize = 500;

/// A finding as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub query: String,
    /// Serialized payload, same text as the relational `data` column.
    pub data: String,
    /// Epoch milliseconds.
    pub date: i64,
}

impl IndexDocument {
    pub fn new(query: impl Into<String>, data: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            query: query.into(),
            data: data.into(),
            date: date.timestamp_millis(),
        }
    }
}

impl From<&Finding> for IndexDocument {
    fn from(finding: &Finding) -> Self {
        Self::new(
            finding.query.clone(),
            finding.serialized_data(),
            finding.captured_at,
        )
    }
}

#[derive(Deserialize)]
struct DocRef {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<DocRef>,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

/// Settings and mappings sent when the index does not exist yet.
pub fn index_definition() -> serde_json::Value {
    serde_json::json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0
        },
        "mappings": {
            "properties": {
                "query": {
                    "type": "text",
                    "fields": { "raw": { "type": "keyword" } }
                },
                "data": { "type": "text" },
                "date": { "type": "date", "format": "epoch_millis" }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// SearchIndex
// ---------------------------------------------------------------------------

/// Client for the findings index.
pub struct SearchIndex {
    client: Client,
    base_url: String,
    index: String,
}

impl SearchIndex {
    /// Build a client for the index described by `config`.
    ///
    /// `api_key`, when present, is sent as `Authorization: ApiKey <key>`.
    pub fn new(config: &SearchConfig, api_key: Option<&str>) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = header::HeaderValue::from_str(&format!("ApiKey {key}"))
                .map_err(|e| BreachWatchError::config(format!("invalid search API key: {e}")))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| BreachWatchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
        })
    }

    /// Name of the index this client writes to.
    pub fn index_name(&self) -> &str {
        &self.index
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, self.index)
    }

    /// Create the index if it does not exist. Returns `true` if it was created.
    #[instrument(skip_all, fields(index = %self.index))]
    pub async fn ensure_index(&self) -> Result<bool> {
        let url = self.index_url();
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| BreachWatchError::Network(format!("{url}: {e}")))?;

        match response.status() {
            s if s.is_success() => {
                debug!("index already exists");
                return Ok(false);
            }
            StatusCode::NOT_FOUND => {}
            s => return Err(BreachWatchError::http(s.as_u16(), url)),
        }

        let response = self
            .client
            .put(&url)
            .json(&index_definition())
            .send()
            .await
            .map_err(|e| BreachWatchError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            info!("created index");
            return Ok(true);
        }

        // Lost a race with another creator; the index is there now.
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains(ALREADY_EXISTS) {
            debug!("index created concurrently");
            return Ok(false);
        }

        Err(BreachWatchError::Index(format!(
            "creating {}: HTTP {status}: {body}",
            self.index
        )))
    }

    /// Index one finding, keyed by its relational row when there is one.
    pub async fn index_finding(&self, finding: &Finding, row_id: Option<i64>) -> Result<String> {
        self.index_document(&IndexDocument::from(finding), row_id).await
    }

    /// Index a document. Returns its `_id`.
    ///
    /// With a `row_id` the document is written with `PUT _doc/<row_id>`, so
    /// writing the same row twice leaves one document. Without one the service
    /// assigns the id.
    #[instrument(skip_all, fields(index = %self.index, query = %doc.query, row_id = ?row_id))]
    pub async fn index_document(&self, doc: &IndexDocument, row_id: Option<i64>) -> Result<String> {
        let (request, url) = match row_id {
            Some(id) => {
                let url = format!("{}/_doc/{id}", self.index_url());
                (self.client.put(&url), url)
            }
            None => {
                let url = format!("{}/_doc", self.index_url());
                (self.client.post(&url), url)
            }
        };
        let response = request
            .json(doc)
            .send()
            .await
            .map_err(|e| BreachWatchError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BreachWatchError::http(status.as_u16(), url));
        }

        let body: DocRef = response
            .json()
            .await
            .map_err(|e| BreachWatchError::parse(format!("{url}: {e}")))?;
        debug!(doc_id = %body.id, "indexed document");
        Ok(body.id)
    }

    /// Which of `row_ids` are present as documents for `query`.
    pub async fn indexed_row_ids(&self, query: &str, row_ids: &[i64]) -> Result<HashSet<i64>> {
        let url = format!("{}/_search", self.index_url());
        let mut found = HashSet::new();

        for batch in row_ids.chunks(ID_BATCH) {
            let ids: Vec<String> = batch.iter().map(i64::to_string).collect();
            let body = serde_json::json!({
                "size": ids.len(),
                "_source": false,
                "query": {
                    "bool": {
                        "filter": [
                            { "term": { "query.raw": query } },
                            { "ids": { "values": ids } }
                        ]
                    }
                }
            });

            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| BreachWatchError::Network(format!("{url}: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(BreachWatchError::http(status.as_u16(), url));
            }

            let parsed: SearchResponse = response
                .json()
                .await
                .map_err(|e| BreachWatchError::parse(format!("{url}: {e}")))?;
            found.extend(parsed.hits.hits.iter().filter_map(|hit| hit.id.parse::<i64>().ok()));
        }

        Ok(found)
    }

    /// Number of documents whose `query` is exactly `query`.
    pub async fn count_for_query(&self, query: &str) -> Result<u64> {
        let url = format!("{}/_count", self.index_url());
        let body = serde_json::json!({
            "query": { "term": { "query.raw": query } }
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BreachWatchError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BreachWatchError::http(status.as_u16(), url));
        }

        let parsed: CountResponse = response
            .json()
            .await
            .map_err(|e| BreachWatchError::parse(format!("{url}: {e}")))?;
        Ok(parsed.count)
    }

    /// Make recent writes visible to search and count.
    pub async fn refresh(&self) -> Result<()> {
        let url = format!("{}/_refresh", self.index_url());
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| BreachWatchError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BreachWatchError::http(status.as_u16(), url));
        }
        Ok(())
    }
}
