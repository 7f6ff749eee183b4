//! Asset inventory annotation (NetBox IPAM).
//!
//! Given a network address with a breach finding, the [`AssetAnnotator`]
//! lists `ipam/ip-addresses` records filtered by that address and overwrites
//! the description of the first one returned. The lookup and the patch run
//! together under one [`RetryPolicy`].

use std::time::Duration;

use breachwatch_shared::{
    AnnotationOutcome, BREACH_ANNOTATION, BreachWatchError, InventoryConfig, Result, RetryPolicy,
    with_retry,
};
use reqwest::{Client, header};
use serde::Deserialize;
use tracing::{debug, error, info, instrument};
use url::Url;

/// Default timeout in seconds for inventory requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for inventory requests.
const USER_AGENT: &str = concat!("BreachWatch/", env!("CARGO_PKG_VERSION"));

/// Collection path of address records, relative to the API root.
const IP_ADDRESSES: &str = "ipam/ip-addresses/";

/// An address record as returned by the inventory list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetRecord {
    pub id: u64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
struct RecordPage {
    results: Vec<AssetRecord>,
}

/// Writes breach flags onto inventory records.
pub struct AssetAnnotator {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl AssetAnnotator {
    /// Build an annotator for the inventory at `config.base_url`.
    pub fn new(config: &InventoryConfig, token: &str, retry: RetryPolicy) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            BreachWatchError::config(format!("invalid inventory URL '{base}': {e}"))
        })?;

        let mut headers = header::HeaderMap::new();
        let auth = header::HeaderValue::from_str(&format!("Token {token}"))
            .map_err(|e| BreachWatchError::config(format!("invalid inventory token: {e}")))?;
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| BreachWatchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            retry,
        })
    }

    /// Flag the first inventory record matching `address`.
    ///
    /// Never returns an error: exhausted retries are logged and reported as
    /// [`AnnotationOutcome::Failed`].
    #[instrument(skip(self))]
    pub async fn annotate(&self, address: &str) -> AnnotationOutcome {
        let result = with_retry(self.retry, "inventory annotate", || {
            self.annotate_once(address)
        })
        .await;

        match result {
            Ok(Some(record_id)) => {
                info!(address, record_id, "flagged inventory record");
                AnnotationOutcome::Updated { record_id }
            }
            Ok(None) => {
                debug!(address, "no inventory record for address");
                AnnotationOutcome::NotFound
            }
            Err(e) => {
                error!(address, error = %e, "failed to update inventory");
                AnnotationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Lookup + patch. Returns the patched record id, or `None` when nothing matched.
    async fn annotate_once(&self, address: &str) -> Result<Option<u64>> {
        let Some(record) = self.find_records(address).await?.into_iter().next() else {
            return Ok(None);
        };
        self.set_description(record.id, BREACH_ANNOTATION).await?;
        Ok(Some(record.id))
    }

    /// List records whose address matches exactly, in the order the inventory returns them.
    pub async fn find_records(&self, address: &str) -> Result<Vec<AssetRecord>> {
        let mut url = self.collection_url()?;
        url.query_pairs_mut().append_pair("address", address);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| BreachWatchError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BreachWatchError::http(status.as_u16(), url.as_str()));
        }

        let page: RecordPage = response
            .json()
            .await
            .map_err(|e| BreachWatchError::parse(format!("{url}: {e}")))?;
        Ok(page.results)
    }

    /// Overwrite the description of record `id`.
    pub async fn set_description(&self, id: u64, description: &str) -> Result<()> {
        let url = self
            .collection_url()?
            .join(&format!("{id}/"))
            .map_err(|e| BreachWatchError::Inventory(format!("record URL for {id}: {e}")))?;

        let response = self
            .client
            .patch(url.clone())
            .json(&serde_json::json!({ "description": description }))
            .send()
            .await
            .map_err(|e| BreachWatchError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BreachWatchError::http(status.as_u16(), url.as_str()));
        }
        Ok(())
    }

    fn collection_url(&self) -> Result<Url> {
        self.base_url
            .join(IP_ADDRESSES)
            .map_err(|e| BreachWatchError::Inventory(format!("collection URL: {e}")))
    }
}
