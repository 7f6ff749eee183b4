//! Breach-intelligence lookup client.
//!
//! Sends one GET per identifier to the configured breach source (Have I Been
//! Pwned by default), carrying the API key in the `hibp-api-key` header. A
//! truthy JSON body is a finding; an empty body or a 404 means the identifier
//! is clean. Every failure is retried under the configured [`RetryPolicy`];
//! exhaustion becomes [`LookupOutcome::Failed`] rather than an error.

use std::time::Duration;

use breachwatch_shared::{
    BreachSourceConfig, BreachWatchError, Finding, LookupOutcome, Result, RetryPolicy, is_truthy,
    with_retry,
};
use reqwest::{Client, StatusCode, header};
use tracing::{debug, error, info, instrument};
use url::Url;

/// Header the breach source reads the API key from.
pub const API_KEY_HEADER: &str = "hibp-api-key";

/// Default timeout in seconds for lookup requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for lookup requests. The source rejects requests without one.
const USER_AGENT: &str = concat!("BreachWatch/", env!("CARGO_PKG_VERSION"));

/// Client for the breach-intelligence source.
pub struct BreachLookup {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl BreachLookup {
    /// Build a lookup client.
    pub fn new(config: &BreachSourceConfig, api_key: &str, retry: RetryPolicy) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            BreachWatchError::config(format!("invalid breach source URL '{base}': {e}"))
        })?;

        let mut headers = header::HeaderMap::new();
        let key = header::HeaderValue::from_str(api_key)
            .map_err(|e| BreachWatchError::config(format!("invalid breach source API key: {e}")))?;
        headers.insert(API_KEY_HEADER, key);

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

    /// Check one identifier.
    ///
    /// Never returns an error: exhausted retries are logged and reported as
    /// [`LookupOutcome::Failed`].
    #[instrument(skip(self))]
    pub async fn check(&self, identifier: &str) -> LookupOutcome {
        let result = with_retry(self.retry, "breach lookup", || self.fetch(identifier)).await;

        match result {
            Ok(Some(data)) => {
                info!(identifier, "breach finding returned");
                LookupOutcome::Found(Finding::new(identifier, data))
            }
            Ok(None) => {
                debug!(identifier, "no breach data");
                LookupOutcome::Clean
            }
            Err(e) => {
                error!(identifier, error = %e, "failed to check breach data");
                LookupOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// One request + parse. `None` means the source has nothing for the identifier.
    async fn fetch(&self, identifier: &str) -> Result<Option<serde_json::Value>> {
        let url = self.endpoint(identifier)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| BreachWatchError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(BreachWatchError::http(status.as_u16(), url.as_str()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| BreachWatchError::Network(format!("{url}: failed to read body: {e}")))?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        let data: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| BreachWatchError::parse(format!("{url}: {e}")))?;
        Ok(is_truthy(&data).then_some(data))
    }

    /// Endpoint for one identifier, with the identifier percent-encoded as a single segment.
    fn endpoint(&self, identifier: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BreachWatchError::config("breach source URL cannot be a base"))?
            .pop_if_empty()
            .push(identifier);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> BreachLookup {
        let config = BreachSourceConfig {
            base_url: format!("{}/api/v3/breachedaccount", server.uri()),
            api_key_env: "HIBP_API_KEY".into(),
        };
        BreachLookup::new(&config, "test-key", RetryPolicy::immediate(3)).expect("client")
    }

    #[test]
    fn endpoint_encodes_identifier() {
        let config = BreachSourceConfig::default();
        let client = BreachLookup::new(&config, "k", RetryPolicy::default()).unwrap();
        assert_eq!(
            client.endpoint("a@example.com").unwrap().as_str(),
            "https://haveibeenpwned.com/api/v3/breachedaccount/a@example.com"
        );
        assert_eq!(
            client.endpoint("x/y").unwrap().as_str(),
            "https://haveibeenpwned.com/api/v3/breachedaccount/x%2Fy"
        );
    }

    #[tokio::test]
    async fn found_returns_finding_with_payload() {
        let server = MockServer::start().await;
        let payload = json!([{"Name": "Adobe"}, {"Name": "LinkedIn"}]);
        Mock::given(method("GET"))
            .and(path("/api/v3/breachedaccount/a@example.com"))
            .and(header(API_KEY_HEADER, "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&payload))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = test_client(&server).check("a@example.com").await;
        let finding = outcome.finding().expect("finding");
        assert_eq!(finding.query, "a@example.com");
        assert_eq!(finding.data, payload);
    }

    #[tokio::test]
    async fn empty_payload_is_clean() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(test_client(&server).check("1.2.3.4").await, LookupOutcome::Clean);
    }

    #[tokio::test]
    async fn not_found_is_clean_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(test_client(&server).check("a@example.com").await, LookupOutcome::Clean);
    }

    #[tokio::test]
    async fn exhausted_retries_report_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        match test_client(&server).check("a@example.com").await {
            LookupOutcome::Failed { error } => assert!(error.contains("503")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_retried_then_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = test_client(&server).check("a@example.com").await;
        assert!(matches!(outcome, LookupOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn recovers_on_second_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["Collection1"])))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = test_client(&server).check("1.2.3.4").await;
        assert!(outcome.finding().is_some());
    }
}
