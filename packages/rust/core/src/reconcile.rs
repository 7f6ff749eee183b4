//! Reconciliation between the relational log and the search index.
//!
//! The log is treated as the source of truth. Index documents written next to
//! a log row carry the row id as their `_id`, so for every identifier the pass
//! asks the index which of its row ids are present. Rows without a document are
//! reported and, when repair is requested, re-indexed under their id. A count
//! mismatch with nothing missing means surplus documents, which are only
//! reported.

use breachwatch_index::IndexDocument;
use breachwatch_shared::Result;
use tracing::{info, instrument, warn};

use crate::store::FindingStore;

/// One identifier whose stores disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    pub query: String,
    pub log_rows: u64,
    pub index_docs: u64,
    /// Log row ids with no index document, ascending.
    pub missing: Vec<i64>,
    /// Documents re-indexed by this pass.
    pub repaired: u64,
}

impl Divergence {
    /// Rows present in the log but not in the index.
    pub fn missing_from_index(&self) -> u64 {
        self.missing.len() as u64
    }
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Distinct identifiers compared.
    pub checked: usize,
    pub divergent: Vec<Divergence>,
    /// Per-identifier errors, as `(query, message)`.
    pub errors: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn repaired(&self) -> u64 {
        self.divergent.iter().map(|d| d.repaired).sum()
    }
}

/// Compare the two stores and optionally backfill the index from the log.
#[instrument(skip_all, fields(index = %store.index().index_name(), repair = repair))]
pub async fn reconcile(store: &FindingStore, repair: bool) -> Result<ReconcileReport> {
    store.index().refresh().await?;
    let counts = store.log().count_by_query().await?;

    let mut report = ReconcileReport {
        checked: counts.len(),
        ..ReconcileReport::default()
    };

    for (query, log_rows) in counts {
        match compare_query(store, &query, log_rows).await {
            Ok(None) => {}
            Ok(Some(mut divergence)) => {
                warn!(
                    query = %divergence.query,
                    log_rows,
                    index_docs = divergence.index_docs,
                    missing = divergence.missing.len(),
                    "finding stores diverge"
                );
                if repair {
                    repair_missing(store, &mut divergence, &mut report.errors).await;
                }
                report.divergent.push(divergence);
            }
            Err(e) => {
                warn!(%query, error = %e, "failed to compare finding stores");
                report.errors.push((query, e.to_string()));
            }
        }
    }

    info!(
        checked = report.checked,
        divergent = report.divergent.len(),
        repaired = report.repaired(),
        "reconciliation complete"
    );
    Ok(report)
}

/// `None` when every row is indexed and the counts agree.
async fn compare_query(
    store: &FindingStore,
    query: &str,
    log_rows: u64,
) -> Result<Option<Divergence>> {
    let index_docs = store.index().count_for_query(query).await?;
    let rows = store.log().list_findings(query).await?;
    let mut row_ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
    row_ids.sort_unstable();
    let indexed = store.index().indexed_row_ids(query, &row_ids).await?;

    let missing: Vec<i64> = row_ids
        .into_iter()
        .filter(|id| !indexed.contains(id))
        .collect();
    if missing.is_empty() && index_docs == log_rows {
        return Ok(None);
    }

    Ok(Some(Divergence {
        query: query.to_string(),
        log_rows,
        index_docs,
        missing,
        repaired: 0,
    }))
}

async fn repair_missing(
    store: &FindingStore,
    divergence: &mut Divergence,
    errors: &mut Vec<(String, String)>,
) {
    if divergence.missing.is_empty() {
        return;
    }
    let missing = divergence.missing.clone();
    let rows = match store.log().list_findings(&divergence.query).await {
        Ok(rows) => rows,
        Err(e) => {
            errors.push((divergence.query.clone(), e.to_string()));
            return;
        }
    };

    for row in rows.into_iter().filter(|row| missing.contains(&row.id)) {
        let row_id = row.id;
        let doc = IndexDocument::new(row.query, row.data, row.date);
        match store.index().index_document(&doc, Some(row_id)).await {
            Ok(_) => divergence.repaired += 1,
            Err(e) => errors.push((doc.query, format!("row {row_id}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{temp_db_path, test_config};
    use breachwatch_index::SearchIndex;
    use breachwatch_storage::FindingLog;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EMAIL: &str = "a@example.com";
    const ADDRESS: &str = "1.2.3.4";

    /// Log rows: 1 = EMAIL `["old"]`, 2 = EMAIL `["new"]`, 3 = ADDRESS `[1]`.
    async fn seeded_store(server: &MockServer) -> FindingStore {
        let config = test_config(server);
        let log = FindingLog::open(&temp_db_path()).await.unwrap();
        log.ensure_schema().await.unwrap();
        log.insert_finding(EMAIL, "[\"old\"]").await.unwrap();
        log.insert_finding(EMAIL, "[\"new\"]").await.unwrap();
        log.insert_finding(ADDRESS, "[1]").await.unwrap();
        let index = SearchIndex::new(&config.search, None).unwrap();
        FindingStore::new(log, index)
    }

    /// Answer `_count` and the row-id membership search for `query`.
    async fn mount_index_state(
        server: &MockServer,
        query: &str,
        count: u64,
        asked: &[&str],
        present: &[&str],
    ) {
        Mock::given(method("POST"))
            .and(path("/es/breaches/_count"))
            .and(body_json(json!({"query": {"term": {"query.raw": query}}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": count})))
            .mount(server)
            .await;

        let hits: Vec<_> = present.iter().map(|id| json!({"_id": id})).collect();
        Mock::given(method("POST"))
            .and(path("/es/breaches/_search"))
            .and(body_json(json!({
                "size": asked.len(),
                "_source": false,
                "query": {"bool": {"filter": [
                    {"term": {"query.raw": query}},
                    {"ids": {"values": asked}}
                ]}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": {"hits": hits}})))
            .mount(server)
            .await;
    }

    async fn mount_refresh(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/es/breaches/_refresh"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    /// Fail the test if any document other than those mounted earlier is written.
    async fn forbid_other_writes(server: &MockServer) {
        Mock::given(method("PUT"))
            .and(path_regex(r"^/es/breaches/_doc/.*"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn consistent_stores_report_nothing() {
        let server = MockServer::start().await;
        mount_refresh(&server).await;
        mount_index_state(&server, EMAIL, 2, &["1", "2"], &["1", "2"]).await;
        mount_index_state(&server, ADDRESS, 1, &["3"], &["3"]).await;
        forbid_other_writes(&server).await;

        let report = reconcile(&seeded_store(&server).await, true).await.unwrap();
        assert_eq!(report.checked, 2);
        assert!(report.divergent.is_empty());
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn detects_without_repairing() {
        let server = MockServer::start().await;
        mount_refresh(&server).await;
        mount_index_state(&server, EMAIL, 1, &["1", "2"], &["2"]).await;
        mount_index_state(&server, ADDRESS, 1, &["3"], &["3"]).await;
        forbid_other_writes(&server).await;

        let report = reconcile(&seeded_store(&server).await, false).await.unwrap();
        assert_eq!(
            report.divergent,
            vec![Divergence {
                query: EMAIL.into(),
                log_rows: 2,
                index_docs: 1,
                missing: vec![1],
                repaired: 0,
            }]
        );
    }

    #[tokio::test]
    async fn repair_reindexes_the_older_missing_row() {
        let server = MockServer::start().await;
        mount_refresh(&server).await;
        // the first run's index write failed, the second one landed
        mount_index_state(&server, EMAIL, 1, &["1", "2"], &["2"]).await;
        mount_index_state(&server, ADDRESS, 1, &["3"], &["3"]).await;
        Mock::given(method("PUT"))
            .and(path("/es/breaches/_doc/1"))
            .and(body_partial_json(json!({"query": EMAIL, "data": "[\"old\"]"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"_id": "1"})))
            .expect(1)
            .mount(&server)
            .await;
        forbid_other_writes(&server).await;

        let report = reconcile(&seeded_store(&server).await, true).await.unwrap();
        assert_eq!(report.divergent.len(), 1);
        assert_eq!(report.divergent[0].missing, vec![1]);
        assert_eq!(report.repaired(), 1);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn matching_counts_do_not_hide_a_missing_row() {
        let server = MockServer::start().await;
        mount_refresh(&server).await;
        // two documents, but one of them is not backed by a log row
        mount_index_state(&server, EMAIL, 2, &["1", "2"], &["2"]).await;
        mount_index_state(&server, ADDRESS, 1, &["3"], &["3"]).await;
        Mock::given(method("PUT"))
            .and(path("/es/breaches/_doc/1"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"_id": "1"})))
            .expect(1)
            .mount(&server)
            .await;
        forbid_other_writes(&server).await;

        let report = reconcile(&seeded_store(&server).await, true).await.unwrap();
        assert_eq!(report.divergent.len(), 1);
        assert_eq!(report.divergent[0].log_rows, report.divergent[0].index_docs);
        assert_eq!(report.repaired(), 1);
    }

    #[tokio::test]
    async fn surplus_documents_are_reported_only() {
        let server = MockServer::start().await;
        mount_refresh(&server).await;
        mount_index_state(&server, EMAIL, 5, &["1", "2"], &["1", "2"]).await;
        mount_index_state(&server, ADDRESS, 1, &["3"], &["3"]).await;
        forbid_other_writes(&server).await;

        let report = reconcile(&seeded_store(&server).await, true).await.unwrap();
        assert_eq!(report.divergent.len(), 1);
        assert_eq!(report.divergent[0].missing_from_index(), 0);
        assert_eq!(report.repaired(), 0);
    }

    #[tokio::test]
    async fn index_errors_are_per_identifier() {
        let server = MockServer::start().await;
        mount_refresh(&server).await;
        Mock::given(method("POST"))
            .and(path("/es/breaches/_count"))
            .and(body_json(json!({"query": {"term": {"query.raw": ADDRESS}}})))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        mount_index_state(&server, EMAIL, 2, &["1", "2"], &["1", "2"]).await;
        forbid_other_writes(&server).await;

        let report = reconcile(&seeded_store(&server).await, true).await.unwrap();
        assert_eq!(report.checked, 2);
        assert!(report.divergent.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, ADDRESS);
    }
}
