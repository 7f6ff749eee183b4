//! Dual-write finding store: relational log plus search index.
//!
//! The two writes are independent and not transactional. A failure in one
//! store is logged and recorded in the [`PersistReport`]; it neither stops the
//! other write nor rolls back one that already happened.

use breachwatch_index::SearchIndex;
use breachwatch_shared::{
    AppConfig, BreachWatchError, Finding, PersistReport, Result, StoreCredentials, StoreKind,
};
use breachwatch_storage::FindingLog;
use tracing::{debug, error, instrument};

/// Both finding stores, written one after the other.
pub struct FindingStore {
    log: FindingLog,
    index: SearchIndex,
}

impl FindingStore {
    pub fn new(log: FindingLog, index: SearchIndex) -> Self {
        Self { log, index }
    }

    /// Open the log and build the index client described by `config`.
    pub async fn connect(config: &AppConfig, credentials: &StoreCredentials) -> Result<Self> {
        let log = FindingLog::connect(&config.database, credentials.db_auth_token.as_deref()).await?;
        let index = SearchIndex::new(&config.search, credentials.search_api_key.as_deref())?;
        Ok(Self::new(log, index))
    }

    /// Create the table and the index if they are missing. Idempotent.
    pub async fn ensure_ready(&self) -> Result<()> {
        self.log.ensure_schema().await?;
        let created = self.index.ensure_index().await?;
        debug!(index_created = created, "finding stores ready");
        Ok(())
    }

    /// Write `finding` to the log, then to the index.
    ///
    /// The index document takes the new row's id when the log write succeeded.
    /// Never fails as a whole; per-store errors are in the returned report.
    #[instrument(skip_all, fields(query = %finding.query))]
    pub async fn persist(&self, finding: &Finding) -> PersistReport {
        let mut report = PersistReport::default();

        match self
            .log
            .insert_finding(&finding.query, &finding.serialized_data())
            .await
        {
            Ok(row_id) => report.row_id = Some(row_id),
            Err(e) => record_failure(&mut report, StoreKind::Log, &finding.query, e),
        }

        match self.index.index_finding(finding, report.row_id).await {
            Ok(doc_id) => report.doc_id = Some(doc_id),
            Err(e) => record_failure(&mut report, StoreKind::Index, &finding.query, e),
        }

        report
    }

    pub fn log(&self) -> &FindingLog {
        &self.log
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }
}

fn record_failure(report: &mut PersistReport, store: StoreKind, query: &str, e: BreachWatchError) {
    error!(%store, query, error = %e, "failed to persist finding");
    report.errors.push((store, e.to_string()));
}
