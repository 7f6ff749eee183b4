//! Daily run: identifiers → lookup → persist → annotate.
//!
//! Identifiers are processed one at a time, in input order. Each stage
//! reports an outcome value instead of an error, so a failure for one
//! identifier (or in one store) never stops the run.

use std::time::{Duration, Instant};

use breachwatch_inventory::AssetAnnotator;
use breachwatch_lookup::BreachLookup;
use breachwatch_shared::{
    AnnotationOutcome, AppConfig, Credentials, IdentifierKind, LookupOutcome, Result, RetryPolicy,
};
use tracing::{debug, info, instrument, warn};

use crate::store::FindingStore;

/// Summary of one pipeline run.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    /// Identifiers looked up.
    pub checked: usize,
    /// Blank identifiers that were skipped.
    pub skipped: usize,
    /// Lookups that returned a finding.
    pub found: usize,
    /// Lookups that returned nothing.
    pub clean: usize,
    /// Identifiers whose lookup exhausted its retries; their status is unknown.
    pub lookup_failures: Vec<String>,
    /// Rows appended to the relational log.
    pub rows_written: usize,
    /// Documents added to the search index.
    pub documents_written: usize,
    /// Identifiers where at least one store rejected the finding.
    pub persist_failures: Vec<String>,
    /// Inventory records flagged, as `(address, record id)`.
    pub annotations_updated: Vec<(String, u64)>,
    /// Addresses with a finding but no inventory record.
    pub annotations_not_found: Vec<String>,
    /// Addresses whose annotation exhausted its retries.
    pub annotation_failures: Vec<String>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl RunReport {
    /// True when every external call eventually succeeded.
    pub fn is_clean(&self) -> bool {
        self.lookup_failures.is_empty()
            && self.persist_failures.is_empty()
            && self.annotation_failures.is_empty()
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called before an identifier is looked up.
    fn identifier_started(&self, identifier: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn identifier_started(&self, _identifier: &str, _current: usize, _total: usize) {}
    fn done(&self, _report: &RunReport) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Everything one run needs: lookup client, finding stores, annotator.
///
/// Connections live as long as the pipeline; drop it to release them.
pub struct Pipeline {
    lookup: BreachLookup,
    store: FindingStore,
    annotator: AssetAnnotator,
}

impl Pipeline {
    pub fn new(lookup: BreachLookup, store: FindingStore, annotator: AssetAnnotator) -> Self {
        Self {
            lookup,
            store,
            annotator,
        }
    }

    /// Open the database and build the HTTP clients described by `config`.
    pub async fn connect(config: &AppConfig, credentials: &Credentials) -> Result<Self> {
        let retry = RetryPolicy::from(&config.retry);

        let store = FindingStore::connect(config, &credentials.store).await?;
        let lookup = BreachLookup::new(&config.breach_source, &credentials.breach_api_key, retry)?;
        let annotator =
            AssetAnnotator::new(&config.inventory, &credentials.inventory_token, retry)?;

        Ok(Self::new(lookup, store, annotator))
    }

    /// Create the table and index if missing.
    pub async fn bootstrap(&self) -> Result<()> {
        self.store.ensure_ready().await
    }

    pub fn store(&self) -> &FindingStore {
        &self.store
    }

    /// Bootstrap the stores, then process `identifiers` in order.
    ///
    /// Only a bootstrap failure is returned as an error; everything after that
    /// lands in the [`RunReport`].
    #[instrument(skip_all, fields(identifiers = identifiers.len()))]
    pub async fn run<S: AsRef<str>>(
        &self,
        identifiers: &[S],
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let start = Instant::now();
        self.bootstrap().await?;

        let mut report = RunReport::default();
        let total = identifiers.len();
        info!(total, "starting breach check");

        for (i, identifier) in identifiers.iter().enumerate() {
            let identifier = identifier.as_ref();
            progress.identifier_started(identifier, i + 1, total);
            self.process(identifier, &mut report).await;
        }

        report.elapsed = start.elapsed();
        info!(
            checked = report.checked,
            found = report.found,
            lookup_failures = report.lookup_failures.len(),
            annotated = report.annotations_updated.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "breach check complete"
        );
        progress.done(&report);
        Ok(report)
    }

    /// Lookup, then persist and (for network addresses) annotate.
    async fn process(&self, identifier: &str, report: &mut RunReport) {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            warn!("skipping blank identifier");
            report.skipped += 1;
            return;
        }
        report.checked += 1;
        let kind = IdentifierKind::classify(identifier);
        debug!(identifier, %kind, "checking identifier");

        let finding = match self.lookup.check(identifier).await {
            LookupOutcome::Found(finding) => finding,
            LookupOutcome::Clean => {
                report.clean += 1;
                return;
            }
            LookupOutcome::Failed { .. } => {
                report.lookup_failures.push(identifier.to_string());
                return;
            }
        };
        report.found += 1;

        let persisted = self.store.persist(&finding).await;
        if persisted.row_id.is_some() {
            report.rows_written += 1;
        }
        if persisted.doc_id.is_some() {
            report.documents_written += 1;
        }
        if !persisted.is_complete() {
            report.persist_failures.push(identifier.to_string());
        }

        if !kind.is_network_address() {
            return;
        }
        match self.annotator.annotate(identifier).await {
            AnnotationOutcome::Updated { record_id } => report
                .annotations_updated
                .push((identifier.to_string(), record_id)),
            AnnotationOutcome::NotFound => report.annotations_not_found.push(identifier.to_string()),
            AnnotationOutcome::Failed { .. } => {
                report.annotation_failures.push(identifier.to_string())
            }
        }
    }
}

/// Connect, run once, and release every connection before returning.
pub async fn run_daily<S: AsRef<str>>(
    config: &AppConfig,
    credentials: &Credentials,
    identifiers: &[S],
    progress: &dyn ProgressReporter,
) -> Result<RunReport> {
    let pipeline = Pipeline::connect(config, credentials).await?;
    pipeline.run(identifiers, progress).await
}

/// Parse an identifier list: one per line, blank lines and `#` comments ignored.
pub fn parse_identifier_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}
