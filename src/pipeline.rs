use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::{ExtractionFailure, FetchError};
use crate::fetcher::{FetchStats, Fetcher, PageSource};
use crate::index::{extract_references, IndexDocument};
use crate::normalize::normalize_all;
use crate::parser::{extract_record, Record};

/// Everything a run produced: records plus the failures seen on the way.
#[derive(Debug, Default)]
pub struct Harvest {
    pub records: Vec<Record>,
    pub fetch_failures: Vec<(String, FetchError)>,
    pub extraction_failures: Vec<ExtractionFailure>,
    pub fetch_stats: FetchStats,
}

impl Harvest {
    /// Records that lost optional fields to a failure.
    pub fn partial_records(&self) -> usize {
        self.extraction_failures
            .iter()
            .filter(|f| !f.reason.is_fatal())
            .count()
    }

    /// Pages that yielded no record at all.
    pub fn dropped_records(&self) -> usize {
        self.extraction_failures
            .iter()
            .filter(|f| f.reason.is_fatal())
            .count()
    }
}

/// Normalized identifiers referenced by the index documents.
///
/// Any index error aborts: a page without its listing is not skipped.
pub fn collect_identifiers(docs: &[IndexDocument], origin: &str) -> Result<Vec<String>> {
    let mut refs = Vec::new();
    for doc in docs {
        let found = extract_references(doc)
            .with_context(|| format!("Failed to read listing from {}", doc.source_name))?;
        refs.extend(found);
    }
    let ids = normalize_all(refs, origin);
    info!("Found {} unique detail pages in {} index documents", ids.len(), docs.len());
    Ok(ids.into_iter().collect())
}

/// Index documents → identifiers → fetched pages → records.
pub async fn harvest<S: PageSource>(
    docs: &[IndexDocument],
    origin: &str,
    fetcher: &Fetcher<S>,
) -> Result<Harvest> {
    let ids = collect_identifiers(docs, origin)?;
    let outcomes = fetcher.fetch_all(ids).await;
    let fetch_stats = FetchStats::from_outcomes(&outcomes);

    let mut bodies = Vec::with_capacity(fetch_stats.ok);
    let mut fetch_failures = Vec::with_capacity(fetch_stats.errors);
    for outcome in outcomes {
        match outcome.result {
            Ok(body) => bodies.push(body),
            Err(e) => fetch_failures.push((outcome.url, e)),
        }
    }

    let mut harvest = extract_all(&bodies);
    harvest.fetch_failures = fetch_failures;
    harvest.fetch_stats = fetch_stats;

    info!(
        records = harvest.records.len(),
        partial = harvest.partial_records(),
        dropped = harvest.dropped_records(),
        fetch_errors = harvest.fetch_failures.len(),
        "harvest complete"
    );
    Ok(harvest)
}

/// Run the extractor over every body in parallel.
pub fn extract_all(bodies: &[String]) -> Harvest {
    let results: Vec<_> = bodies.par_iter().map(|b| extract_record(b)).collect();

    let mut harvest = Harvest::default();
    for result in results {
        match result {
            Ok(extraction) => {
                harvest.records.push(extraction.record);
                harvest.extraction_failures.extend(extraction.failure);
            }
            Err(failure) => {
                warn!("Record dropped: {}", failure);
                harvest.extraction_failures.push(failure);
            }
        }
    }
    harvest
}
