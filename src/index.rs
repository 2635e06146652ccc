use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::error::IndexError;

static WATCHLIST_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.watchlist-table").unwrap());
static H3_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h3").unwrap());
static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

/// A locally saved watchlist page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDocument {
    /// File name, used in diagnostics.
    pub source_name: String,
    pub body: String,
}

impl IndexDocument {
    pub fn new(source_name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            body: body.into(),
        }
    }
}

/// Read every `*.html` file in `dir`. Identical bodies are kept once.
pub fn load_index_documents(dir: &Path) -> Result<Vec<IndexDocument>, IndexError> {
    let io_err = |source| IndexError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "html"))
        .collect();
    paths.sort();

    let mut seen = HashSet::new();
    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        info!("Reading = {}", path.display());
        let body = std::fs::read_to_string(&path).map_err(|source| IndexError::Io {
            path: path.clone(),
            source,
        })?;
        if !seen.insert(body.clone()) {
            debug!(path = %path.display(), "duplicate index document skipped");
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        docs.push(IndexDocument::new(name, body));
    }

    if docs.is_empty() {
        return Err(IndexError::Empty(dir.to_path_buf()));
    }
    Ok(docs)
}

/// Raw `href`s of the watchlist rows, in document order.
///
/// Only the first `div.watchlist-table` is read. Text and comment children
/// are skipped; an element row without `h3 a[href]` is an error, as is a
/// page without the container.
pub fn extract_references(doc: &IndexDocument) -> Result<Vec<String>, IndexError> {
    let html = Html::parse_document(&doc.body);
    let table = html
        .select(&WATCHLIST_SEL)
        .next()
        .ok_or_else(|| IndexError::MissingContainer {
            source_name: doc.source_name.clone(),
        })?;

    let mut refs = Vec::new();
    for (row_idx, row) in table.children().filter_map(ElementRef::wrap).enumerate() {
        let href = row
            .select(&H3_SEL)
            .next()
            .and_then(|h3| h3.select(&ANCHOR_SEL).next())
            .and_then(|a| a.value().attr("href"))
            .ok_or_else(|| IndexError::MissingReference {
                source_name: doc.source_name.clone(),
                row: row_idx + 1,
            })?;
        refs.push(href.to_string());
    }

    debug!(source = %doc.source_name, count = refs.len(), "references extracted");
    Ok(refs)
}
