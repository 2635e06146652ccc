pub mod fields;

use std::fmt;

use scraper::Html;
use serde::Serialize;
use tracing::warn;

use crate::error::{ExtractError, ExtractionFailure};

/// Schema fields, in output column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Genres,
    Type,
    Origin,
    Year,
    Length,
    Rating,
    Link,
    Plot,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Name,
        Field::Genres,
        Field::Type,
        Field::Origin,
        Field::Year,
        Field::Length,
        Field::Rating,
        Field::Link,
        Field::Plot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Genres => "genres",
            Field::Type => "type",
            Field::Origin => "origin",
            Field::Year => "year",
            Field::Length => "length",
            Field::Rating => "rating",
            Field::Link => "link",
            Field::Plot => "plot",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One film/series detail page. Only `name` is guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub name: String,
    pub genres: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub origin: Option<String>,
    pub year: Option<i32>,
    pub length: Option<String>,
    pub rating: Option<f64>,
    pub link: Option<String>,
    pub plot: Option<String>,
}

impl Record {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            genres: None,
            kind: None,
            origin: None,
            year: None,
            length: None,
            rating: None,
            link: None,
            plot: None,
        }
    }

    /// Number of schema fields present, `name` included.
    pub fn populated(&self) -> usize {
        1 + [
            self.genres.is_some(),
            self.kind.is_some(),
            self.origin.is_some(),
            self.year.is_some(),
            self.length.is_some(),
            self.rating.is_some(),
            self.link.is_some(),
            self.plot.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// A usable record plus the diagnostic that cut its optional fields short.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub record: Record,
    pub failure: Option<ExtractionFailure>,
}

/// Parse one detail page into a [`Record`].
///
/// `Err` only when no record can exist: a blank body or a missing `h1`.
/// Optional fields are filled in order and stop at the first one that
/// fails; everything filled before it is kept and the failure is returned
/// alongside the record.
pub fn extract_record(html: &str) -> Result<Extraction, ExtractionFailure> {
    // html5ever recovers from any malformed input, so only an empty
    // body leaves nothing to build a tree from.
    if html.trim().is_empty() {
        return Err(ExtractionFailure::new(None, ExtractError::Parse));
    }
    let doc = Html::parse_document(html);

    let name = fields::name(&doc).map_err(|reason| ExtractionFailure::new(None, reason))?;
    let mut record = Record::named(name);

    let failure = match fields::fill_optional(&doc, &mut record) {
        Ok(()) => None,
        Err(reason) => {
            warn!(name = %record.name, field = ?reason.field(), "{}", reason);
            Some(ExtractionFailure::new(Some(record.name.clone()), reason))
        }
    };

    Ok(Extraction { record, failure })
}

// ── Tests ──
