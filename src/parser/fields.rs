use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::{Field, Record};
use crate::error::ExtractError;

static NAME_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static GENRES_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.genres").unwrap());
static TYPE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.type").unwrap());
static ORIGIN_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.origin").unwrap());
static RATING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.film-rating-average").unwrap());
static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"link[rel="canonical"]"#).unwrap());
static PLOT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.plot-full").unwrap());

/// Used when the page carries no type marker.
pub const DEFAULT_TYPE: &str = "Film";

/// Fill every optional field in schema order, stopping at the first failure.
/// Fields assigned before the failing one stay on the record.
pub fn fill_optional(doc: &Html, record: &mut Record) -> Result<(), ExtractError> {
    record.genres = Some(genres(doc)?);
    record.kind = Some(kind(doc));

    let (origin, rest) = origin(doc)?;
    record.origin = Some(origin);
    let (year, length) = year_and_length(&rest)?;
    record.year = Some(year);
    record.length = Some(length);

    record.rating = Some(rating(doc)?);
    record.link = Some(link(doc)?);
    record.plot = Some(plot(doc)?);
    Ok(())
}

pub fn name(doc: &Html) -> Result<String, ExtractError> {
    text_of(doc, &NAME_SEL)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(ExtractError::RequiredFieldMissing(Field::Name))
}

pub fn genres(doc: &Html) -> Result<String, ExtractError> {
    text_of(doc, &GENRES_SEL).ok_or(ExtractError::OptionalFieldMissing(Field::Genres))
}

/// "(seriál)" → "Seriál"; no marker → [`DEFAULT_TYPE`].
pub fn kind(doc: &Html) -> String {
    match text_of(doc, &TYPE_SEL) {
        Some(raw) => title_case(raw.replace(['(', ')'], "").trim()),
        None => DEFAULT_TYPE.to_string(),
    }
}

/// Origin (first line) and the unparsed remainder (second line).
pub fn origin(doc: &Html) -> Result<(String, String), ExtractError> {
    let text = text_of(doc, &ORIGIN_SEL).ok_or(ExtractError::OptionalFieldMissing(Field::Origin))?;
    let mut lines = text.split('\n');
    let origin = lines.next().unwrap_or_default().trim().to_string();
    let rest = lines.next().ok_or_else(|| ExtractError::MalformedField {
        field: Field::Origin,
        value: text.clone(),
    })?;
    Ok((origin, rest.to_string()))
}

/// "1994, 142 min" → (1994, "142 min"). Exactly one comma is accepted.
pub fn year_and_length(segment: &str) -> Result<(i32, String), ExtractError> {
    let segment = segment.trim();
    let mut parts = segment.split(',');
    let (year, length) = match (parts.next(), parts.next(), parts.next()) {
        (Some(y), Some(l), None) => (y.trim(), l.trim()),
        _ => {
            return Err(ExtractError::MalformedField {
                field: Field::Year,
                value: segment.to_string(),
            })
        }
    };
    let year = year.parse::<i32>().map_err(|_| ExtractError::MalformedField {
        field: Field::Year,
        value: year.to_string(),
    })?;
    Ok((year, length.to_string()))
}

/// Percentage rating in [0, 100].
pub fn rating(doc: &Html) -> Result<f64, ExtractError> {
    let text = text_of(doc, &RATING_SEL).ok_or(ExtractError::OptionalFieldMissing(Field::Rating))?;
    let trimmed = text.trim();
    let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    let malformed = || ExtractError::MalformedField {
        field: Field::Rating,
        value: trimmed.to_string(),
    };
    let value = number.parse::<f64>().map_err(|_| malformed())?;
    if !(0.0..=100.0).contains(&value) {
        return Err(malformed());
    }
    Ok(value)
}

pub fn link(doc: &Html) -> Result<String, ExtractError> {
    doc.select(&LINK_SEL)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(str::to_string)
        .ok_or(ExtractError::OptionalFieldMissing(Field::Link))
}

pub fn plot(doc: &Html) -> Result<String, ExtractError> {
    let text = text_of(doc, &PLOT_SEL).ok_or(ExtractError::OptionalFieldMissing(Field::Plot))?;
    Ok(text
        .trim()
        .replace('\t', "")
        .replace("\n\n", "")
        .trim()
        .to_string())
}

/// Concatenated text of the first match.
fn text_of(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel).next().map(|el| el.text().collect())
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}
