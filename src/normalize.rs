use std::collections::BTreeSet;

/// Origin prepended to relative references.
pub const DEFAULT_ORIGIN: &str = "https://www.csfd.cz";

const ABSOLUTE_MARKER: &str = "https:";

/// Make one raw reference absolute. References already carrying the
/// `https:` marker are returned unchanged.
pub fn normalize(raw: &str, origin: &str) -> String {
    if raw.contains(ABSOLUTE_MARKER) {
        raw.to_string()
    } else {
        format!("{}{}", origin, raw)
    }
}

/// Normalize and dedup by exact string equality.
pub fn normalize_all<I, S>(refs: I, origin: &str) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    refs.into_iter()
        .map(|r| normalize(r.as_ref(), origin))
        .collect()
}
