pub mod comicinfo;
pub mod epub;
pub mod fb2;
pub mod sidecar;

/// Metadata extracted from one item, normalized across formats.
#[derive(Debug, Clone, Default)]
pub struct BookMeta {
    /// Identifier declared by the metadata itself (GTIN, ISBN, uuid...).
    pub id: Option<String>,
    pub title: String,
    pub alt_title: String,
    pub series_title: Option<String>,
    pub authors: Vec<String>,
    pub tags: Vec<String>,
    pub summary: String,
    pub language: String,
    pub volume: Option<f64>,
    pub chapter: Option<f64>,
    /// Raw cover image bytes embedded in the metadata (FB2).
    pub cover_data: Option<Vec<u8>>,
    pub cover_type: String,
    /// Container entry the metadata names as cover (EPUB manifest).
    pub cover_entry: Option<String>,
}

impl BookMeta {
    /// Nothing usable was found.
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.authors.is_empty()
            && self.summary.is_empty()
            && self.tags.is_empty()
            && self.id.is_none()
    }
}

/// Strip leading/trailing whitespace and common punctuation from metadata strings.
pub fn strip_meta(s: &str) -> String {
    s.trim_matches(|c: char| {
        c.is_whitespace()
            || matches!(
                c,
                '»' | '«' | '\'' | '"' | '&' | '-' | '.' | '#' | '\\' | '`' | ';'
            )
    })
    .to_string()
}

/// Split a `,`/`;` separated list, dropping blanks and duplicates.
pub fn split_list(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in s.split([',', ';']) {
        let part = part.trim();
        if !part.is_empty() && !out.iter().any(|p| p.eq_ignore_ascii_case(part)) {
            out.push(part.to_string());
        }
    }
    out
}

/// Local name of an XML tag, namespace prefix stripped and lower-cased.
pub(crate) fn local_name(raw: &[u8]) -> String {
    let s = std::str::from_utf8(raw).unwrap_or("");
    match s.rfind(':') {
        Some(i) => s[i + 1..].to_lowercase(),
        None => s.to_lowercase(),
    }
}

/// Unescaped value of the attribute whose local name is `name`.
pub(crate) fn attr(e: &quick_xml::events::BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| local_name(a.key.as_ref()) == name)
        .map(|a| a.normalized_value(quick_xml::XmlVersion::Implicit1_0).unwrap_or_default().to_string())
}

/// Whether the innermost open elements are exactly `parents`.
pub(crate) fn under(path: &[String], parents: &[&str]) -> bool {
    path.len() >= parents.len()
        && path
            .iter()
            .rev()
            .map(String::as_str)
            .zip(parents.iter().rev())
            .all(|(open, want)| open == *want)
}
