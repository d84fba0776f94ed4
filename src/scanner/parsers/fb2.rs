use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::{BookMeta, attr, local_name, strip_meta, under};
use crate::scanner::content_type;

/// Parse an FB2 document.
///
/// Broken XML after the root element yields whatever was read up to that
/// point. The cover comes from the `<binary>` named by `<coverpage>`.
pub fn parse(data: &[u8]) -> Result<BookMeta, Fb2Error> {
    let mut meta = BookMeta::default();
    let mut xml = Reader::from_reader(data);
    xml.config_mut().check_end_names = false;
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut annotation = String::new();
    let mut seen_root = false;

    let mut first_name = String::new();
    let mut last_name = String::new();
    let mut cover_ref: Option<String> = None;
    let mut binary: Option<(String, String)> = None;

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Err(_) if seen_root => break,
            Err(e) => return Err(Fb2Error::Xml(e)),

            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                if path.is_empty() && local == "fictionbook" {
                    seen_root = true;
                }
                read_attributes(&local, e, &path, &mut meta, &mut cover_ref);
                if local == "binary" {
                    binary = Some((
                        attr(e, "id").unwrap_or_default(),
                        attr(e, "content-type").unwrap_or_default(),
                    ));
                }
                path.push(local);
                text.clear();
            }

            Ok(Event::Empty(ref e)) => {
                let local = local_name(e.name().as_ref());
                read_attributes(&local, e, &path, &mut meta, &mut cover_ref);
            }

            Ok(Event::End(_)) => {
                let tag = path.pop().unwrap_or_default();
                let value = text.trim().to_string();
                text.clear();

                match tag.as_str() {
                    "book-title" if under(&path, &["title-info"]) => meta.title = strip_meta(&value),
                    "genre" if under(&path, &["title-info"]) && !value.is_empty() => {
                        meta.tags.push(value.to_lowercase());
                    }
                    "lang" if under(&path, &["title-info"]) => meta.language = strip_meta(&value),
                    "first-name" if under(&path, &["title-info", "author"]) => first_name = value,
                    "last-name" if under(&path, &["title-info", "author"]) => last_name = value,
                    "author" if under(&path, &["title-info"]) => {
                        let full = format!("{} {}", strip_meta(&first_name), strip_meta(&last_name));
                        let full = full.trim();
                        if !full.is_empty() {
                            meta.authors.push(full.to_string());
                        }
                        first_name.clear();
                        last_name.clear();
                    }
                    "p" if in_annotation(&path) => annotation.push('\n'),
                    "annotation" if under(&path, &["title-info"]) => {
                        meta.summary = paragraphs(&annotation);
                    }
                    "id" if under(&path, &["document-info"]) && meta.id.is_none() => {
                        meta.id = Some(value).filter(|id| !id.is_empty());
                    }
                    "binary" => {
                        if let Some((id, mime)) = binary.take() {
                            if cover_ref.as_deref() == Some(id.to_lowercase().as_str()) {
                                decode_cover(&value, &mime, &mut meta);
                            }
                        }
                    }
                    _ => {}
                }
            }

            Ok(Event::Text(ref e)) => {
                if let Ok(t) = e.decode() {
                    if in_annotation(&path) {
                        annotation.push_str(&t);
                    }
                    text.push_str(&t);
                }
            }

            Ok(Event::GeneralRef(ref e)) => {
                let resolved = match e.resolve_char_ref() {
                    Ok(Some(c)) => Some(c.to_string()),
                    _ => e
                        .decode()
                        .ok()
                        .and_then(|name| quick_xml::escape::resolve_predefined_entity(&name))
                        .map(str::to_string),
                };
                if let Some(s) = resolved {
                    if in_annotation(&path) {
                        annotation.push_str(&s);
                    }
                    text.push_str(&s);
                }
            }

            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(Fb2Error::NotFb2);
    }
    Ok(meta)
}

/// Attributes of `<sequence>` and of the cover `<image>`; `path` is the
/// element's parent chain.
fn read_attributes(
    local: &str,
    e: &BytesStart<'_>,
    path: &[String],
    meta: &mut BookMeta,
    cover_ref: &mut Option<String>,
) {
    match local {
        "sequence" if under(path, &["title-info"]) => {
            if let Some(name) = attr(e, "name") {
                meta.series_title = Some(strip_meta(&name));
            }
            meta.volume = attr(e, "number").and_then(|n| n.trim().parse().ok());
        }
        "image" if under(path, &["coverpage"]) => {
            *cover_ref = attr(e, "href")
                .map(|h| h.trim_start_matches('#').to_lowercase())
                .filter(|h| !h.is_empty());
        }
        _ => {}
    }
}

fn decode_cover(encoded: &str, declared: &str, meta: &mut BookMeta) {
    let clean: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let Ok(data) = STANDARD.decode(clean) else {
        return;
    };
    let sniffed = content_type::sniff_bytes(&data);
    meta.cover_type = if content_type::is_image(sniffed) {
        content_type::mime(sniffed).to_string()
    } else if declared.starts_with("image/") {
        declared.to_string()
    } else {
        "image/jpeg".to_string()
    };
    meta.cover_data = Some(data);
}

fn in_annotation(path: &[String]) -> bool {
    path.windows(2).any(|w| w[0] == "title-info" && w[1] == "annotation")
}

/// Non-empty lines, trimmed, one per paragraph.
fn paragraphs(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, thiserror::Error)]
pub enum Fb2Error {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("root element is not FictionBook")]
    NotFb2,
}
