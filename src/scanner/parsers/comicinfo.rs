use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::{BookMeta, local_name, split_list, strip_meta};

/// Parse a `ComicInfo.xml` document.
///
/// Unknown elements are ignored. The GTIN, when present, becomes the
/// explicit identifier of the archive.
pub fn parse(data: &[u8]) -> Result<BookMeta, ComicInfoError> {
    let mut meta = BookMeta::default();
    let mut xml = Reader::from_reader(data);
    xml.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut seen_root = false;

    let mut series = String::new();
    let mut creators: Vec<String> = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Err(e) => return Err(ComicInfoError::Xml(e)),

            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                if path.is_empty() && local == "comicinfo" {
                    seen_root = true;
                }
                path.push(local);
                text.clear();
            }

            Ok(Event::End(_)) => {
                let tag = path.pop().unwrap_or_default();
                let value = text.trim().to_string();
                text.clear();
                if path.len() != 1 || value.is_empty() {
                    continue;
                }
                match tag.as_str() {
                    "title" => meta.title = strip_meta(&value),
                    "series" => series = value,
                    "localizedseries" => meta.alt_title = value,
                    "number" => meta.chapter = value.parse().ok(),
                    "volume" => meta.volume = value.parse().ok(),
                    "summary" => meta.summary = value,
                    "writer" | "penciller" | "inker" | "colorist" | "letterer" | "coverartist" => {
                        for name in split_list(&value) {
                            if !creators.contains(&name) {
                                creators.push(name);
                            }
                        }
                    }
                    "genre" | "tags" => {
                        for tag in split_list(&value) {
                            meta.tags.push(tag.to_lowercase());
                        }
                    }
                    "languageiso" => meta.language = value,
                    "gtin" => meta.id = Some(value),
                    _ => {}
                }
            }

            Ok(Event::Text(ref e)) => {
                if let Ok(t) = e.decode() {
                    text.push_str(&t);
                }
            }

            Ok(Event::GeneralRef(ref e)) => {
                if let Ok(Some(c)) = e.resolve_char_ref() {
                    text.push(c);
                } else if let Ok(name) = e.decode() {
                    if let Some(resolved) = quick_xml::escape::resolve_predefined_entity(&name) {
                        text.push_str(resolved);
                    }
                }
            }

            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(ComicInfoError::NotComicInfo);
    }

    if !series.is_empty() {
        if meta.title.is_empty() {
            meta.title = strip_meta(&series);
        }
        meta.series_title = Some(series);
    }
    meta.authors = creators;
    meta.tags.dedup();

    Ok(meta)
}

#[derive(Debug, thiserror::Error)]
pub enum ComicInfoError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("root element is not ComicInfo")]
    NotComicInfo,
}
