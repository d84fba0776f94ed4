use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::{BookMeta, attr, local_name, strip_meta, under};

const OPF_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// Package document path named by `META-INF/container.xml`. A rootfile
/// declared as OPF wins over the first one listed.
pub fn parse_container_xml(data: &[u8]) -> Option<String> {
    let mut xml = Reader::from_reader(data);
    let mut buf = Vec::new();
    let mut rootfiles: Vec<(String, bool)> = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if local_name(e.name().as_ref()) == "rootfile" =>
            {
                if let Some(full_path) = attr(e, "full-path") {
                    let is_opf = attr(e, "media-type").as_deref() == Some(OPF_MEDIA_TYPE);
                    rootfiles.push((full_path, is_opf));
                }
            }
            _ => {}
        }
        buf.clear();
    }

    let pick = rootfiles.iter().position(|(_, is_opf)| *is_opf).unwrap_or(0);
    rootfiles.into_iter().nth(pick).map(|(path, _)| path)
}

/// Parse the OPF package document stored at `opf_path` inside the container.
pub fn parse_opf(data: &[u8], opf_path: &str) -> Result<BookMeta, EpubError> {
    let mut meta = BookMeta::default();
    let mut package = Package::default();
    let mut xml = Reader::from_reader(data);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Err(_) if package.seen => break,
            Err(e) => return Err(EpubError::Xml(e)),

            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                package.open(&local, e, &path, &mut meta);
                path.push(local);
                text.clear();
            }

            Ok(Event::Empty(ref e)) => {
                let local = local_name(e.name().as_ref());
                package.open(&local, e, &path, &mut meta);
            }

            Ok(Event::End(_)) => {
                let tag = path.pop().unwrap_or_default();
                let value = text.trim().to_string();
                text.clear();
                if under(&path, &["metadata"]) && !value.is_empty() {
                    package.close(&tag, value, &mut meta);
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

    if !package.seen {
        return Err(EpubError::NoPackage);
    }
    package.finish(&mut meta, opf_path);
    Ok(meta)
}

/// Package-level state gathered while reading, resolved once at the end.
#[derive(Default)]
struct Package {
    seen: bool,
    unique_identifier: Option<String>,
    /// `(element id, value)` of each `dc:identifier`.
    identifiers: Vec<(Option<String>, String)>,
    pending_identifier: Option<String>,
    /// `(role, name)` of each `dc:creator`.
    creators: Vec<(Option<String>, String)>,
    pending_role: Option<String>,
    manifest: Vec<ManifestItem>,
    cover_id: Option<String>,
}

struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: String,
}

impl Package {
    fn open(&mut self, local: &str, e: &BytesStart<'_>, path: &[String], meta: &mut BookMeta) {
        match local {
            "package" if path.is_empty() => {
                self.seen = true;
                self.unique_identifier = attr(e, "unique-identifier");
            }
            "identifier" => self.pending_identifier = attr(e, "id"),
            "creator" => self.pending_role = attr(e, "role"),
            "meta" => {
                let content = attr(e, "content").unwrap_or_default();
                match attr(e, "name").as_deref() {
                    Some("calibre:series") => meta.series_title = Some(strip_meta(&content)),
                    Some("calibre:series_index") => meta.volume = content.trim().parse().ok(),
                    Some("cover") if !content.is_empty() => self.cover_id = Some(content),
                    _ => {}
                }
            }
            "item" if under(path, &["manifest"]) => self.manifest.push(ManifestItem {
                id: attr(e, "id").unwrap_or_default(),
                href: attr(e, "href").unwrap_or_default(),
                media_type: attr(e, "media-type").unwrap_or_default(),
                properties: attr(e, "properties").unwrap_or_default(),
            }),
            _ => {}
        }
    }

    /// A non-empty `<metadata>` child closed with `value` as its text.
    fn close(&mut self, tag: &str, value: String, meta: &mut BookMeta) {
        match tag {
            "title" if meta.title.is_empty() => meta.title = strip_meta(&value),
            "creator" => self.creators.push((self.pending_role.take(), value)),
            "language" if meta.language.is_empty() => meta.language = strip_meta(&value),
            "subject" => {
                let subject = strip_meta(&value).to_lowercase();
                if !subject.is_empty() && !meta.tags.contains(&subject) {
                    meta.tags.push(subject);
                }
            }
            "description" if meta.summary.is_empty() => meta.summary = value,
            "identifier" => self.identifiers.push((self.pending_identifier.take(), value)),
            _ => {}
        }
    }

    fn finish(self, meta: &mut BookMeta, opf_path: &str) {
        let has_authors = self.creators.iter().any(|(role, _)| role.as_deref() == Some("aut"));
        meta.authors = self
            .creators
            .iter()
            .filter(|(role, _)| !has_authors || role.as_deref() == Some("aut"))
            .map(|(_, name)| name.clone())
            .collect();

        let declared = self
            .identifiers
            .iter()
            .find(|(id, _)| id.is_some() && *id == self.unique_identifier);
        meta.id = declared
            .or_else(|| self.identifiers.first())
            .map(|(_, value)| normalize_identifier(value));

        meta.cover_entry = self.cover_href().map(|href| entry_path(opf_path, href));
    }

    /// `properties="cover-image"`, then `<meta name="cover">`, then an item
    /// whose id is `cover`.
    fn cover_href(&self) -> Option<&str> {
        let images = || {
            self.manifest
                .iter()
                .filter(|item| item.media_type.starts_with("image/"))
        };
        images()
            .find(|item| item.properties.split_whitespace().any(|p| p == "cover-image"))
            .or_else(|| {
                let id = self.cover_id.as_deref()?;
                images().find(|item| item.id == id)
            })
            .or_else(|| images().find(|item| item.id.eq_ignore_ascii_case("cover")))
            .map(|item| item.href.as_str())
    }
}

/// `urn:isbn:` and `urn:uuid:` prefixes carry no identity of their own.
fn normalize_identifier(value: &str) -> String {
    let lowered = value.to_lowercase();
    ["urn:isbn:", "urn:uuid:", "isbn:"]
        .iter()
        .find(|prefix| lowered.starts_with(*prefix))
        .map_or(value, |prefix| &value[prefix.len()..])
        .trim()
        .to_string()
}

/// Container entry name of `href`, relative to the OPF's own directory.
fn entry_path(opf_path: &str, href: &str) -> String {
    if let Some(absolute) = href.strip_prefix('/') {
        return absolute.to_string();
    }
    match opf_path.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/{href}"),
        None => href.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EpubError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("no package element in OPF")]
    NoPackage,
}
