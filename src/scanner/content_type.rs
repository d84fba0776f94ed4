use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Serialize;

const SNIFF_LEN: usize = 4096;
const EPUB_MIMETYPE: &[u8] = b"application/epub+zip";

/// Media type recognised from the leading bytes of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Zip,
    Rar,
    SevenZip,
    Epub,
    Fb2,
    Pdf,
    DjVu,
    Jpeg,
    Png,
    Gif,
    Webp,
    Avif,
    Bmp,
    Unknown,
}

/// Closed set of importable file kinds. One extractor per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BookType {
    Archive,
    Epub,
    Fb2,
    Pdf,
    DjVu,
    Unknown,
}

impl From<MediaType> for BookType {
    fn from(mt: MediaType) -> Self {
        match mt {
            MediaType::Zip | MediaType::Rar | MediaType::SevenZip => BookType::Archive,
            MediaType::Epub => BookType::Epub,
            MediaType::Fb2 => BookType::Fb2,
            MediaType::Pdf => BookType::Pdf,
            MediaType::DjVu => BookType::DjVu,
            _ => BookType::Unknown,
        }
    }
}

impl BookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookType::Archive => "archive",
            BookType::Epub => "epub",
            BookType::Fb2 => "fb2",
            BookType::Pdf => "pdf",
            BookType::DjVu => "djvu",
            BookType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "archive" => BookType::Archive,
            "epub" => BookType::Epub,
            "fb2" => BookType::Fb2,
            "pdf" => BookType::Pdf,
            "djvu" => BookType::DjVu,
            _ => BookType::Unknown,
        }
    }

    /// Text-first formats. Everything but a plain image archive.
    pub fn is_book(&self) -> bool {
        !matches!(self, BookType::Archive | BookType::Unknown)
    }
}

/// Classify a file by its content. Never fails: unreadable files are `Unknown`.
pub fn sniff(path: &Path) -> MediaType {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    let read = File::open(path).and_then(|f| f.take(SNIFF_LEN as u64).read_to_end(&mut head));
    if read.is_err() {
        return MediaType::Unknown;
    }
    let media_type = sniff_bytes(&head);
    if media_type == MediaType::Zip && zip_has_epub_container(path) {
        return MediaType::Epub;
    }
    media_type
}

/// Classify a byte prefix.
pub fn sniff_bytes(data: &[u8]) -> MediaType {
    if data.starts_with(b"PK\x03\x04") {
        if first_entry_is_epub_mimetype(data) {
            return MediaType::Epub;
        }
        return MediaType::Zip;
    }
    if data.starts_with(b"PK\x05\x06") {
        return MediaType::Zip;
    }
    if data.starts_with(b"Rar!\x1A\x07") {
        return MediaType::Rar;
    }
    if data.starts_with(b"7z\xBC\xAF\x27\x1C") {
        return MediaType::SevenZip;
    }
    if find(&data[..data.len().min(1024)], b"%PDF-").is_some() {
        return MediaType::Pdf;
    }
    if data.starts_with(b"AT&TFORM")
        && data.len() >= 16
        && matches!(&data[12..16], b"DJVU" | b"DJVM" | b"DJVI")
    {
        return MediaType::DjVu;
    }
    if data.starts_with(b"\xFF\xD8\xFF") {
        return MediaType::Jpeg;
    }
    if data.starts_with(b"\x89PNG\r\n\x1A\n") {
        return MediaType::Png;
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return MediaType::Gif;
    }
    if data.starts_with(b"RIFF") && data.len() >= 12 && &data[8..12] == b"WEBP" {
        return MediaType::Webp;
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" && matches!(&data[8..12], b"avif" | b"avis") {
        return MediaType::Avif;
    }
    if data.starts_with(b"BM") && data.len() >= 14 {
        return MediaType::Bmp;
    }
    if find(data, b"<FictionBook").is_some() {
        return MediaType::Fb2;
    }
    MediaType::Unknown
}

/// First local header is a stored `mimetype` entry holding the EPUB media type.
fn first_entry_is_epub_mimetype(data: &[u8]) -> bool {
    if data.len() < 30 {
        return false;
    }
    let name_len = u16::from_le_bytes([data[26], data[27]]) as usize;
    let extra_len = u16::from_le_bytes([data[28], data[29]]) as usize;
    let name_end = 30 + name_len;
    let body = name_end + extra_len;
    data.get(30..name_end) == Some(b"mimetype".as_slice())
        && data
            .get(body..body + EPUB_MIMETYPE.len())
            .is_some_and(|b| b == EPUB_MIMETYPE)
}

/// ZIP archives whose `mimetype` entry is not stored first still count as
/// EPUB when they carry a container descriptor.
fn zip_has_epub_container(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let Ok(archive) = zip::ZipArchive::new(std::io::BufReader::new(file)) else {
        return false;
    };
    archive.file_names().any(|n| n == "META-INF/container.xml")
}

pub fn is_repackable_archive(mt: MediaType) -> bool {
    matches!(mt, MediaType::Zip | MediaType::Rar | MediaType::SevenZip)
}

pub fn is_image(mt: MediaType) -> bool {
    matches!(
        mt,
        MediaType::Jpeg
            | MediaType::Png
            | MediaType::Gif
            | MediaType::Webp
            | MediaType::Avif
            | MediaType::Bmp
    )
}

/// Image formats browsers commonly fail on; served re-encoded when asked.
pub fn needs_conversion(mt: MediaType) -> bool {
    matches!(mt, MediaType::Webp | MediaType::Avif)
}

pub fn mime(mt: MediaType) -> &'static str {
    match mt {
        MediaType::Jpeg => "image/jpeg",
        MediaType::Png => "image/png",
        MediaType::Gif => "image/gif",
        MediaType::Webp => "image/webp",
        MediaType::Avif => "image/avif",
        MediaType::Bmp => "image/bmp",
        MediaType::Zip => "application/zip",
        MediaType::Rar => "application/vnd.rar",
        MediaType::SevenZip => "application/x-7z-compressed",
        MediaType::Epub => "application/epub+zip",
        MediaType::Fb2 => "application/x-fictionbook+xml",
        MediaType::Pdf => "application/pdf",
        MediaType::DjVu => "image/vnd.djvu",
        MediaType::Unknown => "application/octet-stream",
    }
}

/// Whether an archive entry name looks like a page image.
pub fn is_image_name(name: &str) -> bool {
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return false,
    };
    matches!(
        ext.as_str(),
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "avif" | "bmp"
    )
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sniff_magic_numbers() {
        assert_eq!(sniff_bytes(b"Rar!\x1A\x07\x01\x00"), MediaType::Rar);
        assert_eq!(sniff_bytes(b"7z\xBC\xAF\x27\x1C\x00\x04"), MediaType::SevenZip);
        assert_eq!(sniff_bytes(b"%PDF-1.7\n"), MediaType::Pdf);
        assert_eq!(sniff_bytes(b"AT&TFORM\x00\x00\x10\x00DJVMDIRM"), MediaType::DjVu);
        assert_eq!(sniff_bytes(b"\xFF\xD8\xFF\xE0"), MediaType::Jpeg);
        assert_eq!(sniff_bytes(b"RIFF\x10\x00\x00\x00WEBPVP8 "), MediaType::Webp);
        assert_eq!(
            sniff_bytes(b"<?xml version=\"1.0\"?>\n<FictionBook xmlns=\"x\">"),
            MediaType::Fb2
        );
        assert_eq!(sniff_bytes(b"hello"), MediaType::Unknown);
        assert_eq!(sniff_bytes(b""), MediaType::Unknown);
    }

    #[test]
    fn test_book_type_mapping() {
        assert_eq!(BookType::from(MediaType::Rar), BookType::Archive);
        assert_eq!(BookType::from(MediaType::Epub), BookType::Epub);
        assert_eq!(BookType::from(MediaType::Png), BookType::Unknown);
        assert_eq!(BookType::parse(BookType::DjVu.as_str()), BookType::DjVu);
        assert!(!BookType::Archive.is_book());
        assert!(BookType::Pdf.is_book());
    }

    #[test]
    fn test_sniff_ignores_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("really_a_pdf.cbz");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"%PDF-1.4\n%...")
            .unwrap();
        assert_eq!(sniff(&path), MediaType::Pdf);
        assert_eq!(sniff(&dir.path().join("missing.cbz")), MediaType::Unknown);
    }

    #[test]
    fn test_sniff_epub_and_zip() {
        let dir = tempfile::tempdir().unwrap();

        let epub = dir.path().join("book.zip");
        let mut zw = zip::ZipWriter::new(std::fs::File::create(&epub).unwrap());
        let stored = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zw.start_file("mimetype", stored).unwrap();
        zw.write_all(b"application/epub+zip").unwrap();
        zw.start_file("META-INF/container.xml", stored).unwrap();
        zw.write_all(b"<container/>").unwrap();
        zw.finish().unwrap();
        assert_eq!(sniff(&epub), MediaType::Epub);

        let cbz = dir.path().join("comic.epub");
        let mut zw = zip::ZipWriter::new(std::fs::File::create(&cbz).unwrap());
        zw.start_file("01.jpg", zip::write::SimpleFileOptions::default())
            .unwrap();
        zw.write_all(b"\xFF\xD8\xFF").unwrap();
        zw.finish().unwrap();
        assert_eq!(sniff(&cbz), MediaType::Zip);
    }

    #[test]
    fn test_image_helpers() {
        assert!(is_image(MediaType::Webp));
        assert!(!is_image(MediaType::Zip));
        assert!(needs_conversion(MediaType::Avif));
        assert!(!needs_conversion(MediaType::Png));
        assert!(is_repackable_archive(MediaType::SevenZip));
        assert!(is_image_name("a/01.JPG"));
        assert!(!is_image_name("ComicInfo.xml"));
    }
}
