//! Volume and chapter ordinals recovered from human-written names.
//!
//! Both entry points are write-once: a value that is already settled
//! (`>= 0` or `SINGLE_OR_EXTRA`) comes back unchanged, so re-scans are
//! idempotent. Rules run in a fixed order and the first match wins.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::db::models::{SINGLE_OR_EXTRA, UNKNOWN, is_number_settled};

#[derive(Debug, Clone, Copy, Default)]
pub struct RecognitionOptions {
    pub skip_singles: bool,
    pub skip_extras: bool,
}

static COMIKET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\(c\d+\)\s*").unwrap());
static BARE_VOLUME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bv(\d+)").unwrap());
static SINGLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:single|oneshot|one[\s-]?shot|сингл|ваншот)\b").unwrap()
});
static EXTRA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:extras?|specials?|omake|bonus|экстра|спешл)\b|番外").unwrap()
});
static EXTRA_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+(extra|special|omake)").unwrap());
static CHAPTER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bch(?:apter)?\.?\s*\d+(?:\.\d+)?[a-z]*").unwrap()
});
static VOLUME_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:v|ver|vol|version|volume|season|s)[^a-z]?[0-9]+(?:-[0-9]+)?").unwrap()
});
static DASH_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)(\d+)\s*-\s*(\d+)").unwrap());

static ISSUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\s*(\d+(?:\.\d+)?)").unwrap());
static YEAR_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:19|20)\d{2})[-.](0[1-9]|1[0-2])\b").unwrap()
});
static VOLUME_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^.*(?:\b(?:volume|vol|v|tome|tom|tomo|band|bd|том|т)[\s._:]*(\d+(?:\.\d+)?)|(?:^|[^\d.])(\d+(?:\.\d+)?)\s*(?:巻|권))",
    )
    .unwrap()
});
static NUMBER_RANGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)\s*-\s*(\d+)").unwrap());

static CHAPTER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bch(?:apter)?\.?\s*(\d+)(\.\d+)?(\.?[a-z]+)?").unwrap()
});
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(\.\d+)?(\.?[a-z]+)?").unwrap());
static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(\.\d+)?(\.?[a-z]+)?").unwrap());

type Extractor = fn(&Captures<'_>) -> Option<f64>;

fn volume_rules() -> [(&'static Regex, Extractor); 4] {
    [
        (&*ISSUE, issue_number),
        (&*YEAR_MONTH, year_month),
        (&*VOLUME_KEYWORD, volume_keyword),
        (&*NUMBER_RANGE, range_start),
    ]
}

fn issue_number(caps: &Captures<'_>) -> Option<f64> {
    caps.get(1)?.as_str().parse().ok()
}

fn year_month(caps: &Captures<'_>) -> Option<f64> {
    let year: f64 = caps.get(1)?.as_str().parse().ok()?;
    let month: f64 = caps.get(2)?.as_str().parse().ok()?;
    Some(year * 100.0 + month)
}

fn volume_keyword(caps: &Captures<'_>) -> Option<f64> {
    caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()
}

fn range_start(caps: &Captures<'_>) -> Option<f64> {
    caps.get(1)?.as_str().parse().ok()
}

/// Lower-case, commas to dots, leading Comiket tag removed.
fn normalize(name: &str) -> String {
    let lowered = name.to_lowercase().replace(',', ".");
    COMIKET.replace(&lowered, "").into_owned()
}

fn skipped_by_keyword(name: &str, opts: RecognitionOptions) -> bool {
    (opts.skip_singles && SINGLE.is_match(name)) || (opts.skip_extras && EXTRA.is_match(name))
}

/// Volume ordinal of `name`, or `current` when that is already settled.
pub fn parse_volume_number(name: &str, current: f64, opts: RecognitionOptions) -> f64 {
    if is_number_settled(current) {
        return current;
    }

    let name = normalize(name);
    let name = BARE_VOLUME.replace_all(&name, "vol.$1").into_owned();
    if skipped_by_keyword(&name, opts) {
        return SINGLE_OR_EXTRA;
    }

    let cleaned = EXTRA_WHITESPACE.replace_all(&name, "$1");
    let cleaned = CHAPTER_TOKEN.replace_all(&cleaned, "");

    for (pattern, extract) in volume_rules() {
        if let Some(value) = pattern.captures(&cleaned).and_then(|c| extract(&c)) {
            return value;
        }
    }

    if SINGLE.is_match(&name) || EXTRA.is_match(&name) {
        return SINGLE_OR_EXTRA;
    }
    current
}

/// Chapter ordinal of `chapter_title`. `titles` are the owning archive's
/// title and alternate title, stripped before the leading-number rule.
pub fn parse_chapter_number(
    titles: &[&str],
    chapter_title: &str,
    current: f64,
    opts: RecognitionOptions,
) -> f64 {
    if is_number_settled(current) {
        return current;
    }

    let name = normalize(chapter_title);
    if skipped_by_keyword(&name, opts) {
        return SINGLE_OR_EXTRA;
    }

    let name = DASH_RANGE.replace_all(&name, "${1}v$2-$3");
    let name = EXTRA_WHITESPACE.replace_all(&name, "$1");
    let name = VOLUME_TOKEN.replace_all(&name, "").into_owned();

    if let Some(value) = CHAPTER_MARKER.captures(&name).and_then(|c| chapter_value(&c)) {
        return value;
    }

    let mut occurrences = NUMBER.captures_iter(&name);
    if let (Some(only), None) = (occurrences.next(), occurrences.next()) {
        if let Some(value) = chapter_value(&only) {
            return value;
        }
    }

    let mut stripped = name.clone();
    for title in titles {
        let title = title.trim().to_lowercase();
        if !title.is_empty() {
            stripped = stripped.replace(&title, "");
        }
    }
    let stripped = stripped.trim();

    if let Some(value) = LEADING_NUMBER.captures(stripped).and_then(|c| chapter_value(&c)) {
        return value;
    }
    if let Some(value) = NUMBER.captures(stripped).and_then(|c| chapter_value(&c)) {
        return value;
    }
    UNKNOWN
}

/// Integer part plus sub-chapter addend from a `(int)(.decimal)?(alpha)?` match.
fn chapter_value(caps: &Captures<'_>) -> Option<f64> {
    let base: f64 = caps.get(1)?.as_str().parse().ok()?;
    let decimal = caps.get(2).map(|m| m.as_str());
    let alpha = caps.get(3).map(|m| m.as_str());
    Some(base + sub_chapter(decimal, alpha))
}

fn sub_chapter(decimal: Option<&str>, alpha: Option<&str>) -> f64 {
    if let Some(decimal) = decimal.filter(|d| !d.is_empty()) {
        return format!("0{decimal}").parse().unwrap_or(0.0);
    }
    let Some(alpha) = alpha.filter(|a| !a.is_empty()) else {
        return 0.0;
    };
    if alpha.contains("extra") {
        return 0.99;
    }
    if alpha.contains("omake") {
        return 0.98;
    }
    if alpha.contains("special") {
        return 0.97;
    }
    match alpha.trim_start_matches('.').chars().next() {
        Some(c) if c.is_ascii_lowercase() => {
            let n = (c as u32) - ('a' as u32 - 1);
            if n >= 10 { 0.0 } else { n as f64 / 10.0 }
        }
        _ => 0.0,
    }
}
