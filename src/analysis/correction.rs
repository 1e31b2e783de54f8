//! OCR correction
//!
//! Numeric radar values are repaired character by character and then
//! validated. Title and artist text is matched against the music catalog by
//! edit distance.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strsim::levenshtein;
use tracing::debug;

use crate::error::FieldError;
use crate::storage::catalog::MasterCatalogEntry;

/// Largest value a radar field can take
pub const RADAR_MAX: f64 = 200.0;

static RADAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,3}\.\d{2}$").unwrap_or_else(|e| panic!("Failed to compile radar pattern: {e}"))
});

/// Map glyphs the engine confuses with digits
fn substitute(c: char) -> char {
    match c {
        'I' | 'i' | 'l' | '|' | '!' | ']' => '1',
        'e' | 'Z' | 'c' | '¢' => '2',
        'A' | 'q' | 'y' => '4',
        'a' | 'S' | 's' | 'H' => '5',
        'b' | 'G' => '6',
        'B' => '8',
        'Q' | 'g' => '9',
        'O' | 'o' | 'D' => '0',
        other => other,
    }
}

/// Substitute look-alike glyphs, collapse `..`, keep only digits and dots
pub fn clean_numeric(raw: &str) -> String {
    let substituted: String = raw.chars().map(substitute).collect();
    substituted
        .replace("..", ".")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}

/// Collapse each immediately repeated digit pair once, scanning left to right
fn collapse_repeats(digits: &str) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        out.push(chars[i]);
        if i + 1 < chars.len() && chars[i] == chars[i + 1] {
            i += 2;
        } else {
            i += 1;
        }
    }
    out
}

fn repair_integer(integer: &str) -> String {
    let collapsed = if integer.len() > 3 {
        collapse_repeats(integer)
    } else {
        integer.to_string()
    };
    let skip = collapsed.chars().count().saturating_sub(3);
    collapsed.chars().skip(skip).collect()
}

fn repair_fraction(fraction: &str) -> String {
    let collapsed = if fraction.len() > 2 {
        collapse_repeats(fraction)
    } else {
        fraction.to_string()
    };
    collapsed.chars().take(2).collect()
}

/// Repair a cleaned value into at most `ddd.dd`.
///
/// Without a dot only the repaired integer digits come back, which then fail
/// validation. Dots after the first are dropped.
pub fn repair_numeric(cleaned: &str) -> String {
    match cleaned.split_once('.') {
        Some((integer, rest)) => {
            let fraction: String = rest.chars().filter(char::is_ascii_digit).collect();
            format!("{}.{}", repair_integer(integer), repair_fraction(&fraction))
        }
        None => repair_integer(cleaned),
    }
}

/// Full numeric correction of one OCR string
pub fn correct_numeric(raw: &str) -> String {
    let corrected = repair_numeric(&clean_numeric(raw));
    debug!("Numeric {:?} -> {:?}", raw, corrected);
    corrected
}

/// Correct the two halves of a split number independently and join them
pub fn correct_split_numeric(integer: &str, decimal: &str) -> String {
    let digits = |raw: &str| -> String { clean_numeric(raw).chars().filter(char::is_ascii_digit).collect() };
    let corrected = repair_numeric(&format!("{}.{}", digits(integer), digits(decimal)));
    debug!("Split numeric {:?}.{:?} -> {:?}", integer, decimal, corrected);
    corrected
}

/// Check the `ddd.dd` format and the `[0, 200]` range
pub fn validate_numeric(field: &'static str, text: &str) -> Result<f64, FieldError> {
    if !RADAR_PATTERN.is_match(text) {
        return Err(FieldError::new(field, format!("'{text}' is not a value like 123.45")));
    }
    let value: f64 = text
        .parse()
        .map_err(|_| FieldError::new(field, format!("'{text}' is not a number")))?;
    if !(0.0..=RADAR_MAX).contains(&value) {
        return Err(FieldError::new(field, format!("{value} is outside 0.00-200.00")));
    }
    Ok(value)
}

/// Catalog entry ranked against the recognized title and artist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionSuggestion {
    pub catalog_id: u32,
    pub title: String,
    pub artist: String,
    pub distance: usize,
    pub title_distance: usize,
    pub artist_distance: usize,
}

/// Smallest distance from any recognized string; no strings means no evidence
fn best_distance(readings: &[&str], target: &str) -> usize {
    readings
        .iter()
        .map(|reading| levenshtein(reading, target))
        .min()
        .unwrap_or(0)
}

/// Rank catalog entries by combined title and artist edit distance.
///
/// `titles`/`artists` hold one reading per language. The sort is stable, so
/// equal distances keep catalog order.
pub fn rank_catalog(
    catalog: &[MasterCatalogEntry],
    titles: &[&str],
    artists: &[&str],
    max_suggestions: usize,
) -> Vec<CorrectionSuggestion> {
    let mut suggestions: Vec<CorrectionSuggestion> = catalog
        .iter()
        .map(|entry| {
            let title_distance = best_distance(titles, &entry.title);
            let artist_distance = best_distance(artists, &entry.artist);
            CorrectionSuggestion {
                catalog_id: entry.id,
                title: entry.title.clone(),
                artist: entry.artist.clone(),
                distance: title_distance + artist_distance,
                title_distance,
                artist_distance,
            }
        })
        .collect();

    suggestions.sort_by_key(|s| s.distance);
    suggestions.truncate(max_suggestions);

    if let Some(best) = suggestions.first() {
        debug!(
            "Best catalog match {} '{}' at distance {} ({} candidates)",
            best.catalog_id,
            best.title,
            best.distance,
            catalog.len()
        );
    }
    suggestions
}

/// Catalog entry whose title equals `title` exactly
pub fn find_by_title<'a>(catalog: &'a [MasterCatalogEntry], title: &str) -> Option<&'a MasterCatalogEntry> {
    catalog.iter().find(|entry| entry.title == title)
}
