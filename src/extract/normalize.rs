//! Pure normalization of raw field text
//!
//! Display text on the provider's pages uses magnitude suffixes ("3.5万"),
//! thousands separators and several timestamp renderings. These functions
//! turn such text into plain values; they never fail, they return `None`.

use crate::model::{local_from_epoch, PublishTime};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};

const TEN_THOUSAND: u128 = 10_000;
const HUNDRED_MILLION: u128 = 100_000_000;

/// Placeholder texts the provider renders for unknown values
const UNKNOWN_MARKERS: &[&str] = &["未知", "-", "--", "N/A"];

/// Expands a display count into a plain integer
///
/// `万` multiplies by 10 000 and `亿` by 100 000 000; thousands separators
/// are ignored and fractional results are truncated. Leading labels such as
/// "播放" are skipped.
///
/// # Examples
///
/// ```
/// use bili_harvest::extract::normalize_count;
///
/// assert_eq!(normalize_count("3.5万"), Some(35_000));
/// assert_eq!(normalize_count("1,234"), Some(1_234));
/// assert_eq!(normalize_count("1.2亿"), Some(120_000_000));
/// assert_eq!(normalize_count("未知"), None);
/// ```
pub fn normalize_count(text: &str) -> Option<u64> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != ',' && *c != '，' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() || UNKNOWN_MARKERS.contains(&cleaned.as_str()) {
        return None;
    }

    let digit = cleaned.find(|c: char| c.is_ascii_digit())?;
    let start = if cleaned[..digit].ends_with('.') {
        digit - 1
    } else {
        digit
    };
    // counts are never negative
    if cleaned[..start].ends_with('-') {
        return None;
    }
    let rest = &cleaned[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let number = &rest[..end];

    let multiplier = match rest[end..].chars().next() {
        Some('万') => TEN_THOUSAND,
        Some('亿') => HUNDRED_MILLION,
        _ => 1,
    };

    let (whole, fraction) = match number.split_once('.') {
        Some((w, f)) => (w, f.trim_end_matches('.')),
        None => (number, ""),
    };
    if fraction.contains('.') {
        return None;
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut value = whole.checked_mul(multiplier)?;

    // exact decimal arithmetic so "2.3万" is 23000, not 22999
    if !fraction.is_empty() && multiplier > 1 {
        let digits = fraction.len().min(18) as u32;
        let fraction: u128 = fraction[..digits as usize].parse().ok()?;
        value += fraction * multiplier / 10u128.pow(digits);
    }

    u64::try_from(value).ok()
}

/// Parses a publish or creation timestamp
///
/// Accepted renderings, in provider-local (UTC+8) wall-clock time:
///
/// - unix epoch seconds (`1704067200`)
/// - RFC 3339 (`2024-01-01T08:00:00+08:00`)
/// - `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD HH:MM`, `YYYY/MM/DD HH:MM:SS`
/// - `YYYY-MM-DD` and `MM-DD` (current year), which yield day precision
///
/// A leading "· " separator, as rendered on listing cards, is stripped.
pub fn parse_timestamp(text: &str) -> Option<PublishTime> {
    let text = text.trim().trim_start_matches('·').trim();
    if text.is_empty() {
        return None;
    }

    if text.len() >= 9 && text.chars().all(|c| c.is_ascii_digit()) {
        return text.parse::<i64>().ok().and_then(PublishTime::from_epoch);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return PublishTime::from_epoch(dt.timestamp());
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(text, format) {
            return Some(PublishTime::exact(at));
        }
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(PublishTime::day(date));
        }
    }

    parse_month_day(text).map(PublishTime::day)
}

/// Parses `MM-DD`, assuming the current provider-local year
fn parse_month_day(text: &str) -> Option<NaiveDate> {
    let (month, day) = text.split_once('-')?;
    if month.len() > 2 || day.len() > 2 {
        return None;
    }
    let year = local_from_epoch(Utc::now().timestamp())?.year();
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

/// Collapses runs of whitespace and strips search-highlight markup
///
/// Search results wrap matched keywords in `<em class="keyword">`; the
/// markup leaks into attribute values.
pub fn clean_text(text: &str) -> Option<String> {
    let without_markup = text
        .replace("<em class=\"keyword\">", "")
        .replace("</em>", "");
    let collapsed = without_markup
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}
