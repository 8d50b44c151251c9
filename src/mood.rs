//! Path-keyword and time-of-day mood label
//!
//! Produces `Sentiment[/Context][/TimeOfDay]`, e.g. `Positive/Wedding/Daytime`
//! or `Neutral/Nighttime`. Plain `Neutral` when nothing matched.

use chrono::{NaiveDateTime, Timelike};
use std::path::Path;

/// Checked in this order; first hit wins
pub const POSITIVE_KEYWORDS: &[&str] =
    &["vacation", "birthday", "party", "wedding", "celebration", "trip", "holiday"];
/// Only consulted when no positive keyword matched
pub const NEGATIVE_KEYWORDS: &[&str] = &["funeral", "work", "meeting", "office"];

pub const CAPTURE_TIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

pub fn classify(path: &Path, captured_at: Option<&str>) -> String {
    let haystack = path.to_string_lossy().to_lowercase();

    let matched = find_keyword(&haystack, POSITIVE_KEYWORDS)
        .map(|k| ("Positive", k))
        .or_else(|| find_keyword(&haystack, NEGATIVE_KEYWORDS).map(|k| ("Negative", k)));

    let (sentiment, context) = match matched {
        Some((sentiment, keyword)) => (sentiment, Some(capitalize(keyword))),
        None => ("Neutral", None),
    };

    let mut label = sentiment.to_string();
    for segment in [context, captured_at.and_then(time_of_day).map(String::from)]
        .into_iter()
        .flatten()
    {
        label.push('/');
        label.push_str(&segment);
    }
    label
}

fn find_keyword(haystack: &str, keywords: &[&'static str]) -> Option<&'static str> {
    keywords.iter().copied().find(|k| haystack.contains(k))
}

/// `Daytime` for 06:00-17:59, `Nighttime` otherwise; `None` if unparseable
pub fn time_of_day(captured_at: &str) -> Option<&'static str> {
    let dt = NaiveDateTime::parse_from_str(captured_at.trim(), CAPTURE_TIME_FORMAT).ok()?;
    Some(if (6..18).contains(&dt.hour()) { "Daytime" } else { "Nighttime" })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
