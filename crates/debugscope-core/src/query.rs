//! Query-side views: list filters, paginated results and storage statistics
//!
//! These describe requests and responses; none of them are persisted. Backends that
//! cannot express a filter natively use [`ListOptions::matches`] so every backend
//! agrees on the logical result.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entry::{Entry, EntryType};

pub const DEFAULT_LIMIT: usize = 50;

/// Filter and pagination request for `StorageAdapter::list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    /// Only entries of this type
    #[serde(default, rename = "type")]
    pub entry_type: Option<EntryType>,

    /// Only entries of this batch
    #[serde(default)]
    pub batch_id: Option<String>,

    /// Entries carrying *any* of these tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Case-insensitive substring over the serialized content
    #[serde(default)]
    pub search: Option<String>,

    /// Exclusive upper bound on `created_at`
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,

    /// Exclusive lower bound on `created_at`
    #[serde(default)]
    pub after: Option<DateTime<Utc>>,

    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            entry_type: None,
            batch_id: None,
            tags: Vec::new(),
            search: None,
            before: None,
            after: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl ListOptions {
    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Search term, if one was given and is non-empty
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().filter(|s| !s.is_empty())
    }

    /// `LIKE` pattern for the search term with `\` as the escape character
    ///
    /// The term is ASCII-lowercased; callers compare it against lowercased content
    /// (or use a case-insensitive operator).
    pub fn like_pattern(&self) -> Option<String> {
        self.search_term()
            .map(|s| format!("%{}%", escape_like(&s.to_ascii_lowercase())))
    }

    /// Every filter except `tags`
    pub fn matches_without_tags(&self, entry: &Entry, content_json: &str) -> bool {
        if let Some(entry_type) = self.entry_type
            && entry.entry_type != entry_type
        {
            return false;
        }

        if let Some(batch_id) = &self.batch_id
            && &entry.batch_id != batch_id
        {
            return false;
        }

        if let Some(before) = self.before
            && entry.created_at >= before
        {
            return false;
        }

        if let Some(after) = self.after
            && entry.created_at <= after
        {
            return false;
        }

        if let Some(term) = self.search_term()
            && !contains_ignore_ascii_case(content_json, term)
        {
            return false;
        }

        true
    }

    pub fn matches_tags(&self, entry: &Entry) -> bool {
        self.tags.is_empty() || entry.has_any_tag(&self.tags)
    }

    /// Full filter evaluation in application code
    pub fn matches(&self, entry: &Entry, content_json: &str) -> bool {
        self.matches_tags(entry) && self.matches_without_tags(entry, content_json)
    }

    /// `LIMIT` bind value, saturated to the SQL integer range
    pub fn sql_limit(&self) -> i64 {
        i64::try_from(self.limit).unwrap_or(i64::MAX)
    }

    /// `OFFSET` bind value, saturated to the SQL integer range
    pub fn sql_offset(&self) -> i64 {
        i64::try_from(self.offset).unwrap_or(i64::MAX)
    }

    /// Slice an already filtered and ordered set into a page
    pub fn paginate(&self, filtered: Vec<Entry>) -> PaginatedResult<Entry> {
        let total = filtered.len() as u64;
        let data = filtered
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect();
        PaginatedResult::new(data, total, self.limit, self.offset)
    }
}

/// Earliest cutoff handed to a backend: 0001-01-01T00:00:00Z, inside every
/// backend's timestamp range
pub const EARLIEST_CUTOFF_SECS: i64 = -62_135_596_800;

/// `now - hours`, clamped so huge horizons cannot overflow
///
/// Non-finite or negative hours yield `now`.
pub fn cutoff_hours_ago(now: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
    let floor = DateTime::from_timestamp(EARLIEST_CUTOFF_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC);
    if !hours.is_finite() || hours <= 0.0 {
        return now;
    }
    // f64 -> i64 saturates, so absurd horizons land on the floor below
    let millis = (hours * 3_600_000.0) as i64;
    TimeDelta::try_milliseconds(millis)
        .and_then(|delta| now.checked_sub_signed(delta))
        .filter(|cutoff| *cutoff > floor)
        .unwrap_or(floor)
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// ASCII case-insensitive substring test
pub fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResult<T> {
    pub data: Vec<T>,
    /// Size of the filtered set before pagination
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

impl<T> PaginatedResult<T> {
    pub fn new(data: Vec<T>, total: u64, limit: usize, offset: usize) -> Self {
        Self {
            data,
            total,
            limit,
            offset,
            has_more: (offset as u64).saturating_add(limit as u64) < total,
        }
    }
}

/// Aggregate statistics over the whole store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_entries: u64,
    /// Seeded with every `EntryType` at zero
    pub entries_by_type: BTreeMap<EntryType, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_entry: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_entry: Option<DateTime<Utc>>,
}

impl StorageStats {
    /// Stats for an empty store
    pub fn empty() -> Self {
        Self {
            total_entries: 0,
            entries_by_type: EntryType::ALL.iter().map(|t| (*t, 0)).collect(),
            oldest_entry: None,
            newest_entry: None,
        }
    }

    /// Add `count` entries of `entry_type` to the totals
    pub fn add(&mut self, entry_type: EntryType, count: u64) {
        *self.entries_by_type.entry(entry_type).or_insert(0) += count;
        self.total_entries += count;
    }

    /// Widen the oldest/newest bounds to include `created_at`
    pub fn observe(&mut self, created_at: DateTime<Utc>) {
        self.oldest_entry = Some(self.oldest_entry.map_or(created_at, |o| o.min(created_at)));
        self.newest_entry = Some(self.newest_entry.map_or(created_at, |n| n.max(created_at)));
    }
}

impl Default for StorageStats {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entry(entry_type: EntryType, batch: &str, tags: &[&str]) -> Entry {
        Entry::new(entry_type, batch, json!({"message": "Hello World"}))
            .with_tags(tags.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_has_more_boundary() {
        let page: PaginatedResult<u8> = PaginatedResult::new(vec![], 10, 5, 5);
        assert!(!page.has_more);
        let page: PaginatedResult<u8> = PaginatedResult::new(vec![], 11, 5, 5);
        assert!(page.has_more);
    }

    #[test]
    fn test_cutoff_hours_ago_clamps() {
        let now = Utc::now();
        assert_eq!(cutoff_hours_ago(now, 0.0), now);
        assert_eq!(cutoff_hours_ago(now, -1.0), now);
        assert_eq!(cutoff_hours_ago(now, f64::NAN), now);
        assert_eq!(cutoff_hours_ago(now, 1.0), now - TimeDelta::hours(1));

        let floor = DateTime::from_timestamp(EARLIEST_CUTOFF_SECS, 0).unwrap();
        assert_eq!(cutoff_hours_ago(now, 1e10), floor);
        assert_eq!(cutoff_hours_ago(now, 1e300), floor);
    }

    #[test]
    fn test_huge_offset_saturates() {
        let page: PaginatedResult<u8> = PaginatedResult::new(vec![], 3, 50, usize::MAX);
        assert!(!page.has_more);

        let options = ListOptions::default().with_page(50, usize::MAX);
        assert_eq!(options.sql_offset(), i64::MAX);
        assert_eq!(options.sql_limit(), 50);
        assert!(options.paginate(Vec::new()).data.is_empty());
    }

    #[test]
    fn test_tags_match_any() {
        let e = entry(EntryType::Log, "b", &["a", "b"]);
        assert!(ListOptions::default().with_tags(["x", "b"]).matches_tags(&e));
        assert!(!ListOptions::default().with_tags(["x", "y"]).matches_tags(&e));
        assert!(ListOptions::default().matches_tags(&e));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let e = entry(EntryType::Log, "b", &[]);
        let json = e.content_json();
        assert!(ListOptions::default().with_search("hello world").matches(&e, &json));
        assert!(!ListOptions::default().with_search("goodbye").matches(&e, &json));
    }

    #[test]
    fn test_time_bounds_are_exclusive() {
        let e = entry(EntryType::Log, "b", &[]);
        let json = e.content_json();
        let at = e.created_at;
        assert!(!ListOptions::default().with_before(at).matches(&e, &json));
        assert!(!ListOptions::default().with_after(at).matches(&e, &json));
        assert!(
            ListOptions::default()
                .with_before(at + Duration::milliseconds(1))
                .with_after(at - Duration::milliseconds(1))
                .matches(&e, &json)
        );
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        let opts = ListOptions::default().with_search("ABC%");
        assert_eq!(opts.like_pattern().unwrap(), "%abc\\%%");
    }

    #[test]
    fn test_paginate_counts_before_slicing() {
        let entries: Vec<Entry> = (0..7).map(|_| entry(EntryType::Log, "b", &[])).collect();
        let page = ListOptions::default().with_page(3, 3).paginate(entries);
        assert_eq!(page.total, 7);
        assert_eq!(page.data.len(), 3);
        assert!(page.has_more);
    }

    #[test]
    fn test_stats_seeded_with_every_type() {
        let stats = StorageStats::empty();
        assert_eq!(stats.entries_by_type.len(), EntryType::ALL.len());
        assert!(stats.entries_by_type.values().all(|c| *c == 0));

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["entriesByType"]["http_client"], 0);
        assert!(value.get("oldestEntry").is_none());
    }
}
