//! Query parameter coercion into `ListOptions`

use chrono::{DateTime, Utc};
use debugscope_core::{EntryType, ListOptions, query::DEFAULT_LIMIT};

use crate::request::ApiRequest;

/// Largest page a caller may request
pub const MAX_LIMIT: usize = 1000;

/// Largest offset passed on; SQL backends bind it as a signed 64-bit integer
pub const MAX_OFFSET: usize = i64::MAX as usize;

/// Parse list filters from a request's query pairs
///
/// Integers fall back to their defaults when missing or malformed; an unknown
/// `type` or a malformed date is rejected with a message for a 400 response.
pub fn parse_list_options(request: &ApiRequest) -> Result<ListOptions, String> {
    let mut options = ListOptions::default();

    if let Some(raw) = non_empty(request.query_value("type")) {
        let entry_type = raw
            .parse::<EntryType>()
            .map_err(|_| format!("Invalid entry type: {}", raw))?;
        options.entry_type = Some(entry_type);
    }

    options.batch_id = non_empty(request.query_value("batchId")).map(String::from);
    options.search = non_empty(request.query_value("search")).map(String::from);
    options.tags = request
        .query_values(&["tags", "tags[]"])
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect();

    options.before = parse_date(request, "before")?;
    options.after = parse_date(request, "after")?;

    options.limit = request
        .query_value("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|l| *l > 0)
        .map_or(DEFAULT_LIMIT, |l| l.min(MAX_LIMIT));
    options.offset = request
        .query_value("offset")
        .and_then(|v| v.parse::<usize>().ok())
        .map_or(0, |o| o.min(MAX_OFFSET));

    Ok(options)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn parse_date(request: &ApiRequest, key: &str) -> Result<Option<DateTime<Utc>>, String> {
    match non_empty(request.query_value(key)) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|_| format!("Invalid date for '{}': {}", key, raw)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str) -> Result<ListOptions, String> {
        parse_list_options(&ApiRequest::get(path))
    }

    #[test]
    fn test_defaults() {
        let options = parse("/entries").unwrap();
        assert_eq!(options, ListOptions::default());
    }

    #[test]
    fn test_limit_coercion() {
        assert_eq!(parse("/entries?limit=abc").unwrap().limit, DEFAULT_LIMIT);
        assert_eq!(parse("/entries?limit=0").unwrap().limit, DEFAULT_LIMIT);
        assert_eq!(parse("/entries?limit=5000").unwrap().limit, MAX_LIMIT);
        assert_eq!(parse("/entries?limit=10&offset=20").unwrap().offset, 20);
        assert_eq!(parse("/entries?offset=-3").unwrap().offset, 0);
    }

    #[test]
    fn test_offset_clamped_to_sql_range() {
        let options = parse("/entries?offset=18446744073709551615").unwrap();
        assert_eq!(options.offset, MAX_OFFSET);
        assert_eq!(options.sql_offset(), i64::MAX);
        // Beyond usize entirely: malformed, so the default applies
        assert_eq!(parse("/entries?offset=99999999999999999999999").unwrap().offset, 0);
    }

    #[test]
    fn test_filters() {
        let options =
            parse("/entries?type=http_client&batchId=b1&tags=slow&search=users&after=2024-01-01T00:00:00Z")
                .unwrap();
        assert_eq!(options.entry_type, Some(EntryType::HttpClient));
        assert_eq!(options.batch_id.as_deref(), Some("b1"));
        assert_eq!(options.tags, vec!["slow"]);
        assert_eq!(options.search.as_deref(), Some("users"));
        assert_eq!(
            options.after.unwrap().to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_invalid_type_and_date_rejected() {
        assert!(parse("/entries?type=bogus").unwrap_err().contains("bogus"));
        assert!(parse("/entries?before=yesterday").is_err());
    }
}
