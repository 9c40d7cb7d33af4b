//! Best-effort source location extraction from stack traces

use once_cell::sync::Lazy;
use regex::Regex;

// Matches "at ./src/main.rs:10:5" (Rust backtraces) and "(/app/x.js:10:5)".
static FRAME_LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\bat\s+|\()(?P<file>[^\s()]+?):(?P<line>\d+)(?::\d+)?\)?")
        .expect("frame location pattern is valid")
});

/// File and line of the first application frame in `stack`
///
/// Frames inside the Rust standard library (`/rustc/...`) are skipped. Returns
/// `(None, None)` when nothing matches; never fails.
pub fn parse_location(stack: &str) -> (Option<String>, Option<u32>) {
    FRAME_LOCATION
        .captures_iter(stack)
        .filter(|caps| !caps["file"].starts_with("/rustc/"))
        .find_map(|caps| {
            let line = caps["line"].parse::<u32>().ok()?;
            Some((Some(caps["file"].to_string()), Some(line)))
        })
        .unwrap_or((None, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_backtrace_frame() {
        let stack = "   0: std::backtrace::Backtrace::create\n             at /rustc/abc/library/std/src/backtrace.rs:331:13\n   1: app::handler\n             at ./src/handler.rs:42:9\n";
        assert_eq!(
            parse_location(stack),
            (Some("./src/handler.rs".to_string()), Some(42))
        );
    }

    #[test]
    fn test_parenthesized_frame() {
        let stack = "Error: boom\n    at handler (/srv/app/routes.js:17:3)\n    at next (/srv/app/x.js:1:1)";
        assert_eq!(
            parse_location(stack),
            (Some("/srv/app/routes.js".to_string()), Some(17))
        );
    }

    #[test]
    fn test_no_match_yields_empty() {
        assert_eq!(parse_location("no frames here"), (None, None));
        assert_eq!(parse_location(""), (None, None));
    }
}
