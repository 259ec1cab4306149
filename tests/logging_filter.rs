// tests/logging_filter.rs

use aslrun::cli::LogLevel;
use aslrun::logging::{filter_directives, parse_level_str};

#[test]
fn cli_level_wins_over_environment() {
    assert_eq!(
        filter_directives(Some(LogLevel::Debug), Some("trace")),
        "debug,notify=warn,mio=warn"
    );
}

#[test]
fn bare_levels_and_directives_from_environment() {
    assert_eq!(filter_directives(None, Some("WARNING")), "warn,notify=warn,mio=warn");
    assert_eq!(
        filter_directives(None, Some("aslrun::watch=trace,notify=debug")),
        "aslrun::watch=trace,notify=debug,mio=warn"
    );
    assert_eq!(filter_directives(None, Some("  ")), "info,notify=warn,mio=warn");
    assert_eq!(filter_directives(None, None), "info,notify=warn,mio=warn");
}

#[test]
fn level_names_parse_case_insensitively() {
    assert_eq!(parse_level_str(" Debug "), Some(tracing::Level::DEBUG));
    assert_eq!(parse_level_str("verbose"), None);
}
