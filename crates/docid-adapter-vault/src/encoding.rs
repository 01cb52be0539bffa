//! Request encoding helpers.
//!
//! - Identifiers placed in URL paths are percent-encoded per segment
//! - Values placed in query-language literals are quoted and escaped

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters that must be percent-encoded in a single path segment.
const PATH_SEGMENT_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'\\');

/// Percent-encode one URL path segment.
///
/// # Examples
///
/// ```
/// use docid_adapter_vault::encode_path_segment;
///
/// assert_eq!(encode_path_segment("1187"), "1187");
/// assert_eq!(encode_path_segment("a/b c"), "a%2Fb%20c");
/// ```
#[must_use]
pub fn encode_path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT_ESCAPE).to_string()
}

/// Quote a string literal for a query, escaping quotes and backslashes.
///
/// # Examples
///
/// ```
/// use docid_adapter_vault::quote_literal;
///
/// assert_eq!(quote_literal("0OB000000000101"), "'0OB000000000101'");
/// assert_eq!(quote_literal("it's"), r"'it\'s'");
/// ```
#[must_use]
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}
