//! Shared helpers for the text-to-FHiCL converters.

/// A value is numeric when it consists only of digits and at most one dot.
pub fn is_numeric(value: &str) -> bool {
    !value.is_empty()
        && value.chars().all(|c| c.is_ascii_digit() || c == '.')
        && value.matches('.').count() <= 1
}

/// Collapse whitespace, hyphens, parentheses, slashes, hashes and dots in a
/// key to single underscores.
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut pending_sep = false;
    for c in key.trim().chars() {
        if c.is_whitespace() || matches!(c, '-' | '(' | ')' | '/' | '#' | '.') {
            pending_sep = true;
        } else {
            if pending_sep {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        }
    }
    if pending_sep {
        out.push('_');
    }
    out
}

/// Quote a value for FHiCL output. Already-quoted strings, array syntax and
/// numeric values pass through verbatim; everything else is wrapped in
/// double quotes with inner quotes escaped.
pub fn quote_value(value: &str) -> String {
    let value = value.trim();
    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        return value.to_string();
    }
    if value.starts_with('[') && value.ends_with(']') {
        return value.to_string();
    }
    if is_numeric(value) {
        return value.to_string();
    }
    format!("\"{}\"", value.replace('"', "\\\""))
}

/// Format a list of strings as a FHiCL array of quoted items.
pub fn format_fhicl_array(items: &[String]) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }
    let quoted: Vec<String> = items.iter().map(|item| format!("\"{item}\"")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Map every non-ASCII character to `.`.
pub fn clean_non_ascii(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() { c } else { '.' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_detection() {
        assert!(is_numeric("42"));
        assert!(is_numeric("3.14"));
        assert!(is_numeric(".5"));
        assert!(!is_numeric(""));
        assert!(!is_numeric("1.2.3"));
        assert!(!is_numeric("-1"));
        assert!(!is_numeric("4e2"));
        assert!(!is_numeric("localhost"));
    }

    #[test]
    fn key_normalization() {
        assert_eq!(normalize_key("Config name"), "Config_name");
        assert_eq!(normalize_key("some-key (v2)"), "some_key_v2_");
        assert_eq!(normalize_key("a/b.c"), "a_b_c");
        assert_eq!(normalize_key("  spaced   out  "), "spaced_out");
    }

    #[test]
    fn quoting_rules() {
        assert_eq!(quote_value("42"), "42");
        assert_eq!(quote_value("\"already\""), "\"already\"");
        assert_eq!(quote_value("[1, 2]"), "[1, 2]");
        assert_eq!(quote_value("plain text"), "\"plain text\"");
        assert_eq!(quote_value("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn array_formatting() {
        assert_eq!(format_fhicl_array(&[]), "[]");
        assert_eq!(
            format_fhicl_array(&["a".to_string(), "b".to_string()]),
            "[\"a\", \"b\"]"
        );
    }

    #[test]
    fn non_ascii_mapped_to_dot() {
        assert_eq!(clean_non_ascii("caf\u{e9} \u{2603}"), "caf. .");
        assert_eq!(clean_non_ascii("plain"), "plain");
    }
}
