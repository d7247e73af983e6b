//! `Set-Cookie` attribute lookup.

/// Split a `Set-Cookie`-style value into `(name, value)` pairs.
///
/// Segments are separated by `;` and split on the first `=`. Names are
/// trimmed; values lose a trailing carriage return. Flag attributes such as
/// `HttpOnly` map to an empty value.
pub fn parse_attributes(header_value: &str) -> Vec<(String, String)> {
    header_value
        .split(';')
        .filter(|segment| !segment.trim().is_empty())
        .map(|segment| {
            let (name, value) = segment.split_once('=').unwrap_or((segment, ""));
            (
                name.trim().to_string(),
                value.trim_end_matches('\r').to_string(),
            )
        })
        .collect()
}

/// Value of `attribute` in `header_value`, or an empty string when absent.
pub fn find_attribute(header_value: &str, attribute: &str) -> String {
    parse_attributes(header_value)
        .into_iter()
        .find(|(name, _)| name == attribute)
        .map(|(_, value)| value)
        .unwrap_or_default()
}
