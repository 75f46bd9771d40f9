use std::fmt::Display;

pub fn format_comma_delimited<I: IntoIterator<Item = T>, T: Display>(iter: I) -> String {
    iter.into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses the trailing decimal digits of a hostname, e.g. `cfg3` -> 3.
pub fn trailing_index(hostname: &str) -> Option<u32> {
    let name = hostname.split('.').next().unwrap_or(hostname);
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}
