//! Caller id normalization.
//!
//! Turns the national and international dialing forms seen in caller ids into
//! a single `+<country><number>` form so they can be matched against list
//! entries. This is a prefix heuristic, not E.164 validation: length and
//! digit content are never checked.

/// Normalize `raw` to international form using `country_code` (digits only,
/// no leading `+`) as the home country.
pub fn normalize(raw: &str, country_code: &str) -> String {
    // Already international
    if raw.starts_with('+') {
        return raw.to_string();
    }

    // International access prefix
    if let Some(rest) = raw.strip_prefix("00") {
        return format!("+{rest}");
    }

    // Country code present without the plus
    if !country_code.is_empty() && raw.starts_with(country_code) {
        return format!("+{raw}");
    }

    // National trunk prefix
    if let Some(rest) = raw.strip_prefix('0') {
        return format!("+{country_code}{rest}");
    }

    format!("+{country_code}{raw}")
}
