//! Cell-level coercions shared by every row mapper.
//!
//! All functions take the column title so errors point staff at the cell
//! they need to fix.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::errors::MappingError;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %I:%M%p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"];

/// Lowercase and join word runs with `_`: `"Hands-On Lab"` → `"hands_on_lab"`.
pub fn normalize_enum(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Parse an enumerated cell with the type's `from_normalized` table.
pub fn parse_enum<T>(
    field: &str,
    raw: &str,
    from_normalized: fn(&str) -> Option<T>,
) -> Result<T, MappingError> {
    from_normalized(&normalize_enum(raw))
        .ok_or_else(|| MappingError::new(field, format!("unrecognized value '{}'", raw)))
}

pub fn parse_bool(field: &str, raw: &str) -> Result<bool, MappingError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "checked" | "x" => Ok(true),
        "false" | "no" | "n" | "0" | "unchecked" => Ok(false),
        _ => Err(MappingError::new(
            field,
            format!("expected yes/no, got '{}'", raw),
        )),
    }
}

/// A non-negative whole number, tolerating `"1,200"` and `"40.0"`.
pub fn parse_count(field: &str, raw: &str) -> Result<u32, MappingError> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    let value: f64 = cleaned
        .trim()
        .parse()
        .map_err(|_| MappingError::new(field, format!("'{}' is not a number", raw)))?;
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(MappingError::new(field, format!("'{}' is not a whole number", raw)));
    }
    if value < 0.0 || value > f64::from(u32::MAX) {
        return Err(MappingError::new(field, "must not be negative"));
    }
    Ok(value as u32)
}

/// A dollar amount such as `"$50,000"`, `"75000 USD"` or `"1.5M"`.
pub fn parse_amount(field: &str, raw: &str) -> Result<u64, MappingError> {
    let lowered = raw.trim().to_ascii_lowercase();
    let stripped: String = lowered
        .trim_end_matches("usd")
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    let (digits, multiplier) = if let Some(d) = stripped.strip_suffix('k') {
        (d, 1_000.0)
    } else if let Some(d) = stripped.strip_suffix('m') {
        (d, 1_000_000.0)
    } else {
        (stripped.as_str(), 1.0)
    };
    let value: f64 = digits
        .parse()
        .map_err(|_| MappingError::new(field, format!("'{}' is not an amount", raw)))?;
    let amount = value * multiplier;
    if !amount.is_finite() || amount < 0.0 {
        return Err(MappingError::new(field, "amount must not be negative"));
    }
    Ok(amount.round() as u64)
}

/// An event-local date-time. Offsets in RFC 3339 input are kept as local
/// wall-clock time.
pub fn parse_datetime(field: &str, raw: &str) -> Result<NaiveDateTime, MappingError> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| MappingError::new(field, format!("unrecognized date-time '{}'", raw)))
}

pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, MappingError> {
    let s = raw.trim();
    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
    {
        return Ok(date);
    }
    parse_datetime(field, s)
        .map(|dt| dt.date())
        .map_err(|_| MappingError::new(field, format!("unrecognized date '{}'", raw)))
}

/// Split a multi-value cell on commas, semicolons or newlines.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lowercased, minimally validated email address.
pub fn parse_email(field: &str, raw: &str) -> Result<String, MappingError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(MappingError::new(field, format!("'{}' is not a valid email address", raw)))
    }
}

/// URL with an explicit scheme; bare domains get `https://`.
pub fn parse_url(field: &str, raw: &str) -> Result<String, MappingError> {
    let s = raw.trim();
    if s.contains(char::is_whitespace) || !s.contains('.') {
        return Err(MappingError::new(field, format!("'{}' is not a valid URL", raw)));
    }
    let lowered = s.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        Ok(s.to_string())
    } else {
        Ok(format!("https://{}", s))
    }
}

/// `"Acme Robotics, Inc."` → `"acme-robotics-inc"`.
pub fn slugify(raw: &str) -> String {
    normalize_enum(raw).replace('_', "-")
}
