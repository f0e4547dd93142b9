use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

// Para montos que llegan como string desde las APIs
pub fn parse_numeric(value: &str) -> Result<f64, ConversionError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }
    let parsed = trimmed
        .parse::<f64>()
        .map_err(|e| ConversionError::InvalidNumber(format!("{}: {}", trimmed, e)))?;
    if !parsed.is_finite() {
        return Err(ConversionError::NonFinite(trimmed.to_string()));
    }
    Ok(parsed)
}

/// Like [`parse_numeric`] but degrades to 0 on malformed input.
pub fn parse_numeric_or_zero(value: &str) -> f64 {
    match parse_numeric(value) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("Numeric field degraded to 0: {}", e);
            0.0
        }
    }
}

// Timestamps canónicos: ISO-8601 con milisegundos y sufijo Z
pub fn to_iso_timestamp(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `YYYY-MM-DD` segment of the canonical timestamp.
pub fn to_date_segment(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn epoch_millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, ConversionError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ConversionError::InvalidTimestamp(millis.to_string()))
}

/// Accepts either an epoch-millis key (legacy filenames) or an RFC 3339 timestamp.
pub fn parse_timestamp_key(key: &str) -> Result<DateTime<Utc>, ConversionError> {
    let trimmed = key.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let millis = trimmed
            .parse::<i64>()
            .map_err(|_| ConversionError::InvalidTimestamp(trimmed.to_string()))?;
        return epoch_millis_to_datetime(millis);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| ConversionError::InvalidTimestamp(trimmed.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Non-finite number: {0}")]
    NonFinite(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("12.5").unwrap(), 12.5);
        assert_eq!(parse_numeric(" 3 ").unwrap(), 3.0);
        assert_eq!(parse_numeric("").unwrap(), 0.0);
        assert!(parse_numeric("abc").is_err());
        assert!(parse_numeric("inf").is_err());
        assert_eq!(parse_numeric_or_zero("abc"), 0.0);
    }

    #[test]
    fn test_iso_timestamp_matches_millis_format() {
        let date = epoch_millis_to_datetime(1739256230990).unwrap();
        assert_eq!(to_iso_timestamp(&date), "2025-02-11T06:43:50.990Z");
        assert_eq!(to_date_segment(&date), "2025-02-11");
    }

    #[test]
    fn test_parse_timestamp_key_both_forms() {
        let from_millis = parse_timestamp_key("1739256230990").unwrap();
        let from_iso = parse_timestamp_key("2025-02-11T06:43:50.990Z").unwrap();
        assert_eq!(from_millis, from_iso);
        assert!(parse_timestamp_key("not-a-date").is_err());
    }
}
