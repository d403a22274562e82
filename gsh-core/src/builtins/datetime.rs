//! `DateTime.{now,parse,format,diff}` (§6 "Built-in globals"): every instant
//! is a millisecond-epoch number, never a dedicated value kind, so it flows
//! through arithmetic, comparison and JSON like any other number.

use chrono::{DateTime as ChronoDateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::error::RuntimeError;
use crate::value::Value;

pub fn now_millis() -> f64 {
    Utc::now().timestamp_millis() as f64
}

/// Parses an RFC 3339 string into an epoch-millisecond number. Anything else
/// is a runtime error rather than a best-effort guess (§6).
pub fn parse(text: &str) -> Result<f64, RuntimeError> {
    ChronoDateTime::parse_from_rfc3339(text)
        .map(|dt| dt.timestamp_millis() as f64)
        .map_err(|e| RuntimeError::new(format!("cannot parse '{}' as a date: {}", text, e)))
}

pub fn diff(a_millis: f64, b_millis: f64) -> f64 {
    a_millis - b_millis
}

/// Renders `millis` using a dayjs-compatible token mapping. Tokens are
/// matched longest-first so `YYYY` never partially matches as `YY`; any
/// run of characters that isn't a recognized token passes through verbatim.
pub fn format(millis: f64, pattern: &str) -> Result<String, RuntimeError> {
    let dt = millis_to_datetime(millis)?;
    const TOKENS: &[&str] = &["YYYY", "MM", "DD", "HH", "mm", "ss", "SSS", "Z", "M", "D", "H", "m", "s"];

    let mut out = String::new();
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    'outer: while i < chars.len() {
        for token in TOKENS {
            let tlen = token.chars().count();
            if chars[i..].iter().take(tlen).collect::<String>() == *token {
                out.push_str(&render_token(&dt, token));
                i += tlen;
                continue 'outer;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    Ok(out)
}

fn render_token(dt: &ChronoDateTime<Utc>, token: &str) -> String {
    match token {
        "YYYY" => format!("{:04}", dt.year()),
        "MM" => format!("{:02}", dt.month()),
        "M" => format!("{}", dt.month()),
        "DD" => format!("{:02}", dt.day()),
        "D" => format!("{}", dt.day()),
        "HH" => format!("{:02}", dt.hour()),
        "H" => format!("{}", dt.hour()),
        "mm" => format!("{:02}", dt.minute()),
        "m" => format!("{}", dt.minute()),
        "ss" => format!("{:02}", dt.second()),
        "s" => format!("{}", dt.second()),
        "SSS" => format!("{:03}", dt.timestamp_subsec_millis()),
        "Z" => "+00:00".to_string(),
        other => other.to_string(),
    }
}

fn millis_to_datetime(millis: f64) -> Result<ChronoDateTime<Utc>, RuntimeError> {
    let secs = (millis / 1000.0).floor() as i64;
    let subsec_millis = (millis - (secs as f64) * 1000.0).round() as u32;
    let naive = NaiveDateTime::from_timestamp_opt(secs, subsec_millis * 1_000_000)
        .ok_or_else(|| RuntimeError::new(format!("'{}' is not a valid epoch millisecond value", millis)))?;
    Ok(Utc.from_utc_datetime(&naive))
}

pub fn epoch_to_rfc3339(millis: f64) -> Result<Value, RuntimeError> {
    let dt = millis_to_datetime(millis)?;
    Ok(Value::String(dt.to_rfc3339()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_pads_year_month_day() {
        let millis = parse("2024-03-05T00:00:00Z").unwrap();
        assert_eq!(format(millis, "YYYY-MM-DD").unwrap(), "2024-03-05");
    }

    #[test]
    fn unpadded_tokens_drop_leading_zeros() {
        let millis = parse("2024-03-05T09:07:02Z").unwrap();
        assert_eq!(format(millis, "M/D H:m:s").unwrap(), "3/5 9:7:2");
    }

    #[test]
    fn literal_characters_pass_through() {
        let millis = parse("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(format(millis, "YYYY [at] HH:mm").unwrap(), "2024 [at] 00:00");
    }

    #[test]
    fn diff_is_subtraction_in_milliseconds() {
        assert_eq!(diff(5000.0, 2000.0), 3000.0);
    }

    #[test]
    fn parse_rejects_non_rfc3339_text() {
        assert!(parse("not a date").is_err());
    }
}
