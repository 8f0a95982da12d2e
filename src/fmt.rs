use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Format an amount with thousands separators and currency: -1,234.56 EUR
pub fn money(val: f64, currency: Option<&str>) -> String {
    let negative = val < 0.0;
    let abs = val.abs();
    let cents = format!("{:.2}", abs);
    let (int_part, dec_part) = cents.split_once('.').unwrap_or((&cents, "00"));

    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    let sign = if negative { "-" } else { "" };
    match currency {
        Some(cur) if !cur.is_empty() => format!("{sign}{with_commas}.{dec_part} {cur}"),
        _ => format!("{sign}{with_commas}.{dec_part}"),
    }
}

/// Canonical stored timestamp: RFC 3339, UTC, second precision.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Convert a numeric epoch value to the canonical timestamp. Values above
/// 10^11 are read as milliseconds.
pub fn epoch_to_iso(value: f64) -> Option<String> {
    let millis = if value.abs() > 1e11 { value } else { value * 1000.0 };
    DateTime::<Utc>::from_timestamp_millis(millis.round() as i64).map(iso_timestamp)
}

/// Normalise an upstream date or datetime string to the canonical timestamp.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(iso_timestamp(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(iso_timestamp(dt.and_utc()));
    }
    parse_date(raw).and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| iso_timestamp(dt.and_utc()))
}

/// Parse the date part of an upstream date or datetime string.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Human-readable file size: 1.5 MB
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
