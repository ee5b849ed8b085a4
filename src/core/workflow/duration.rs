//! Parsing and formatting of duration strings like `10m`, `1h30m`, `1ns`.

use crate::core::error::WfError;
use crate::core::types::ErrorCategory;
use std::time::Duration;

const UNITS: &[(&str, u64)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 3600 * 1_000_000_000),
];

fn invalid(s: &str) -> WfError {
    WfError::new(
        ErrorCategory::PopulateError,
        format!("time: invalid duration {}", s),
    )
}

/// Parse a duration string composed of one or more `<number><unit>`
/// segments, e.g. `10m`, `1h30m`, `1.5s`, `1ns`.
pub fn parse_duration(s: &str) -> Result<Duration, WfError> {
    if s.is_empty() {
        return Err(invalid(s));
    }
    let mut total_ns = 0u64;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid(s));
        }
        let value: f64 = rest[..digits].parse().map_err(|_| invalid(s))?;
        rest = &rest[digits..];
        if rest.is_empty() {
            return Err(WfError::new(
                ErrorCategory::PopulateError,
                format!("time: missing unit in duration {}", s),
            ));
        }
        let (unit, scale) = UNITS
            .iter()
            .filter(|(u, _)| rest.starts_with(u))
            // prefer the longest matching unit so "ms" beats "m".
            .max_by_key(|(u, _)| u.len())
            .ok_or_else(|| invalid(s))?;
        rest = &rest[unit.len()..];
        total_ns += (value * *scale as f64) as u64;
    }
    Ok(Duration::from_nanos(total_ns))
}

/// Format a duration the way `parse_duration` reads it: `h`/`m`/`s`
/// decomposition for durations of a second or more, otherwise the
/// largest sub-second unit that divides it evenly.
pub fn format_duration(d: Duration) -> String {
    let ns = d.as_nanos();
    if ns == 0 {
        return "0s".to_string();
    }
    if ns < 1_000 {
        return format!("{}ns", ns);
    }
    if ns < 1_000_000 {
        return trim_frac(ns, 1_000, "µs");
    }
    if ns < 1_000_000_000 {
        return trim_frac(ns, 1_000_000, "ms");
    }
    let secs = d.as_secs();
    let frac_ns = d.subsec_nanos();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if h > 0 || m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if frac_ns == 0 {
        out.push_str(&format!("{}s", s));
    } else {
        let mut frac = format!("{:09}", frac_ns);
        while frac.ends_with('0') {
            frac.pop();
        }
        out.push_str(&format!("{}.{}s", s, frac));
    }
    out
}

fn trim_frac(ns: u128, scale: u128, unit: &str) -> String {
    let whole = ns / scale;
    let rem = ns % scale;
    if rem == 0 {
        return format!("{}{}", whole, unit);
    }
    let mut frac = format!("{:0width$}", rem, width = (scale as f64).log10() as usize);
    while frac.ends_with('0') {
        frac.pop();
    }
    format!("{}.{}{}", whole, frac, unit)
}
