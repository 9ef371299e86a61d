use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;

lazy_static! {
    static ref DURATION_RE: Regex =
        Regex::new(r"^(?<value>[0-9]+(?:\.[0-9]*)?|\.[0-9]+)\s*(?<unit>ms|s|m)?$").unwrap();
}

/// Parses a per-read deadline such as `500ms`, `2s`, `1.5` (seconds) or `1m`.
pub fn parse(s: &str) -> Option<Duration> {
    let captures = DURATION_RE.captures(s.trim())?;
    let value = captures.name("value")?.as_str().parse::<f64>().ok()?;

    let millis = match captures.name("unit").map(|m| m.as_str()) {
        Some("ms") => value,
        Some("m") => value * 60_000.0,
        Some("s") | None => value * 1000.0,
        Some(_) => return None,
    };

    if millis <= 0.0 {
        return None;
    }
    Some(Duration::from_millis(millis as u64))
}
