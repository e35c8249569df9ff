//! Duration strings in config files (`"500ms"`, `"10s"`, `"1h30m"`).

use std::time::Duration;

use crate::ConfigError;

/// Parse a duration string made of one or more `<number><unit>` segments.
///
/// Supported units: `ns`, `us`, `ms`, `s`, `m`, `h`. Numbers may carry a
/// fractional part (`"1.5s"`), and segments concatenate (`"1h30m"`).
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ConfigError::InvalidDuration(input.to_string()));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(ConfigError::InvalidDuration(input.to_string()));
        }

        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| ConfigError::InvalidDuration(input.to_string()))?;

        let unit_len = rest[num_end..]
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len() - num_end);
        let unit = &rest[num_end..num_end + unit_len];

        let seconds = match unit {
            "ns" => value / 1e9,
            "us" | "\u{b5}s" => value / 1e6,
            "ms" => value / 1e3,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => return Err(ConfigError::InvalidDuration(input.to_string())),
        };

        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ConfigError::InvalidDuration(input.to_string()));
        }

        total += Duration::from_secs_f64(seconds);
        rest = &rest[num_end + unit_len..];
    }

    Ok(total)
}
