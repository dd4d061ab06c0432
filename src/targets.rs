//! Command input: target lists and session durations.

use crate::entry;
use crate::AppError;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Longest session accepted: one year.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Read target names from a text file, one per line.
///
/// Blank lines and `#` comments are skipped, surrounding whitespace is
/// trimmed and repeated names keep their first position.
pub fn read_source_list(path: &Path) -> Result<Vec<String>, AppError> {
    let content = fs::read_to_string(path).map_err(|source| AppError::SourceList {
        path: path.to_path_buf(),
        source,
    })?;

    let names = parse_source_list(&content)?;
    if names.is_empty() {
        return Err(AppError::EmptySourceList);
    }
    Ok(names)
}

fn parse_source_list(content: &str) -> Result<Vec<String>, AppError> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();

    for line in content.lines() {
        let name = line.trim();
        if name.is_empty() || name.starts_with('#') {
            continue;
        }
        entry::validate(name)?;
        if seen.insert(name) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Parse a session length: bare minutes (`25`) or a number with an
/// `s`, `m` or `h` suffix. Zero and anything above [`MAX_DURATION`] are
/// rejected.
pub fn parse_duration(input: &str) -> Result<Duration, AppError> {
    let invalid = || AppError::InvalidDuration(input.to_string());

    let s = input.trim();
    let (digits, unit_secs) = match s.char_indices().last() {
        Some((i, 's')) => (&s[..i], 1),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 'h')) => (&s[..i], 3600),
        _ => (s, 60),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let count: u64 = digits.parse().map_err(|_| invalid())?;
    let secs = count.checked_mul(unit_secs).ok_or_else(invalid)?;
    let duration = Duration::from_secs(secs);
    if secs == 0 || duration > MAX_DURATION {
        return Err(invalid());
    }
    Ok(duration)
}
