//! Block-entry line codec.
//!
//! A block entry is a single hosts-file line of the form
//! `127.0.0.1<TAB><name>`. Anything else is not ours.

use crate::AppError;

/// Address every blocked name is redirected to.
pub const LOOPBACK: &str = "127.0.0.1";

const SEPARATOR: char = '\t';

/// Check that `name` can be written as a single block entry.
pub fn validate(name: &str) -> Result<(), AppError> {
    if name.is_empty() || name.contains(['\n', '\r', SEPARATOR]) {
        return Err(AppError::InvalidTarget(name.to_string()));
    }
    Ok(())
}

/// Render the newline-terminated block entry for `name`.
pub fn format(name: &str) -> Result<String, AppError> {
    validate(name)?;
    Ok(format!("{}\n", render(name)))
}

/// Entry text without a line terminator. Callers must have validated `name`.
pub(crate) fn render(name: &str) -> String {
    format!("{LOOPBACK}{SEPARATOR}{name}")
}

/// Return the blocked name if `line` is a block entry.
///
/// The match is anchored at the start of the line and the captured name is
/// returned untrimmed, exactly as it was written.
pub fn try_parse(line: &str) -> Option<&str> {
    let name = line.strip_prefix(LOOPBACK)?.strip_prefix(SEPARATOR)?;
    if name.is_empty() || name.contains('\n') {
        return None;
    }
    Some(name)
}
