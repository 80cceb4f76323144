//! Argument validation for values interpolated into shell commands

use crate::error::{PqdagError, Result};

/// Accept only `[A-Za-z0-9._-]`, rejecting empty values and `.`/`..`
pub fn safe_token<'a>(kind: &str, value: &'a str) -> Result<&'a str> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(value)
    } else {
        Err(PqdagError::InvalidRequest {
            reason: format!("{kind} {value:?} may only contain letters, digits, '.', '_' or '-'"),
        })
    }
}
