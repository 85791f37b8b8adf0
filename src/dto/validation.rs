//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_SEGMENT_LEN: usize = 64;

/// Validates an identifier used as a store path segment (pilot ids, award names).
///
/// Accepts 1 to 64 ASCII alphanumeric characters, `-`, `_` or `.`.
///
/// # Examples
///
/// ```ignore
/// validate_path_segment("pilot-07")   // Ok
/// validate_path_segment("a/b")        // Err - separator
/// validate_path_segment("")           // Err - empty
/// ```
pub fn validate_path_segment(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_SEGMENT_LEN {
        let mut err = ValidationError::new("segment_length");
        err.message = Some(
            format!(
                "identifier must be 1 to {MAX_SEGMENT_LEN} characters long (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        let mut err = ValidationError::new("segment_format");
        err.message =
            Some("identifier may only contain ASCII letters, digits, `-`, `_` and `.`".into());
        return Err(err);
    }

    Ok(())
}
