//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::quiz::ClassroomId;

/// Validates that a classroom id is 1-64 characters of `[A-Za-z0-9_-]`.
///
/// # Examples
///
/// ```ignore
/// validate_classroom("room-12") // Ok
/// validate_classroom("room 12") // Err - space
/// ```
pub fn validate_classroom(classroom: &str) -> Result<(), ValidationError> {
    classroom.parse::<ClassroomId>().map(|_| ()).map_err(|err| {
        let mut error = ValidationError::new("classroom_format");
        error.message = Some(err.to_string().into());
        error
    })
}

/// Validates that no option is blank once trimmed.
pub fn validate_options(options: &[String]) -> Result<(), ValidationError> {
    // Blank rows are dropped by the lifecycle manager, so only reject all-blank input.
    if options.iter().all(|option| option.trim().is_empty()) {
        let mut error = ValidationError::new("options_blank");
        error.message = Some("At least two non-empty options are required".into());
        return Err(error);
    }
    Ok(())
}
