//! Input validation helpers shared by request DTOs.

use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::CoreError;

/// Reject strings that are empty or whitespace-only.
pub fn validate_non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be empty".into());
        return Err(err);
    }
    Ok(())
}

/// Run `validator` rules and convert failures into [`CoreError::Validation`].
pub fn ensure_valid<T: Validate>(value: &T) -> Result<(), CoreError> {
    value.validate().map_err(CoreError::from)
}

/// Flatten field errors into one human-readable line, e.g.
/// `query: must not be empty`.
pub fn describe(errors: &ValidationErrors) -> String {
    let mut parts: Vec<String> = errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let reasons: Vec<String> = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            format!("{field}: {}", reasons.join(", "))
        })
        .collect();
    parts.sort();
    parts.join("; ")
}
