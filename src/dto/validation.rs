//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::question::{AnswerOption, AnswerSequence};

/// Longest display name accepted, in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 32;

/// Validates that a display name is not blank and at most [`MAX_DISPLAY_NAME_LEN`] characters.
///
/// # Examples
///
/// ```ignore
/// validate_display_name("Ada")  // Ok
/// validate_display_name("   ")  // Err - blank
/// ```
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Display name must not be blank".into());
        return Err(err);
    }

    let len = trimmed.chars().count();
    if len > MAX_DISPLAY_NAME_LEN {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Display name must be at most {MAX_DISPLAY_NAME_LEN} characters (got {len})")
                .into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates a comma separated ordering of the four options, e.g. `B,A,D,C`.
pub fn validate_answer_sequence(value: &str) -> Result<(), ValidationError> {
    value.parse::<AnswerSequence>().map(|_| ()).map_err(|source| {
        let mut err = ValidationError::new("answer_sequence");
        err.message = Some(source.to_string().into());
        err
    })
}

/// Validates a single option label.
pub fn validate_answer_option(value: &str) -> Result<(), ValidationError> {
    value.parse::<AnswerOption>().map(|_| ()).map_err(|source| {
        let mut err = ValidationError::new("answer_option");
        err.message = Some(source.to_string().into());
        err
    })
}

/// Validates that exactly four non-blank option texts are supplied.
pub fn validate_option_texts(options: &[String]) -> Result<(), ValidationError> {
    if options.len() != AnswerOption::ALL.len() || options.iter().any(|o| o.trim().is_empty()) {
        let mut err = ValidationError::new("option_texts");
        err.message = Some("Exactly four non-blank options are required".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Ada").is_ok());
        assert!(validate_display_name("  Grace Hopper ").is_ok());
        assert!(validate_display_name("").is_err());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"x".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_answer_sequence() {
        assert!(validate_answer_sequence("B,A,D,C").is_ok());
        assert!(validate_answer_sequence("a,b,c,d").is_ok());
        assert!(validate_answer_sequence("A,A,B,C").is_err()); // repeated option
        assert!(validate_answer_sequence("A,B,C").is_err()); // missing option
        assert!(validate_answer_sequence("A,B,C,E").is_err()); // unknown option
    }

    #[test]
    fn test_validate_options() {
        assert!(validate_answer_option("c").is_ok());
        assert!(validate_answer_option("Z").is_err());

        let options = ["1", "2", "3", "4"].map(String::from);
        assert!(validate_option_texts(&options).is_ok());
        assert!(validate_option_texts(&options[..3]).is_err());
    }
}
