pub mod documents;
pub mod folders;

pub use documents::*;
pub use folders::*;

use crate::error::MoveError;
use crate::models::ApiResult;

/// Message shown for failures the user cannot act on
pub const GENERIC_FAILURE: &str = "The operation could not be completed";

/// Text shown to the user for `error`. Errors that are not meant for the
/// user are logged and replaced by [`GENERIC_FAILURE`].
pub(crate) fn user_facing(error: &MoveError) -> String {
    match error.user_message() {
        Some(message) => message,
        None => {
            log::error!("Command failed: {}", error);
            GENERIC_FAILURE.to_string()
        }
    }
}

pub(crate) fn error_result(error: &MoveError) -> ApiResult {
    ApiResult::error(user_facing(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_programmer_errors_are_masked() {
        let result = error_result(&MoveError::InvariantViolation("duplicate d1".into()));
        assert_eq!(result.error.as_deref(), Some(GENERIC_FAILURE));

        let result = error_result(&MoveError::Persistence("HTTP 500".into()));
        assert!(result.error.unwrap().contains("HTTP 500"));
    }
}
