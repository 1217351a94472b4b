//! Reconfiguration result codes returned at the control boundary.

use std::fmt;

/// Outcome of applying one reconfiguration plan.
///
/// The numeric values are part of the control-plane interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ReconfigResult {
    Success = 0,
    PrefixError = 1,
    DupCheckError = 2,
    UnfoundIdError = 3,
    P4ObjectsInitFail = 4,
    OpenJsonFileFail = 5,
    OpenPlanFileFail = 6,
    InvalidCommandError = 7,
    UnsupportedTargetError = 8,
    InvalidHashFunctionNameError = 9,
}

impl ReconfigResult {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReconfigResult::Success)
    }

    /// Returns true for failures detected before the plan was read.
    pub fn is_input_failure(&self) -> bool {
        matches!(
            self,
            ReconfigResult::OpenJsonFileFail
                | ReconfigResult::OpenPlanFileFail
                | ReconfigResult::P4ObjectsInitFail
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::PrefixError => "PREFIX_ERROR",
            Self::DupCheckError => "DUP_CHECK_ERROR",
            Self::UnfoundIdError => "UNFOUND_ID_ERROR",
            Self::P4ObjectsInitFail => "P4OBJECTS_INIT_FAIL",
            Self::OpenJsonFileFail => "OPEN_JSON_FILE_FAIL",
            Self::OpenPlanFileFail => "OPEN_PLAN_FILE_FAIL",
            Self::InvalidCommandError => "INVALID_COMMAND_ERROR",
            Self::UnsupportedTargetError => "UNSUPPORTED_TARGET_ERROR",
            Self::InvalidHashFunctionNameError => "INVALID_HASH_FUNCTION_NAME_ERROR",
        }
    }
}

impl fmt::Display for ReconfigResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ReconfigResult::Success.code(), 0);
        assert_eq!(ReconfigResult::UnfoundIdError.code(), 3);
        assert_eq!(ReconfigResult::InvalidHashFunctionNameError.code(), 9);
    }

    #[test]
    fn test_classification() {
        assert!(ReconfigResult::Success.is_success());
        assert!(!ReconfigResult::PrefixError.is_success());
        assert!(ReconfigResult::OpenPlanFileFail.is_input_failure());
        assert!(!ReconfigResult::DupCheckError.is_input_failure());
        assert_eq!(
            ReconfigResult::UnsupportedTargetError.to_string(),
            "UNSUPPORTED_TARGET_ERROR"
        );
    }
}
