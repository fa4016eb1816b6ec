//! Error taxonomy for the session layer.
//!
//! Every externally invoked operation returns [`HwcResult`]. The set of
//! failures is fixed; success is `Ok`. Each error maps to a stable numeric
//! status so it can travel through the administrative command channel.

use thiserror::Error;

/// Failures returned synchronously from session operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum HwcError {
    /// Display id is out of range, unbound, or of the wrong kind.
    #[error("invalid display")]
    BadDisplay,

    /// Layer id does not resolve on the addressed display.
    #[error("invalid layer")]
    BadLayer,

    /// Operation is not supported by this display.
    #[error("unsupported operation")]
    Unsupported,

    /// Hardware or slot resources are not available right now; retryable.
    #[error("no resources available")]
    NoResources,

    /// A parameter failed validation.
    #[error("bad parameter")]
    BadParameter,

    /// A power or secure-session transition is in flight; retry later.
    #[error("transition in progress")]
    TransitionInProgress,

    /// Commit attempted before pending validation changes were accepted.
    #[error("display not validated")]
    NotValidated,
}

/// Result alias for session operations.
pub type HwcResult<T> = Result<T, HwcError>;

/// Status code reported for success on the administrative channel.
pub const STATUS_OK: i32 = 0;

impl HwcError {
    /// Stable numeric status for this error.
    pub fn status_code(&self) -> i32 {
        match self {
            HwcError::BadDisplay => 2,
            HwcError::BadLayer => 3,
            HwcError::BadParameter => 4,
            HwcError::NoResources => 6,
            HwcError::NotValidated => 7,
            HwcError::Unsupported => 8,
            HwcError::TransitionInProgress => 10,
        }
    }

    /// Inverse of [`HwcError::status_code`]. `0` and unknown codes map to `None`.
    pub fn from_status_code(code: i32) -> Option<Self> {
        match code {
            2 => Some(HwcError::BadDisplay),
            3 => Some(HwcError::BadLayer),
            4 => Some(HwcError::BadParameter),
            6 => Some(HwcError::NoResources),
            7 => Some(HwcError::NotValidated),
            8 => Some(HwcError::Unsupported),
            10 => Some(HwcError::TransitionInProgress),
            _ => None,
        }
    }

    /// Whether a caller may simply retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HwcError::NoResources | HwcError::TransitionInProgress)
    }
}

/// Collapse an operation result into a status code.
pub fn status_of<T>(result: &HwcResult<T>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => e.status_code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_distinct() {
        let all = [
            HwcError::BadDisplay,
            HwcError::BadLayer,
            HwcError::Unsupported,
            HwcError::NoResources,
            HwcError::BadParameter,
            HwcError::TransitionInProgress,
            HwcError::NotValidated,
        ];
        for (i, a) in all.iter().enumerate() {
            assert_ne!(a.status_code(), STATUS_OK);
            assert_eq!(HwcError::from_status_code(a.status_code()), Some(*a));
            for b in &all[i + 1..] {
                assert_ne!(a.status_code(), b.status_code());
            }
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(HwcError::NoResources.is_retryable());
        assert!(HwcError::TransitionInProgress.is_retryable());
        assert!(!HwcError::BadDisplay.is_retryable());
        assert_eq!(status_of::<()>(&Ok(())), STATUS_OK);
        assert_eq!(status_of::<()>(&Err(HwcError::BadLayer)), 3);
    }
}
