//! Portal errors.

use thiserror::Error;

/// Identity provider error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Confirmation or reset code does not match.
    #[error("the code provided is not valid")]
    CodeMismatch,

    /// Code is no longer valid.
    #[error("the code has expired")]
    ExpiredCode,

    /// A parameter was rejected.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Password does not satisfy the pool's policy.
    #[error("password does not conform to policy: {0}")]
    InvalidPassword(String),

    /// Wrong credentials or token.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// User not found.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Username already taken.
    #[error("user already exists: {0}")]
    UsernameExists(String),

    /// Registration not yet confirmed.
    #[error("user is not confirmed")]
    UserNotConfirmed,

    /// Any other provider failure.
    #[error("identity service error: {0}")]
    Service(String),
}

impl IdentityError {
    /// Provider error name, as reported on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CodeMismatch => "CodeMismatchException",
            Self::ExpiredCode => "ExpiredCodeException",
            Self::InvalidParameter(_) => "InvalidParameterException",
            Self::InvalidPassword(_) => "InvalidPasswordException",
            Self::NotAuthorized(_) => "NotAuthorizedException",
            Self::UserNotFound(_) => "UserNotFoundException",
            Self::UsernameExists(_) => "UsernameExistsException",
            Self::UserNotConfirmed => "UserNotConfirmedException",
            Self::Service(_) => "ServiceException",
        }
    }

    /// Map a provider error name and message onto a variant.
    pub fn from_name(name: &str, message: &str) -> Self {
        let message = message.to_string();
        match name {
            "CodeMismatchException" => Self::CodeMismatch,
            "ExpiredCodeException" => Self::ExpiredCode,
            "InvalidParameterException" => Self::InvalidParameter(message),
            "InvalidPasswordException" => Self::InvalidPassword(message),
            "NotAuthorizedException" => Self::NotAuthorized(message),
            "UserNotFoundException" => Self::UserNotFound(message),
            "UsernameExistsException" => Self::UsernameExists(message),
            "UserNotConfirmedException" => Self::UserNotConfirmed,
            _ => Self::Service(format!("{}: {}", name, message)),
        }
    }
}

/// Page controller error type.
#[derive(Error, Debug)]
pub enum PortalError {
    /// Identity provider call failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Backend could not be reached.
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("backend returned status {status}")]
    Status { status: u16 },

    /// Backend answered `success: false`.
    #[error("{0}")]
    Rejected(String),

    /// Form input failed validation.
    #[error("{0}")]
    Invalid(String),

    /// A value the page expects in session or local storage is absent.
    #[error("missing stored value: {0}")]
    Missing(&'static str),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid URL.
    #[error("invalid url: {0}")]
    Url(String),
}

impl PortalError {
    /// Check if this failure came from the identity provider.
    pub fn is_identity(&self) -> bool {
        matches!(self, PortalError::Identity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_identity_names_roundtrip() {
        for e in [
            IdentityError::CodeMismatch,
            IdentityError::InvalidParameter("x".to_string()),
            IdentityError::UsernameExists("x".to_string()),
        ] {
            assert_eq!(IdentityError::from_name(e.name(), "x").name(), e.name());
        }
        assert!(matches!(
            IdentityError::from_name("TooManyRequestsException", "slow down"),
            IdentityError::Service(m) if m.contains("slow down")
        ));
    }

    #[test]
    fn test_error_portal_display() {
        let e: PortalError = IdentityError::CodeMismatch.into();
        assert!(e.is_identity());
        assert_eq!(e.to_string(), "the code provided is not valid");
        assert_eq!(PortalError::Status { status: 500 }.to_string(), "backend returned status 500");
    }
}
