use thiserror::Error;

use crate::domain::conversation::ConversationStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid conversation transition from {from:?} to {to:?}")]
    InvalidStatusTransition { from: ConversationStatus, to: ConversationStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

/// Errors as they cross the HTTP boundary. Internals stay in the struct for
/// logs; `user_message` is the only text a customer ever sees.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("limit reached: {message}")]
    LimitReached { message: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Please check your message and try again."
            }
            Self::NotFound { .. } => "We couldn't find what you were looking for.",
            Self::LimitReached { .. } => {
                "This store's conversation limit has been reached. Please contact the store directly."
            }
            Self::ServiceUnavailable { .. } => {
                "I'm sorry, I'm having trouble right now. Please try again in a moment, or contact our support team directly."
            }
            Self::Internal { .. } => {
                "I'm sorry, something went wrong on our side. Please try again shortly."
            }
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(_) => {
                Self::BadRequest { message: "domain validation failed".to_owned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message }
            }
            ApplicationError::Configuration(message) => Self::Internal { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request() {
        let interface = InterfaceError::from(ApplicationError::from(
            DomainError::InvariantViolation("missing role".to_owned()),
        ));
        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface =
            InterfaceError::from(ApplicationError::Persistence("database locked".to_owned()));
        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn every_variant_has_a_customer_safe_message() {
        let variants = [
            InterfaceError::BadRequest { message: "x".to_owned() },
            InterfaceError::NotFound { message: "x".to_owned() },
            InterfaceError::LimitReached { message: "x".to_owned() },
            InterfaceError::ServiceUnavailable { message: "x".to_owned() },
            InterfaceError::Internal { message: "x".to_owned() },
        ];

        for variant in variants {
            let text = variant.user_message();
            assert!(!text.is_empty());
            assert!(!text.contains('{'), "no leaked formatting in: {text}");
        }
    }
}
