//! User-facing flows driving a [`WizardSession`](crate::session::WizardSession)
//! against the proxy API.

pub mod enrollment;
pub mod openid;
pub mod password_reset;

use thiserror::Error;

use crate::api::ApiError;
use crate::session::{PayloadError, WizardError, WizardStep};

pub use enrollment::EnrollmentFlow;
pub use openid::OpenIdFlow;
pub use password_reset::PasswordResetFlow;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Wizard(#[from] WizardError),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("no active session, start the flow first")]
    NotStarted,

    #[error("this action belongs to step '{expected}', the session is on '{actual}'")]
    WrongStep {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("a VPN device is required before finishing enrollment")]
    DeviceRequired,
}

impl FlowError {
    /// The session deadline passed while the flow was running
    pub fn is_expired(&self) -> bool {
        matches!(self, FlowError::Wizard(WizardError::SessionExpired))
    }
}

/// Trimmed `value`, or [`FlowError::EmptyField`]
pub(crate) fn required(field: &'static str, value: &str) -> Result<String, FlowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FlowError::EmptyField(field));
    }
    Ok(trimmed.to_string())
}

/// Fail unless the session is on `expected`
pub(crate) fn expect_step<S: WizardStep>(current: Option<S>, expected: S) -> Result<(), FlowError> {
    match current {
        Some(step) if step == expected => Ok(()),
        Some(step) => Err(FlowError::WrongStep {
            expected: expected.label(),
            actual: step.label(),
        }),
        None => Err(FlowError::NotStarted),
    }
}
