//! Password reset: request a link by email, open it, choose a new password.

use std::sync::Arc;

use super::{expect_step, required, FlowError};
use crate::api::types::{PasswordResetFinishRequest, PasswordResetRequest, TokenRequest};
use crate::api::ProxyApi;
use crate::session::{
    PasswordResetStep, Route, SessionPayload, SessionStart, WatchdogState, WizardError,
    WizardSession, WizardStep,
};

pub struct PasswordResetFlow {
    api: Arc<dyn ProxyApi>,
    session: WizardSession<PasswordResetStep>,
}

impl PasswordResetFlow {
    pub fn new(api: Arc<dyn ProxyApi>, session: WizardSession<PasswordResetStep>) -> Self {
        Self { api, session }
    }

    pub fn session(&self) -> &WizardSession<PasswordResetStep> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut WizardSession<PasswordResetStep> {
        &mut self.session
    }

    /// Ask the proxy to email a reset link
    pub async fn request(&mut self, email: &str) -> Result<(), FlowError> {
        let email = required("email", email)?;
        self.api
            .request_password_reset(&PasswordResetRequest { email })
            .await?;
        self.session.go_to(PasswordResetStep::LinkSent)?;
        tracing::info!("password reset link requested");
        Ok(())
    }

    /// Open a reset link.
    ///
    /// A token the proxy refuses moves the wizard to the failure step and the
    /// error is returned.
    pub async fn start(&mut self, token: &str) -> Result<SessionPayload, FlowError> {
        let token = required("token", token)?;
        let response = match self.api.start_password_reset(&TokenRequest { token }).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "password reset link rejected");
                self.session.go_to(PasswordResetStep::Failure)?;
                return Err(e.into());
            }
        };

        let start = SessionStart::try_from(response)?;
        let payload = start.payload.clone();
        if self.session.start(start)? == WatchdogState::Expired {
            tracing::warn!("password reset session expired on arrival");
            return Err(WizardError::SessionExpired.into());
        }
        self.session.go_to(PasswordResetStep::Password)?;
        self.session.navigator().navigate(Route::PasswordReset);
        tracing::info!(user = %payload.user().login, "password reset started");
        Ok(payload)
    }

    pub async fn reset_password(&mut self, password: &str) -> Result<(), FlowError> {
        if !self.session.is_started() {
            return Err(FlowError::NotStarted);
        }
        expect_step(self.session.current_step(), PasswordResetStep::Password)?;
        if password.is_empty() {
            return Err(FlowError::EmptyField("password"));
        }

        if self.session.evaluate()? == WatchdogState::Expired {
            return Err(WizardError::SessionExpired.into());
        }

        self.api
            .reset_password(&PasswordResetFinishRequest {
                password: password.to_string(),
            })
            .await?;
        self.session.go_to(PasswordResetStep::Success)?;
        tracing::info!("password changed");
        Ok(())
    }

    /// Return to the email form from the link-sent screen
    pub fn back(&mut self) -> Result<PasswordResetStep, FlowError> {
        let step = self.session.current_step().ok_or(FlowError::NotStarted)?;
        if step.back_disabled() {
            return Err(WizardError::BackDisabled.into());
        }
        self.session.previous()?;
        self.session.current_step().ok_or(FlowError::NotStarted)
    }

    pub fn finish(&mut self) -> Result<(), FlowError> {
        expect_step(self.session.current_step(), PasswordResetStep::Success)?;
        self.session.complete()?;
        Ok(())
    }
}
