//! New-user enrollment: verify data, set a password, register a VPN device.

use std::sync::Arc;

use super::{expect_step, required, FlowError};
use crate::api::types::{ActivateUserRequest, CreateDeviceRequest, TokenRequest};
use crate::api::ProxyApi;
use crate::session::{
    DeviceState, EnrollmentPayload, EnrollmentStep, Route, SessionStart, WatchdogState,
    WizardError, WizardSession, WizardStep,
};

pub struct EnrollmentFlow {
    api: Arc<dyn ProxyApi>,
    session: WizardSession<EnrollmentStep>,
}

impl EnrollmentFlow {
    pub fn new(api: Arc<dyn ProxyApi>, session: WizardSession<EnrollmentStep>) -> Self {
        Self { api, session }
    }

    pub fn session(&self) -> &WizardSession<EnrollmentStep> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut WizardSession<EnrollmentStep> {
        &mut self.session
    }

    pub fn payload(&self) -> Option<EnrollmentPayload> {
        self.session
            .payload()
            .and_then(|p| p.as_enrollment().cloned())
    }

    /// Exchange an enrollment token for a new session.
    ///
    /// Nothing is stored unless the proxy accepts the token and the response
    /// carries a usable deadline.
    pub async fn start(&mut self, token: &str) -> Result<EnrollmentPayload, FlowError> {
        let token = required("token", token)?;
        let response = match self.api.start_enrollment(&TokenRequest { token }).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "enrollment start rejected");
                if e.is_rejection() {
                    self.session.navigator().navigate(Route::LinkInvalid);
                }
                return Err(e.into());
            }
        };

        let start = SessionStart::try_from(response)?;
        if self.session.start(start)? == WatchdogState::Expired {
            tracing::warn!("enrollment session expired on arrival");
            return Err(WizardError::SessionExpired.into());
        }
        self.session.navigator().navigate(Route::Enrollment);

        let payload = self.payload().ok_or(FlowError::NotStarted)?;
        tracing::info!(user = %payload.user.login, "enrollment started");
        Ok(payload)
    }

    /// Current step of a live session
    fn active_step(&mut self) -> Result<EnrollmentStep, FlowError> {
        if !self.session.is_started() {
            return Err(FlowError::NotStarted);
        }
        if self.session.evaluate()? == WatchdogState::Expired {
            return Err(WizardError::SessionExpired.into());
        }
        self.session.current_step().ok_or(FlowError::NotStarted)
    }

    /// Move to the next step.
    ///
    /// Leaving the device step needs a created device unless the proxy marked
    /// VPN setup as optional.
    pub fn advance(&mut self) -> Result<EnrollmentStep, FlowError> {
        let step = self.active_step()?;
        if step == EnrollmentStep::Device && self.session.device().is_none() {
            let optional = self
                .payload()
                .is_some_and(|p| p.settings.vpn_setup_optional);
            if !optional {
                return Err(FlowError::DeviceRequired);
            }
        }
        self.session.next()?;
        self.active_step()
    }

    pub fn back(&mut self) -> Result<EnrollmentStep, FlowError> {
        let step = self.active_step()?;
        if step.back_disabled() {
            return Err(WizardError::BackDisabled.into());
        }
        self.session.previous()?;
        self.active_step()
    }

    /// Set the account password, then move on to device setup
    pub async fn activate_user(
        &mut self,
        password: &str,
        phone_number: Option<&str>,
    ) -> Result<EnrollmentStep, FlowError> {
        expect_step(Some(self.active_step()?), EnrollmentStep::Password)?;
        if password.is_empty() {
            return Err(FlowError::EmptyField("password"));
        }

        let phone_number = phone_number
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        self.api
            .activate_user(&ActivateUserRequest {
                phone_number,
                password: password.to_string(),
            })
            .await?;
        tracing::info!("user activated");

        self.session.next()?;
        self.active_step()
    }

    /// Register a WireGuard public key as the user's first device
    pub async fn create_device(
        &mut self,
        name: &str,
        pubkey: &str,
    ) -> Result<DeviceState, FlowError> {
        expect_step(Some(self.active_step()?), EnrollmentStep::Device)?;
        let name = required("device name", name)?;
        let pubkey = required("public key", pubkey)?;

        let response = self
            .api
            .create_device(&CreateDeviceRequest { name, pubkey })
            .await?;
        tracing::info!(device_id = response.device.id, configs = response.configs.len(), "device created");

        let device = DeviceState {
            device: response.device,
            configs: response.configs,
        };
        self.session.set_device(device.clone())?;
        self.session.next()?;
        Ok(device)
    }

    /// Close the session from the final step; returns the final page content
    pub fn finish(&mut self) -> Result<String, FlowError> {
        expect_step(Some(self.active_step()?), EnrollmentStep::Finish)?;
        let content = self
            .payload()
            .map(|p| p.final_page_content)
            .unwrap_or_default();
        self.session.complete()?;
        tracing::info!("enrollment finished");
        Ok(content)
    }
}
