//! In-memory proxy used by flow tests.
//!
//! Start endpoints answer with whatever was scripted via the `set_*`
//! methods; action endpoints succeed unless a failure was scripted with
//! [`MockProxyApi::fail`]. Every call is recorded in `call_log`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::client::ProxyApi;
use super::error::ApiError;
use super::types::{
    ActivateUserRequest, AdminInfo, AppInfo, CreateDeviceRequest, CreateDeviceResponse, Device,
    DeviceConfig, EnrollmentSettings, EnrollmentStartResponse, OpenIdAuthInfoRequest,
    OpenIdAuthInfoResponse, OpenIdCallbackRequest, OpenIdCallbackResponse,
    PasswordResetFinishRequest, PasswordResetRequest, PasswordResetStartResponse, TokenRequest,
    UserInfo,
};

/// A recorded proxy call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub endpoint: &'static str,
    pub args: Vec<String>,
}

type Slot<T> = Arc<Mutex<Option<Result<T, ApiError>>>>;

#[derive(Clone, Default)]
pub struct MockProxyApi {
    enrollment_start: Slot<EnrollmentStartResponse>,
    password_reset_start: Slot<PasswordResetStartResponse>,
    openid_callback: Slot<OpenIdCallbackResponse>,
    openid_auth_info: Arc<Mutex<Option<OpenIdAuthInfoResponse>>>,
    /// Scripted failures for any endpoint, keyed by endpoint name
    failures: Arc<Mutex<HashMap<&'static str, ApiError>>>,
    next_device_id: Arc<Mutex<i64>>,
    /// Record of calls made
    pub call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl MockProxyApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enrollment_start(&self, response: Result<EnrollmentStartResponse, ApiError>) {
        *self.enrollment_start.lock().unwrap() = Some(response);
    }

    pub fn set_password_reset_start(&self, response: Result<PasswordResetStartResponse, ApiError>) {
        *self.password_reset_start.lock().unwrap() = Some(response);
    }

    pub fn set_openid_callback(&self, response: Result<OpenIdCallbackResponse, ApiError>) {
        *self.openid_callback.lock().unwrap() = Some(response);
    }

    pub fn set_openid_auth_info(&self, info: Option<OpenIdAuthInfoResponse>) {
        *self.openid_auth_info.lock().unwrap() = info;
    }

    /// Make `endpoint` fail with `error` until cleared
    pub fn fail(&self, endpoint: &'static str, error: ApiError) {
        self.failures.lock().unwrap().insert(endpoint, error);
    }

    pub fn clear_failure(&self, endpoint: &'static str) {
        self.failures.lock().unwrap().remove(endpoint);
    }

    /// Endpoints called so far, in order
    pub fn endpoints_called(&self) -> Vec<&'static str> {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.endpoint)
            .collect()
    }

    fn record(&self, endpoint: &'static str, args: &[&str]) -> Result<(), ApiError> {
        self.call_log.lock().unwrap().push(MockCall {
            endpoint,
            args: args.iter().map(|s| (*s).to_string()).collect(),
        });
        match self.failures.lock().unwrap().get(endpoint) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn take_scripted<T: Clone>(slot: &Slot<T>, endpoint: &str) -> Result<T, ApiError> {
        slot.lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(ApiError::http(500, format!("no scripted {endpoint}"))))
    }
}

#[async_trait]
impl ProxyApi for MockProxyApi {
    async fn start_enrollment(
        &self,
        req: &TokenRequest,
    ) -> Result<EnrollmentStartResponse, ApiError> {
        self.record("enrollment_start", &[&req.token])?;
        Self::take_scripted(&self.enrollment_start, "enrollment_start")
    }

    async fn activate_user(&self, req: &ActivateUserRequest) -> Result<(), ApiError> {
        let phone = req.phone_number.clone().unwrap_or_default();
        self.record("activate_user", &[&phone])
    }

    async fn create_device(
        &self,
        req: &CreateDeviceRequest,
    ) -> Result<CreateDeviceResponse, ApiError> {
        self.record("create_device", &[&req.name, &req.pubkey])?;
        let mut next_id = self.next_device_id.lock().unwrap();
        *next_id += 1;
        Ok(CreateDeviceResponse {
            device: Device {
                id: *next_id,
                name: req.name.clone(),
                pubkey: req.pubkey.clone(),
                user_id: 1,
                created_at: 1_700_000_000,
            },
            configs: vec![DeviceConfig {
                network_id: 1,
                network_name: "office".to_string(),
                config: format!("[Interface]\n# {}\n", req.name),
            }],
        })
    }

    async fn request_password_reset(&self, req: &PasswordResetRequest) -> Result<(), ApiError> {
        self.record("password_reset_request", &[&req.email])
    }

    async fn start_password_reset(
        &self,
        req: &TokenRequest,
    ) -> Result<PasswordResetStartResponse, ApiError> {
        self.record("password_reset_start", &[&req.token])?;
        Self::take_scripted(&self.password_reset_start, "password_reset_start")
    }

    async fn reset_password(&self, _req: &PasswordResetFinishRequest) -> Result<(), ApiError> {
        self.record("password_reset_reset", &[])
    }

    async fn openid_auth_info(
        &self,
        req: &OpenIdAuthInfoRequest,
    ) -> Result<Option<OpenIdAuthInfoResponse>, ApiError> {
        let state = req.state.clone().unwrap_or_default();
        self.record("openid_auth_info", &[&state])?;
        Ok(self.openid_auth_info.lock().unwrap().clone())
    }

    async fn openid_callback(
        &self,
        req: &OpenIdCallbackRequest,
    ) -> Result<OpenIdCallbackResponse, ApiError> {
        self.record("openid_callback", &[&req.code, &req.state])?;
        Self::take_scripted(&self.openid_callback, "openid_callback")
    }

    async fn openid_mfa_callback(&self, req: &OpenIdCallbackRequest) -> Result<(), ApiError> {
        self.record("openid_mfa_callback", &[&req.code, &req.state])
    }

    async fn app_info(&self) -> Result<AppInfo, ApiError> {
        self.record("app_info", &[])?;
        Ok(AppInfo {
            version: "1.0.0-mock".to_string(),
        })
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

pub fn sample_admin() -> AdminInfo {
    AdminInfo {
        name: "Grace Hopper".to_string(),
        email: "admin@example.com".to_string(),
        phone_number: None,
    }
}

pub fn sample_user() -> UserInfo {
    UserInfo {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        login: "ada".to_string(),
        email: "ada@example.com".to_string(),
        phone_number: Some("+44 20 7946 0000".to_string()),
        is_admin: false,
    }
}

pub fn enrollment_response(deadline_timestamp: Option<i64>) -> EnrollmentStartResponse {
    EnrollmentStartResponse {
        admin: sample_admin(),
        user: sample_user(),
        deadline_timestamp,
        final_page_content: "## You're all set".to_string(),
        settings: EnrollmentSettings {
            vpn_setup_optional: false,
            only_client_activation: false,
            admin_device_management: false,
        },
    }
}

pub fn password_reset_response(deadline_timestamp: Option<i64>) -> PasswordResetStartResponse {
    PasswordResetStartResponse {
        admin: sample_admin(),
        user: sample_user(),
        deadline_timestamp,
    }
}
