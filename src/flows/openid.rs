//! OpenID login for enrollment and MFA.

use std::sync::Arc;

use super::{required, FlowError};
use crate::api::types::{
    OpenIdAuthInfoRequest, OpenIdAuthInfoResponse, OpenIdCallbackRequest, OpenIdCallbackResponse,
    OpenIdFlowType,
};
use crate::api::ProxyApi;

/// `code` and `state` query parameters from the provider redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

impl CallbackParams {
    pub fn parse(code: &str, state: &str) -> Result<Self, FlowError> {
        Ok(Self {
            code: required("code", code)?,
            state: required("state", state)?,
        })
    }

    fn into_request(self, flow_type: OpenIdFlowType) -> OpenIdCallbackRequest {
        OpenIdCallbackRequest {
            code: self.code,
            state: self.state,
            flow_type,
        }
    }
}

pub struct OpenIdFlow {
    api: Arc<dyn ProxyApi>,
}

impl OpenIdFlow {
    pub fn new(api: Arc<dyn ProxyApi>) -> Self {
        Self { api }
    }

    /// Provider login URL, or `None` when OpenID is not configured
    pub async fn auth_info(
        &self,
        flow_type: OpenIdFlowType,
        state: Option<&str>,
    ) -> Result<Option<OpenIdAuthInfoResponse>, FlowError> {
        let req = OpenIdAuthInfoRequest {
            state: state.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
            flow_type,
        };
        let info = self.api.openid_auth_info(&req).await?;
        if info.is_none() {
            tracing::debug!("openid is not configured on the proxy");
        }
        Ok(info)
    }

    /// Complete an enrollment login. The returned token starts an
    /// [`EnrollmentFlow`](super::EnrollmentFlow).
    pub async fn enrollment_callback(
        &self,
        params: CallbackParams,
    ) -> Result<OpenIdCallbackResponse, FlowError> {
        let response = self
            .api
            .openid_callback(&params.into_request(OpenIdFlowType::Enrollment))
            .await?;
        tracing::info!(url = %response.url, "openid enrollment callback accepted");
        Ok(response)
    }

    pub async fn mfa_callback(&self, params: CallbackParams) -> Result<(), FlowError> {
        self.api
            .openid_mfa_callback(&params.into_request(OpenIdFlowType::Mfa))
            .await?;
        tracing::info!("openid mfa callback accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, MockProxyApi};

    #[test]
    fn test_params_are_trimmed_and_required() {
        let params = CallbackParams::parse(" abc ", "xyz\n").unwrap();
        assert_eq!(params.code, "abc");
        assert_eq!(params.state, "xyz");

        assert!(matches!(
            CallbackParams::parse("", "xyz"),
            Err(FlowError::EmptyField("code"))
        ));
        assert!(matches!(
            CallbackParams::parse("abc", "  "),
            Err(FlowError::EmptyField("state"))
        ));
    }

    #[tokio::test]
    async fn test_enrollment_callback_returns_token() {
        let mock = MockProxyApi::new();
        mock.set_openid_callback(Ok(OpenIdCallbackResponse {
            token: "enroll-token".to_string(),
            url: "https://proxy.example.com".to_string(),
        }));
        let flow = OpenIdFlow::new(Arc::new(mock.clone()));

        let resp = flow
            .enrollment_callback(CallbackParams::parse("c", "s").unwrap())
            .await
            .unwrap();
        assert_eq!(resp.token, "enroll-token");
        assert_eq!(mock.call_log.lock().unwrap()[0].args, vec!["c", "s"]);
    }

    #[tokio::test]
    async fn test_mfa_callback_error_propagates() {
        let mock = MockProxyApi::new();
        mock.fail("openid_mfa_callback", ApiError::http(401, "bad state"));
        let flow = OpenIdFlow::new(Arc::new(mock));

        let err = flow
            .mfa_callback(CallbackParams::parse("c", "s").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Api(ApiError::Http { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_auth_info_not_configured() {
        let mock = MockProxyApi::new();
        let flow = OpenIdFlow::new(Arc::new(mock.clone()));

        assert!(flow
            .auth_info(OpenIdFlowType::Enrollment, Some("  "))
            .await
            .unwrap()
            .is_none());

        mock.set_openid_auth_info(Some(OpenIdAuthInfoResponse {
            url: "https://idp.example.com/auth".to_string(),
            button_display_name: "Sign in with IdP".to_string(),
        }));
        let info = flow
            .auth_info(OpenIdFlowType::Mfa, Some("st"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.button_display_name, "Sign in with IdP");
    }
}
