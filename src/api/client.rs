//! HTTP client for the proxy REST API.
//!
//! The proxy keeps the enrollment session in a private cookie set by
//! `/enrollment/start`, so the client keeps a cookie store for its lifetime.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::types::{
    ActivateUserRequest, AppInfo, CreateDeviceRequest, CreateDeviceResponse,
    EnrollmentStartResponse, OpenIdAuthInfoRequest, OpenIdAuthInfoResponse,
    OpenIdCallbackRequest, OpenIdCallbackResponse, PasswordResetFinishRequest,
    PasswordResetRequest, PasswordResetStartResponse, TokenRequest,
};
use crate::config::ApiConfig;

/// Operations the wizard flows need from the proxy
#[async_trait]
pub trait ProxyApi: Send + Sync {
    async fn start_enrollment(&self, req: &TokenRequest)
        -> Result<EnrollmentStartResponse, ApiError>;

    async fn activate_user(&self, req: &ActivateUserRequest) -> Result<(), ApiError>;

    async fn create_device(
        &self,
        req: &CreateDeviceRequest,
    ) -> Result<CreateDeviceResponse, ApiError>;

    async fn request_password_reset(&self, req: &PasswordResetRequest) -> Result<(), ApiError>;

    async fn start_password_reset(
        &self,
        req: &TokenRequest,
    ) -> Result<PasswordResetStartResponse, ApiError>;

    async fn reset_password(&self, req: &PasswordResetFinishRequest) -> Result<(), ApiError>;

    /// `None` when OpenID is not configured on the proxy
    async fn openid_auth_info(
        &self,
        req: &OpenIdAuthInfoRequest,
    ) -> Result<Option<OpenIdAuthInfoResponse>, ApiError>;

    async fn openid_callback(
        &self,
        req: &OpenIdCallbackRequest,
    ) -> Result<OpenIdCallbackResponse, ApiError>;

    async fn openid_mfa_callback(&self, req: &OpenIdCallbackRequest) -> Result<(), ApiError>;

    async fn app_info(&self) -> Result<AppInfo, ApiError>;
}

/// Error body produced by the proxy: `{"error": "..."}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Pull the proxy's error message out of a response body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// reqwest-backed proxy client
pub struct HttpProxyClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpProxyClient {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_post<B>(&self, path: &str, body: &B) -> Result<reqwest::Response, ApiError>
    where
        B: Serialize + Sync + ?Sized,
    {
        tracing::debug!(path, "POST");
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::check_status(path, response).await
    }

    async fn check_status(
        path: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(path.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        tracing::warn!(path, status = status.as_u16(), %message, "proxy request failed");
        Err(ApiError::http(status.as_u16(), message))
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send_post(path, body).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// POST where the proxy answers with an empty body or `{}`
    async fn post_empty<B>(&self, path: &str, body: &B) -> Result<(), ApiError>
    where
        B: Serialize + Sync + ?Sized,
    {
        self.send_post(path, body).await?;
        Ok(())
    }
}

#[async_trait]
impl ProxyApi for HttpProxyClient {
    async fn start_enrollment(
        &self,
        req: &TokenRequest,
    ) -> Result<EnrollmentStartResponse, ApiError> {
        self.post_json("/enrollment/start", req).await
    }

    async fn activate_user(&self, req: &ActivateUserRequest) -> Result<(), ApiError> {
        self.post_empty("/enrollment/activate_user", req).await
    }

    async fn create_device(
        &self,
        req: &CreateDeviceRequest,
    ) -> Result<CreateDeviceResponse, ApiError> {
        self.post_json("/enrollment/create_device", req).await
    }

    async fn request_password_reset(&self, req: &PasswordResetRequest) -> Result<(), ApiError> {
        self.post_empty("/password-reset/request", req).await
    }

    async fn start_password_reset(
        &self,
        req: &TokenRequest,
    ) -> Result<PasswordResetStartResponse, ApiError> {
        self.post_json("/password-reset/start", req).await
    }

    async fn reset_password(&self, req: &PasswordResetFinishRequest) -> Result<(), ApiError> {
        self.post_empty("/password-reset/reset", req).await
    }

    async fn openid_auth_info(
        &self,
        req: &OpenIdAuthInfoRequest,
    ) -> Result<Option<OpenIdAuthInfoResponse>, ApiError> {
        // The proxy answers 404 when no OpenID provider is configured
        match self.post_json("/openid/auth_info", req).await {
            Ok(info) => Ok(Some(info)),
            Err(ApiError::NotFound(_)) => {
                tracing::debug!("OpenID is not configured on the proxy");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn openid_callback(
        &self,
        req: &OpenIdCallbackRequest,
    ) -> Result<OpenIdCallbackResponse, ApiError> {
        self.post_json("/openid/callback", req).await
    }

    async fn openid_mfa_callback(&self, req: &OpenIdCallbackRequest) -> Result<(), ApiError> {
        self.post_empty("/openid/callback/mfa", req).await
    }

    async fn app_info(&self) -> Result<AppInfo, ApiError> {
        let path = "/info";
        tracing::debug!(path, "GET");
        let response = self.client.get(self.url(path)).send().await?;
        Self::check_status(path, response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_error_message_from_json_body() {
        assert_eq!(error_message(r#"{"error":"Unauthorized"}"#), "Unauthorized");
    }

    #[test]
    fn test_error_message_falls_back_to_text() {
        assert_eq!(error_message("  upstream timeout \n"), "upstream timeout");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let mut config = Config::default();
        config.api.base_url = "https://proxy.example.com/api/v1/".to_string();
        let client = HttpProxyClient::new(&config.api).unwrap();
        assert_eq!(client.base_url(), "https://proxy.example.com/api/v1");
        assert_eq!(
            client.url("/enrollment/start"),
            "https://proxy.example.com/api/v1/enrollment/start"
        );
    }
}
