//! Server payloads kept by a wizard session, validated at the API boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::PayloadError;
use crate::api::types::{
    AdminInfo, EnrollmentSettings, EnrollmentStartResponse, PasswordResetStartResponse, UserInfo,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentPayload {
    pub admin: AdminInfo,
    pub user: UserInfo,
    /// Markdown shown on the final step
    pub final_page_content: String,
    pub settings: EnrollmentSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordResetPayload {
    pub admin: AdminInfo,
    pub user: UserInfo,
}

/// Payload received when a flow starts, one variant per flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum SessionPayload {
    Enrollment(EnrollmentPayload),
    PasswordReset(PasswordResetPayload),
}

impl SessionPayload {
    pub fn admin(&self) -> &AdminInfo {
        match self {
            SessionPayload::Enrollment(p) => &p.admin,
            SessionPayload::PasswordReset(p) => &p.admin,
        }
    }

    pub fn user(&self) -> &UserInfo {
        match self {
            SessionPayload::Enrollment(p) => &p.user,
            SessionPayload::PasswordReset(p) => &p.user,
        }
    }

    pub fn as_enrollment(&self) -> Option<&EnrollmentPayload> {
        match self {
            SessionPayload::Enrollment(p) => Some(p),
            SessionPayload::PasswordReset(_) => None,
        }
    }
}

/// Convert a server `deadline_timestamp` (unix seconds) into an absolute deadline
pub fn deadline_from_unix(timestamp: Option<i64>) -> Result<DateTime<Utc>, PayloadError> {
    let secs = timestamp.ok_or(PayloadError::MissingDeadline)?;
    DateTime::<Utc>::from_timestamp(secs, 0).ok_or(PayloadError::InvalidDeadline(secs))
}

/// A validated start response: everything `SessionStore::init` needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub payload: SessionPayload,
    pub deadline: DateTime<Utc>,
}

impl TryFrom<EnrollmentStartResponse> for SessionStart {
    type Error = PayloadError;

    fn try_from(resp: EnrollmentStartResponse) -> Result<Self, Self::Error> {
        let deadline = deadline_from_unix(resp.deadline_timestamp)?;
        Ok(Self {
            payload: SessionPayload::Enrollment(EnrollmentPayload {
                admin: resp.admin,
                user: resp.user,
                final_page_content: resp.final_page_content,
                settings: resp.settings,
            }),
            deadline,
        })
    }
}

impl TryFrom<PasswordResetStartResponse> for SessionStart {
    type Error = PayloadError;

    fn try_from(resp: PasswordResetStartResponse) -> Result<Self, Self::Error> {
        let deadline = deadline_from_unix(resp.deadline_timestamp)?;
        Ok(Self {
            payload: SessionPayload::PasswordReset(PasswordResetPayload {
                admin: resp.admin,
                user: resp.user,
            }),
            deadline,
        })
    }
}
