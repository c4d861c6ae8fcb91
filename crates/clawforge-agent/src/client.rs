//! Control-plane HTTP client.
//!
//! One shared async [`reqwest::Client`] behind typed methods for the three
//! endpoints the engine consumes: token exchange, heartbeat, and audit
//! ingest. All authenticated calls carry `Authorization: Bearer <token>`;
//! timestamps on the ingest path are epoch milliseconds.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use clawforge_core::audit::AuditEvent;
use clawforge_core::session::SessionTokens;

/// Errors from control-plane requests.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection, timeout, or response-decoding failure.
    #[error("control plane request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The control plane rejected our credentials.
    #[error("control plane rejected credentials")]
    Unauthorized,

    /// Any other non-2xx response.
    #[error("control plane returned status {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
    },

    /// The client was constructed with an unusable base URL.
    #[error("invalid control plane configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Returns `true` for an explicit credential rejection.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Grant types accepted by the token exchange endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// OIDC authorization code flow.
    AuthorizationCode,
    /// Direct ID token exchange.
    IdToken,
    /// Session refresh.
    RefreshToken,
}

/// Body of `POST /api/v1/auth/exchange`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    /// Which grant is being presented.
    pub grant_type: GrantType,

    /// Authorization code, for the code flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<String>,

    /// OIDC ID token, for direct exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Refresh token, for session refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl ExchangeRequest {
    /// An authorization-code exchange.
    #[must_use]
    pub fn authorization_code(code: impl Into<String>) -> Self {
        Self {
            grant_type: GrantType::AuthorizationCode,
            authorization_code: Some(code.into()),
            id_token: None,
            refresh_token: None,
        }
    }

    /// An ID-token exchange.
    #[must_use]
    pub fn id_token(token: impl Into<String>) -> Self {
        Self {
            grant_type: GrantType::IdToken,
            authorization_code: None,
            id_token: Some(token.into()),
            refresh_token: None,
        }
    }

    /// A refresh-token exchange.
    #[must_use]
    pub fn refresh_token(token: impl Into<String>) -> Self {
        Self {
            grant_type: GrantType::RefreshToken,
            authorization_code: None,
            id_token: None,
            refresh_token: Some(token.into()),
        }
    }
}

/// Response of the token exchange endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Bearer token for authenticated endpoints.
    pub access_token: String,
    /// Refresh token, when the grant issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token expiry, epoch milliseconds.
    pub expires_at: i64,
    /// The authenticated user.
    pub user_id: String,
    /// The user's organization, when known to the identity provider.
    #[serde(default)]
    pub org_id: Option<String>,
}

impl AuthResponse {
    /// Convert the wire response into in-memory session tokens.
    #[must_use]
    pub fn into_session_tokens(self) -> SessionTokens {
        SessionTokens {
            access_token: SecretString::new(self.access_token),
            refresh_token: self.refresh_token.map(SecretString::new),
            expires_at_ms: self.expires_at,
            user_id: self.user_id,
            org_id: self.org_id,
        }
    }
}

/// Response of `GET /api/v1/heartbeat/{orgId}/{userId}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    /// Latest policy version known to the control plane.
    #[serde(default)]
    pub policy_version: u64,
    /// Whether the organization kill switch is engaged.
    #[serde(default)]
    pub kill_switch: bool,
    /// Operator message accompanying an engaged kill switch.
    #[serde(default)]
    pub kill_switch_message: Option<String>,
    /// Whether the client should refetch its policy now.
    #[serde(default)]
    pub refresh_policy_now: bool,
}

/// Body of the audit ingest endpoint.
#[derive(Debug, Serialize)]
struct AuditBatch<'a> {
    events: &'a [AuditEvent],
}

/// Typed client for the governance control plane.
#[derive(Debug)]
pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
}

impl ControlPlaneClient {
    /// Create a client for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is blank or the HTTP client cannot be
    /// constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(ClientError::Configuration(
                "control plane URL must not be empty".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self { http, base_url })
    }

    /// The configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), endpoint)
    }

    /// Exchange a grant for session tokens.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Unauthorized`] when the grant is rejected,
    /// [`ClientError::Status`] for other non-2xx responses, and
    /// [`ClientError::Transport`] for network or decoding failures.
    pub async fn exchange(&self, request: &ExchangeRequest) -> Result<AuthResponse, ClientError> {
        let response = self
            .http
            .post(self.build_url("/api/v1/auth/exchange"))
            .json(request)
            .send()
            .await?;

        Ok(Self::check(response)?.json().await?)
    }

    /// Probe the control plane for kill-switch and policy freshness.
    ///
    /// # Errors
    ///
    /// Same classification as [`exchange`](Self::exchange).
    pub async fn heartbeat(
        &self,
        org_id: &str,
        user_id: &str,
        access_token: &SecretString,
    ) -> Result<HeartbeatResponse, ClientError> {
        let response = self
            .http
            .get(self.build_url(&format!("/api/v1/heartbeat/{org_id}/{user_id}")))
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?;

        Ok(Self::check(response)?.json().await?)
    }

    /// Ship an ordered batch of audit events.
    ///
    /// # Errors
    ///
    /// Same classification as [`exchange`](Self::exchange).
    pub async fn ship_events(
        &self,
        org_id: &str,
        access_token: &SecretString,
        events: &[AuditEvent],
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.build_url(&format!("/api/v1/audit/{org_id}/events")))
            .bearer_auth(access_token.expose_secret())
            .json(&AuditBatch { events })
            .send()
            .await?;

        Self::check(response)?;
        Ok(())
    }

    fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            Err(ClientError::Unauthorized)
        } else {
            Err(ClientError::Status {
                status: status.as_u16(),
            })
        }
    }
}
