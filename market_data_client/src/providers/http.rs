//! Shared HTTP client with the backend's credentials baked in.
//!
//! Every request to the backend (candles, indicators, and the event stream)
//! carries a bearer token and a session-identifying header. They are installed
//! once as default headers so callers never handle them.

use reqwest::{
    Client,
    header::{self, HeaderMap, HeaderName, HeaderValue},
};
use secrecy::{ExposeSecret, SecretString};
use shared_utils::env::{get_env_var, get_secret_var};
use snafu::ResultExt;

use crate::providers::{
    ClientBuildSnafu, InvalidCredentialSnafu, InvalidHeaderNameSnafu, MissingEnvVarSnafu,
    ProviderInitError,
};

/// Environment variable holding the bearer token.
pub const TOKEN_ENV: &str = "ANALYSIS_API_TOKEN";
/// Environment variable holding the session id.
pub const SESSION_ENV: &str = "ANALYSIS_SESSION_ID";
/// Header used for the session id unless configured otherwise.
pub const DEFAULT_SESSION_HEADER: &str = "x-session-id";

pub struct ApiCredentials {
    token: SecretString,
    session_id: String,
}

impl ApiCredentials {
    pub fn new(token: SecretString, session_id: impl Into<String>) -> Self {
        Self {
            token,
            session_id: session_id.into(),
        }
    }

    /// Reads credentials from `ANALYSIS_API_TOKEN` and `ANALYSIS_SESSION_ID`.
    pub fn from_env() -> Result<Self, ProviderInitError> {
        let token = get_secret_var(TOKEN_ENV).context(MissingEnvVarSnafu)?;
        let session_id = get_env_var(SESSION_ENV).context(MissingEnvVarSnafu)?;
        Ok(Self::new(token, session_id))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn headers(&self, session_header: &str) -> Result<HeaderMap, ProviderInitError> {
        let mut headers = HeaderMap::new();

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))
            .context(InvalidCredentialSnafu)?;
        bearer.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, bearer);

        let name = HeaderName::from_bytes(session_header.trim().as_bytes()).context(
            InvalidHeaderNameSnafu {
                name: session_header.to_string(),
            },
        )?;
        headers.insert(
            name,
            HeaderValue::from_str(&self.session_id).context(InvalidCredentialSnafu)?,
        );
        Ok(headers)
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("token", &"[REDACTED]")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Builds the `reqwest::Client` shared by the REST provider and the stream transport.
pub fn build_http_client(
    credentials: &ApiCredentials,
    session_header: &str,
) -> Result<Client, ProviderInitError> {
    let headers = credentials.headers(session_header)?;
    Client::builder()
        .default_headers(headers)
        .build()
        .context(ClientBuildSnafu)
}
