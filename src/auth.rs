//! HTTP Basic authentication gate for the admin area.
//!
//! Requests under the protected scope must carry
//! `Authorization: Basic base64(username:password)`. Anything else, including
//! a gate that was mounted without an [`AuthConfig`], is answered with a 401
//! challenge. Username and password are both compared in constant time.

use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    http::header,
    middleware::Next,
    web, Error, HttpResponse,
};
use base64::{
    alphabet,
    engine::{general_purpose, DecodePaddingMode, GeneralPurpose},
    Engine as _,
};
use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;

pub const DEFAULT_USERNAME: &str = "admin";
/// Placeholder only. Override `ADMIN_PASSWORD` in every real deployment.
pub const DEFAULT_PASSWORD: &str = "admin123";

pub const REALM_CHALLENGE: &str = r#"Basic realm="Admin Area""#;

const BASIC_PREFIX: &str = "Basic ";

// Clients differ on whether they pad; both forms decode to the same bytes.
const CREDENTIALS_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    general_purpose::PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,

    #[error("authorization header must use the Basic scheme")]
    UnsupportedScheme,

    #[error("credentials are not valid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("decoded credentials have no ':' separator")]
    MalformedCredentials,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("basic auth gate is mounted without configuration")]
    NotConfigured,
}

/// Expected admin credentials.
///
/// `Debug` redacts the password so the config can be logged safely.
#[derive(Clone)]
pub struct AuthConfig {
    username: String,
    password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(DEFAULT_USERNAME, DEFAULT_PASSWORD)
    }
}

impl AuthConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// True when either secret still has its placeholder value.
    pub fn uses_default_credentials(&self) -> bool {
        self.username == DEFAULT_USERNAME || self.password == DEFAULT_PASSWORD
    }

    /// Check a raw `Authorization` header value against the expected pair.
    ///
    /// Both fields are always compared, so a wrong username costs the same
    /// as a wrong password.
    pub fn verify(&self, header_value: Option<&str>) -> Result<(), AuthError> {
        let credentials = parse_basic_credentials(header_value)?;

        let username_ok = ct_match(&credentials.username, self.username.as_bytes());
        let password_ok = ct_match(&credentials.password, self.password.as_bytes());

        if bool::from(username_ok & password_ok) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

/// Decoded `username:password` pair, kept as raw bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Parse an `Authorization` header value of the form `Basic <base64>`.
///
/// The payload is split on the first `:` only, so passwords may contain
/// colons.
pub fn parse_basic_credentials(header_value: Option<&str>) -> Result<Credentials, AuthError> {
    let header_value = header_value.ok_or(AuthError::MissingHeader)?;
    let encoded = header_value
        .strip_prefix(BASIC_PREFIX)
        .ok_or(AuthError::UnsupportedScheme)?;

    let decoded = CREDENTIALS_ENGINE.decode(encoded.trim())?;

    let separator = decoded
        .iter()
        .position(|&b| b == b':')
        .ok_or(AuthError::MalformedCredentials)?;

    Ok(Credentials {
        username: decoded[..separator].to_vec(),
        password: decoded[separator + 1..].to_vec(),
    })
}

fn ct_match(provided: &[u8], expected: &[u8]) -> Choice {
    if provided.len() != expected.len() {
        // Keep the work proportional to the secret, not to the mismatch.
        let _ = expected.ct_eq(expected);
        return Choice::from(0);
    }
    provided.ct_eq(expected)
}

/// Constant-time byte comparison.
///
/// Does not stop at the first differing byte. When lengths differ a dummy
/// comparison over `expected` still runs before returning `false`.
pub fn constant_time_eq(provided: &[u8], expected: &[u8]) -> bool {
    ct_match(provided, expected).into()
}

pub fn unauthorized_response() -> HttpResponse {
    HttpResponse::Unauthorized()
        .insert_header((header::WWW_AUTHENTICATE, REALM_CHALLENGE))
        .insert_header((header::CONTENT_TYPE, "text/plain"))
        .body("Unauthorized")
}

/// Middleware for `actix_web::middleware::from_fn`.
///
/// Reads the expected credentials from `web::Data<AuthConfig>` app data and
/// forwards the request untouched when they match.
pub async fn basic_auth_gate<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    let verdict = match req.app_data::<web::Data<AuthConfig>>() {
        Some(config) => {
            let header_value = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());
            config.verify(header_value)
        }
        None => Err(AuthError::NotConfigured),
    };

    match verdict {
        Ok(()) => Ok(next.call(req).await?.map_into_left_body()),
        Err(err) => {
            tracing::warn!(path = %req.path(), reason = %err, "admin authentication failed");
            Ok(req
                .into_response(unauthorized_response())
                .map_into_right_body())
        }
    }
}
