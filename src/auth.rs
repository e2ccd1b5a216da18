//! Route authentication.
//!
//! Each route may require one authentication method. Validation is a pure
//! function of the configured method and the inbound request.

use crate::config::StaticResponse;
use crate::error::{Result, StubError};
use crate::request::IncomingRequest;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Query parameter carrying the HMAC signature. Must be the last parameter.
pub const HMAC_SIGN_PARAM: &str = "hmac_sign";
/// Query parameter carrying the signing time in unix seconds.
pub const HMAC_TIMESTAMP_PARAM: &str = "hmac_timestamp";
/// How far in the past a signature timestamp may lie.
pub const HMAC_PAST_TOLERANCE_SECS: f64 = 3600.0;
/// How far in the future a signature timestamp may lie.
pub const HMAC_FUTURE_TOLERANCE_SECS: f64 = 5.0;

/// Authentication method required by a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Auth {
    /// `Authorization: Basic <base64(username:password)>`
    Basic {
        username: String,
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unauthorized_response: Option<StaticResponse>,
    },
    /// Named cookie with an exact value
    Cookie {
        name: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unauthorized_response: Option<StaticResponse>,
    },
    /// HMAC-SHA1 signature over path and query string
    Hmac {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unauthorized_response: Option<StaticResponse>,
    },
    /// Form fields that must be submitted with exact values
    Form {
        fields: IndexMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unauthorized_response: Option<StaticResponse>,
    },
    /// `Authorization: Bearer <token>`
    Token {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unauthorized_response: Option<StaticResponse>,
    },
}

impl Auth {
    /// Name of the method as used in configuration.
    pub fn method(&self) -> &'static str {
        match self {
            Auth::Basic { .. } => "basic",
            Auth::Cookie { .. } => "cookie",
            Auth::Hmac { .. } => "hmac",
            Auth::Form { .. } => "form",
            Auth::Token { .. } => "token",
        }
    }

    /// Response to emit when authentication fails, if configured.
    pub fn unauthorized_response(&self) -> Option<&StaticResponse> {
        match self {
            Auth::Basic {
                unauthorized_response,
                ..
            }
            | Auth::Cookie {
                unauthorized_response,
                ..
            }
            | Auth::Hmac {
                unauthorized_response,
                ..
            }
            | Auth::Form {
                unauthorized_response,
                ..
            }
            | Auth::Token {
                unauthorized_response,
                ..
            } => unauthorized_response.as_ref(),
        }
    }

    /// Check that all mandatory fields are present and non-empty.
    pub fn validate(&self) -> Result<()> {
        let missing = |field: &str| {
            StubError::invalid(format!(
                "{} authentication requires a non-empty \"{}\"",
                self.method(),
                field
            ))
        };

        match self {
            Auth::Basic {
                username, password, ..
            } => {
                if username.is_empty() {
                    return Err(missing("username"));
                }
                if password.is_empty() {
                    return Err(missing("password"));
                }
            }
            Auth::Cookie { name, value, .. } => {
                if name.is_empty() {
                    return Err(missing("name"));
                }
                if value.is_empty() {
                    return Err(missing("value"));
                }
            }
            Auth::Hmac { key, .. } => {
                if key.is_empty() {
                    return Err(missing("key"));
                }
            }
            Auth::Form { fields, .. } => {
                if fields.is_empty() || fields.iter().any(|(k, v)| k.is_empty() || v.is_empty()) {
                    return Err(missing("fields"));
                }
            }
            Auth::Token { token, .. } => {
                if token.is_empty() {
                    return Err(missing("token"));
                }
            }
        }

        if let Some(response) = self.unauthorized_response() {
            response.validate()?;
        }
        Ok(())
    }

    /// Authenticate a request, returning the reason on failure.
    pub fn authenticate(&self, request: &IncomingRequest) -> Result<()> {
        self.authenticate_at(request, Utc::now())
    }

    /// Whether the request passes this method.
    pub fn is_authenticated(&self, request: &IncomingRequest) -> bool {
        self.authenticate(request).is_ok()
    }

    pub(crate) fn authenticate_at(&self, request: &IncomingRequest, now: DateTime<Utc>) -> Result<()> {
        match self {
            Auth::Basic {
                username, password, ..
            } => {
                let header = authorization_header(request)?;
                let (sent_user, sent_pass) = decode_basic(header)?;
                if &sent_user != username || &sent_pass != password {
                    return Err(denied(format!("invalid credentials for user \"{}\"", sent_user)));
                }
            }
            Auth::Cookie { name, value, .. } => {
                let cookies = request.cookies();
                let sent = cookies
                    .get(name)
                    .ok_or_else(|| denied(format!("missing authentication cookie \"{}\"", name)))?;
                if sent != value {
                    return Err(denied(format!("incorrect value of cookie \"{}\"", name)));
                }
            }
            Auth::Hmac { key, .. } => verify_hmac(key, request, now)?,
            Auth::Form { fields, .. } => {
                let form = request.form();
                for (field, expected) in fields {
                    let sent = form
                        .get(field)
                        .ok_or_else(|| denied(format!("missing authentication field \"{}\"", field)))?;
                    if sent != expected {
                        return Err(denied(format!("incorrect value in field \"{}\"", field)));
                    }
                }
            }
            Auth::Token { token, .. } => {
                let header = authorization_header(request)?;
                let sent = header
                    .strip_prefix("Bearer ")
                    .ok_or_else(|| denied("authorization header is not a bearer token"))?;
                if sent != token.as_str() {
                    return Err(denied("authentication token doesn't match"));
                }
            }
        }
        Ok(())
    }
}

fn denied(reason: impl Into<String>) -> StubError {
    StubError::Unauthenticated(reason.into())
}

fn authorization_header(request: &IncomingRequest) -> Result<&str> {
    request
        .header("authorization")
        .ok_or_else(|| denied("missing authentication header \"Authorization\""))
}

/// Decode `Basic <base64>` into username and password.
fn decode_basic(header: &str) -> Result<(String, String)> {
    let encoded = match header.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("basic") => rest.trim(),
        Some(_) => return Err(denied("authorization header is not basic auth")),
        None => header.trim(),
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| denied("invalid basic authentication header"))?;
    let decoded =
        String::from_utf8(decoded).map_err(|_| denied("invalid basic authentication header"))?;
    let (user, pass) = decoded
        .split_once(':')
        .ok_or_else(|| denied("invalid basic authentication header"))?;
    Ok((user.to_string(), pass.to_string()))
}

/// Canonical string signed by HMAC clients: `<path>?<query without &hmac_sign=...>`.
pub fn hmac_canonical_string(path: &str, query: &str) -> String {
    let marker = format!("&{}=", HMAC_SIGN_PARAM);
    let signed_query = match query.find(&marker) {
        Some(pos) => &query[..pos],
        None => query,
    };
    format!("{}?{}", path, signed_query)
}

/// Lowercase hex HMAC-SHA1 of `message` under `key`.
pub fn hmac_signature(key: &str, message: &str) -> Result<String> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| StubError::invalid("invalid hmac key"))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn verify_hmac(key: &str, request: &IncomingRequest, now: DateTime<Utc>) -> Result<()> {
    let params = request.query_params();

    let timestamp = params
        .get(HMAC_TIMESTAMP_PARAM)
        .ok_or_else(|| denied(format!("URL is missing parameter \"{}\"", HMAC_TIMESTAMP_PARAM)))?;
    let timestamp = timestamp
        .parse::<f64>()
        .ok()
        .filter(|ts: &f64| ts.is_finite())
        .ok_or_else(|| denied(format!("invalid \"{}\" value", HMAC_TIMESTAMP_PARAM)))?;
    let signature = params
        .get(HMAC_SIGN_PARAM)
        .ok_or_else(|| denied(format!("URL is missing parameter \"{}\"", HMAC_SIGN_PARAM)))?;
    let signature = hex::decode(signature)
        .map_err(|_| denied(format!("\"{}\" is not a hex string", HMAC_SIGN_PARAM)))?;

    let canonical = hmac_canonical_string(&request.path, request.query.as_deref().unwrap_or(""));
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| denied("invalid hmac key"))?;
    mac.update(canonical.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| denied(format!("signature in \"{}\" is invalid", HMAC_SIGN_PARAM)))?;

    let now = now.timestamp_micros() as f64 / 1_000_000.0;
    if timestamp > now + HMAC_FUTURE_TOLERANCE_SECS {
        return Err(denied(format!(
            "\"{}\" is more than {} seconds in the future",
            HMAC_TIMESTAMP_PARAM, HMAC_FUTURE_TOLERANCE_SECS
        )));
    }
    if timestamp < now - HMAC_PAST_TOLERANCE_SECS {
        return Err(denied(format!(
            "\"{}\" is more than {} seconds in the past",
            HMAC_TIMESTAMP_PARAM, HMAC_PAST_TOLERANCE_SECS
        )));
    }
    Ok(())
}
