use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::AuthError;
use crate::config;

/// An OAuth access credential in the authorized-user JSON layout.
///
/// The same layout is accepted from an injected secret and from the token
/// file, so a token printed by `reelpost auth login` can be pasted anywhere.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "token", alias = "access_token")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, with = "expiry_format", skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    config::DEFAULT_TOKEN_URI.to_string()
}

impl Credential {
    pub fn new(access_token: impl Into<String>, scope: &str) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_uri: default_token_uri(),
            client_id: None,
            client_secret: None,
            scopes: vec![scope.to_string()],
            expiry: None,
        }
    }

    /// Parse a stored payload. Any syntax or shape problem is [`AuthError::Malformed`].
    pub fn from_json(payload: &str) -> Result<Self, AuthError> {
        let cred: Credential =
            serde_json::from_str(payload.trim()).map_err(|e| AuthError::Malformed(e.to_string()))?;
        if cred.access_token.trim().is_empty() && cred.refresh_token.is_none() {
            return Err(AuthError::Malformed("neither token nor refresh_token present".into()));
        }
        Ok(cred)
    }

    pub fn to_json(&self) -> Result<String, AuthError> {
        serde_json::to_string(self).map_err(|e| AuthError::Malformed(e.to_string()))
    }

    /// An empty scope list means the grant was issued for whatever was asked.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.is_empty() || self.scopes.iter().any(|s| s == scope)
    }

    /// Expired, or expiring within the skew window.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.trim().is_empty() {
            return true;
        }
        match self.expiry {
            Some(expiry) => expiry <= now + Duration::seconds(config::EXPIRY_SKEW_SECS),
            None => false,
        }
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now)
    }

    pub fn is_refreshable(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// RFC 3339 with a `Z` suffix on output; naive timestamps are read as UTC.
mod expiry_format {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let Some(raw) = Option::<String>::deserialize(d)? else {
            return Ok(None);
        };
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(ts.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Some(naive.and_utc()))
            .map_err(serde::de::Error::custom)
    }
}
