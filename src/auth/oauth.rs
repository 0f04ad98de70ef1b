use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::distributions::{Alphanumeric, DistString};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{AuthError, Credential};
use crate::config;
use crate::integrity;

const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth client registration, read from a downloaded `client_secret.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    config::DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    config::DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parse either the `installed` or the `web` application layout.
    pub fn from_json(payload: &str) -> Result<Self, AuthError> {
        let file: SecretsFile =
            serde_json::from_str(payload).map_err(|e| AuthError::Secrets(e.to_string()))?;
        file.installed
            .or(file.web)
            .ok_or_else(|| AuthError::Secrets("expected an \"installed\" or \"web\" section".into()))
    }

    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let payload = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Secrets(format!("{}: {e}", path.display())))?;
        Self::from_json(&payload)
    }
}

/// Successful response of the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Silent renewal of an expired credential.
pub trait TokenRefresher {
    fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError>;
}

/// Blocking client for the provider's token endpoint.
pub struct TokenEndpoint {
    http: Client,
}

impl TokenEndpoint {
    pub fn new() -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(TOKEN_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(Self { http })
    }

    fn post_form(&self, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse, String> {
        let response = self
            .http
            .post(token_uri)
            .form(form)
            .send()
            .map_err(|e| e.to_string())?;
        let status = response.status();
        let body = response.text().map_err(|e| e.to_string())?;
        if !status.is_success() {
            return Err(match serde_json::from_str::<TokenErrorBody>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{} ({desc})", err.error),
                    None => err.error,
                },
                Err(_) => format!("HTTP {status}"),
            });
        }
        serde_json::from_str(&body).map_err(|e| format!("unexpected token response: {e}"))
    }
}

impl TokenRefresher for TokenEndpoint {
    fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::Refresh("no refresh token".into()))?;
        let (Some(client_id), Some(client_secret)) =
            (credential.client_id.as_deref(), credential.client_secret.as_deref())
        else {
            return Err(AuthError::Refresh("credential carries no client id/secret".into()));
        };

        debug!("refreshing access token via {}", credential.token_uri);
        let response = self
            .post_form(
                &credential.token_uri,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                ],
            )
            .map_err(AuthError::Refresh)?;

        Ok(apply_token_response(credential.clone(), response, Utc::now()))
    }
}

fn apply_token_response(mut cred: Credential, response: TokenResponse, now: DateTime<Utc>) -> Credential {
    cred.access_token = response.access_token;
    if response.refresh_token.is_some() {
        cred.refresh_token = response.refresh_token;
    }
    if let Some(scope) = response.scope {
        cred.scopes = scope.split_whitespace().map(str::to_string).collect();
    }
    cred.expiry = response.expires_in.map(|secs| now + chrono::Duration::seconds(secs));
    cred
}

/// State carried between issuing an authorization URL and receiving the code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub state: String,
    pub code_verifier: String,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
}

impl PendingAuthorization {
    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(self).map_err(|e| AuthError::Malformed(e.to_string()))?;
        std::fs::write(path, payload)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let payload = match std::fs::read_to_string(path) {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(AuthError::NoPending),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&payload).map_err(|e| AuthError::Malformed(e.to_string()))
    }

    pub fn clear(path: &Path) -> Result<(), AuthError> {
        integrity::remove_if_exists(path)?;
        Ok(())
    }

    fn code_challenge(&self) -> String {
        URL_SAFE_NO_PAD.encode(integrity::sha256(self.code_verifier.as_bytes()))
    }
}

/// What the user brings back from the consent screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationReply {
    pub code: String,
    pub state: Option<String>,
}

impl AuthorizationReply {
    /// Accept either the full redirect URL or the bare code.
    ///
    /// Returns `Ok(None)` for blank input, and an error when the redirect
    /// carries `error=` (for example the user pressed "Cancel").
    pub fn parse(input: &str) -> Result<Option<Self>, AuthError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(None);
        }
        let Ok(url) = Url::parse(input) else {
            return Ok(Some(Self {
                code: input.to_string(),
                state: None,
            }));
        };
        Self::from_query(&url)
    }

    /// Extract the reply from a redirect URL's query string.
    pub fn from_query(url: &Url) -> Result<Option<Self>, AuthError> {
        let mut code = None;
        let mut state = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => return Err(AuthError::Denied(value.into_owned())),
                _ => {}
            }
        }
        Ok(code.map(|code| Self { code, state }))
    }
}

/// Authorization-code flow with PKCE for one fixed scope.
pub struct OAuthClient {
    secrets: ClientSecrets,
    scope: String,
    endpoint: TokenEndpoint,
}

impl OAuthClient {
    pub fn new(secrets: ClientSecrets, scope: impl Into<String>) -> Result<Self, AuthError> {
        Ok(Self {
            secrets,
            scope: scope.into(),
            endpoint: TokenEndpoint::new()?,
        })
    }

    /// Phase one: mint state and a PKCE verifier, and build the consent URL.
    pub fn begin(&self, redirect_uri: &str) -> Result<(Url, PendingAuthorization), AuthError> {
        let mut rng = rand::thread_rng();
        let pending = PendingAuthorization {
            state: Alphanumeric.sample_string(&mut rng, 32),
            code_verifier: Alphanumeric.sample_string(&mut rng, 64),
            redirect_uri: redirect_uri.to_string(),
            created_at: Utc::now(),
        };
        let url = self.authorization_url(&pending)?;
        Ok((url, pending))
    }

    pub fn authorization_url(&self, pending: &PendingAuthorization) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.secrets.auth_uri)
            .map_err(|e| AuthError::Secrets(format!("auth_uri: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.secrets.client_id)
            .append_pair("redirect_uri", &pending.redirect_uri)
            .append_pair("scope", &self.scope)
            .append_pair("state", &pending.state)
            .append_pair("code_challenge", &pending.code_challenge())
            .append_pair("code_challenge_method", "S256")
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url)
    }

    /// Phase two: check the state (when the reply carries one) and exchange the code.
    pub fn complete(
        &self,
        pending: &PendingAuthorization,
        reply: &AuthorizationReply,
    ) -> Result<Credential, AuthError> {
        if let Some(state) = &reply.state {
            if *state != pending.state {
                return Err(AuthError::StateMismatch);
            }
        }

        info!("exchanging authorization code");
        let response = self
            .endpoint
            .post_form(
                &self.secrets.token_uri,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", reply.code.as_str()),
                    ("redirect_uri", pending.redirect_uri.as_str()),
                    ("client_id", self.secrets.client_id.as_str()),
                    ("client_secret", self.secrets.client_secret.as_str()),
                    ("code_verifier", pending.code_verifier.as_str()),
                ],
            )
            .map_err(AuthError::Exchange)?;

        let base = Credential {
            client_id: Some(self.secrets.client_id.clone()),
            client_secret: Some(self.secrets.client_secret.clone()),
            token_uri: self.secrets.token_uri.clone(),
            ..Credential::new(String::new(), &self.scope)
        };
        Ok(apply_token_response(base, response, Utc::now()))
    }
}

impl TokenRefresher for OAuthClient {
    fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        self.endpoint.refresh(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRETS: &str = r#"{"installed":{"client_id":"cid.apps.googleusercontent.com","project_id":"p","auth_uri":"https://accounts.google.com/o/oauth2/auth","token_uri":"https://oauth2.googleapis.com/token","client_secret":"csecret","redirect_uris":["http://localhost"]}}"#;

    #[test]
    fn test_client_secrets_layouts() {
        let installed = ClientSecrets::from_json(SECRETS).unwrap();
        assert_eq!(installed.client_id, "cid.apps.googleusercontent.com");

        let web = ClientSecrets::from_json(r#"{"web":{"client_id":"w","client_secret":"s"}}"#).unwrap();
        assert_eq!(web.token_uri, config::DEFAULT_TOKEN_URI);

        assert!(matches!(ClientSecrets::from_json("{}"), Err(AuthError::Secrets(_))));
    }

    #[test]
    fn test_authorization_url_carries_pkce_and_state() {
        let client = OAuthClient::new(ClientSecrets::from_json(SECRETS).unwrap(), config::UPLOAD_SCOPE).unwrap();
        let (url, pending) = client.begin("http://127.0.0.1:8080/").unwrap();

        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "cid.apps.googleusercontent.com");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8080/");
        assert_eq!(params["scope"], config::UPLOAD_SCOPE);
        assert_eq!(params["state"], pending.state);
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["code_challenge"], pending.code_challenge());
        assert_eq!(pending.code_verifier.len(), 64);
    }

    #[test]
    fn test_code_challenge_is_s256() {
        // RFC 7636 appendix B.
        let pending = PendingAuthorization {
            state: "s".into(),
            code_verifier: "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into(),
            redirect_uri: "http://127.0.0.1/".into(),
            created_at: Utc::now(),
        };
        assert_eq!(pending.code_challenge(), "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_state_mismatch_is_rejected_before_exchange() {
        let client = OAuthClient::new(ClientSecrets::from_json(SECRETS).unwrap(), config::UPLOAD_SCOPE).unwrap();
        let (_, pending) = client.begin("http://127.0.0.1:8080/").unwrap();
        let reply = AuthorizationReply {
            code: "4/abc".into(),
            state: Some("forged".into()),
        };
        assert!(matches!(client.complete(&pending, &reply), Err(AuthError::StateMismatch)));
    }

    #[test]
    fn test_reply_parsing() {
        assert_eq!(AuthorizationReply::parse("   ").unwrap(), None);
        assert_eq!(
            AuthorizationReply::parse("4/0Abc").unwrap().unwrap(),
            AuthorizationReply {
                code: "4/0Abc".into(),
                state: None
            }
        );
        let reply = AuthorizationReply::parse("http://127.0.0.1:8080/?state=xyz&code=4%2F0Abc&scope=s")
            .unwrap()
            .unwrap();
        assert_eq!(reply.code, "4/0Abc");
        assert_eq!(reply.state.as_deref(), Some("xyz"));
        assert!(matches!(
            AuthorizationReply::parse("http://127.0.0.1:8080/?error=access_denied"),
            Err(AuthError::Denied(_))
        ));
    }

    #[test]
    fn test_pending_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending_auth.json");
        assert!(matches!(PendingAuthorization::load(&path), Err(AuthError::NoPending)));

        let pending = PendingAuthorization {
            state: "s".into(),
            code_verifier: "v".into(),
            redirect_uri: "http://127.0.0.1:8080/".into(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        };
        pending.save(&path).unwrap();
        assert_eq!(PendingAuthorization::load(&path).unwrap(), pending);
        PendingAuthorization::clear(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_token_response_keeps_old_refresh_token() {
        let mut cred = Credential::new("old", config::UPLOAD_SCOPE);
        cred.refresh_token = Some("keep-me".into());
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let response = TokenResponse {
            access_token: "new".into(),
            expires_in: Some(3599),
            refresh_token: None,
            scope: Some(config::UPLOAD_SCOPE.into()),
        };
        let cred = apply_token_response(cred, response, now);
        assert_eq!(cred.access_token, "new");
        assert_eq!(cred.refresh_token.as_deref(), Some("keep-me"));
        assert_eq!(cred.expiry, Some(now + chrono::Duration::seconds(3599)));
    }

    #[test]
    fn test_refresh_requires_client_registration() {
        let endpoint = TokenEndpoint::new().unwrap();
        let mut cred = Credential::new("t", config::UPLOAD_SCOPE);
        assert!(matches!(endpoint.refresh(&cred), Err(AuthError::Refresh(_))));
        cred.refresh_token = Some("r".into());
        assert!(matches!(endpoint.refresh(&cred), Err(AuthError::Refresh(_))));
    }
}
