use std::sync::Arc;

use log::{debug, info};

use super::oauth::OAuthClient;
use super::prompt::AuthorizationPrompt;
use super::store::TokenStore;
use super::{AuthError, Credential};
use crate::config;

/// Where a credential came from. Decides whether it gets persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Injected,
    Persisted,
    Interactive,
}

/// One place a credential might be found.
pub trait CredentialSource {
    fn name(&self) -> &str;

    fn provenance(&self) -> Provenance;

    /// `Ok(None)` when the source has nothing to offer. Errors mean the
    /// source exists but its content is unusable; the resolver moves on in
    /// both cases.
    fn obtain(&self) -> Result<Option<Credential>, AuthError>;
}

/// A serialized credential handed in from outside (environment, CI secret).
pub struct InjectedSecret {
    payload: Option<String>,
}

impl InjectedSecret {
    pub fn new(payload: Option<String>) -> Self {
        Self {
            payload: payload.filter(|p| !p.trim().is_empty()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var(config::TOKEN_JSON_ENV).ok())
    }
}

impl CredentialSource for InjectedSecret {
    fn name(&self) -> &str {
        "injected"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Injected
    }

    fn obtain(&self) -> Result<Option<Credential>, AuthError> {
        match &self.payload {
            Some(payload) => Credential::from_json(payload).map(Some),
            None => Ok(None),
        }
    }
}

/// A credential saved by an earlier run.
pub struct PersistedFile {
    store: Arc<dyn TokenStore>,
}

impl PersistedFile {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }
}

impl CredentialSource for PersistedFile {
    fn name(&self) -> &str {
        "token file"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Persisted
    }

    fn obtain(&self) -> Result<Option<Credential>, AuthError> {
        match self.store.load()? {
            Some(payload) => {
                debug!("loaded credential from {}", self.store.describe());
                Credential::from_json(&payload).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Runs the consent flow with a human in the loop.
pub struct InteractiveFlow {
    client: OAuthClient,
    prompt: Box<dyn AuthorizationPrompt>,
}

impl InteractiveFlow {
    pub fn new(client: OAuthClient, prompt: Box<dyn AuthorizationPrompt>) -> Self {
        Self { client, prompt }
    }
}

impl CredentialSource for InteractiveFlow {
    fn name(&self) -> &str {
        "interactive"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Interactive
    }

    fn obtain(&self) -> Result<Option<Credential>, AuthError> {
        let redirect_uri = self.prompt.redirect_uri()?;
        let (url, pending) = self.client.begin(&redirect_uri)?;
        let reply = self
            .prompt
            .wait_for_reply(&url)?
            .ok_or(AuthError::Abandoned)?;
        let credential = self.client.complete(&pending, &reply)?;
        info!("authorization granted");
        Ok(Some(credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oauth::{AuthorizationReply, ClientSecrets};
    use crate::auth::FileTokenStore;
    use url::Url;

    #[test]
    fn test_injected_blank_is_absent() {
        assert!(InjectedSecret::new(None).obtain().unwrap().is_none());
        assert!(InjectedSecret::new(Some("  \n".into())).obtain().unwrap().is_none());
    }

    #[test]
    fn test_injected_parses_or_reports_malformed() {
        let ok = InjectedSecret::new(Some(r#"{"token":"t"}"#.into()));
        assert_eq!(ok.obtain().unwrap().unwrap().access_token, "t");

        let bad = InjectedSecret::new(Some("not json".into()));
        assert!(matches!(bad.obtain(), Err(AuthError::Malformed(_))));
    }

    #[test]
    fn test_persisted_missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileTokenStore::new(dir.path().join("token.json")));
        let source = PersistedFile::new(store.clone());
        assert!(source.obtain().unwrap().is_none());

        store.save(r#"{"token":"saved","refresh_token":"r"}"#).unwrap();
        let cred = source.obtain().unwrap().unwrap();
        assert_eq!(cred.access_token, "saved");
        assert_eq!(source.provenance(), Provenance::Persisted);
    }

    struct SilentPrompt;

    impl AuthorizationPrompt for SilentPrompt {
        fn redirect_uri(&self) -> Result<String, AuthError> {
            Ok("http://127.0.0.1:8080/".into())
        }

        fn wait_for_reply(&self, _url: &Url) -> Result<Option<AuthorizationReply>, AuthError> {
            Ok(None)
        }
    }

    #[test]
    fn test_interactive_without_reply_is_abandoned() {
        let secrets = ClientSecrets::from_json(
            r#"{"installed":{"client_id":"cid","client_secret":"cs"}}"#,
        )
        .unwrap();
        let client = OAuthClient::new(secrets, config::UPLOAD_SCOPE).unwrap();
        let flow = InteractiveFlow::new(client, Box::new(SilentPrompt));
        assert!(matches!(flow.obtain(), Err(AuthError::Abandoned)));
    }
}
