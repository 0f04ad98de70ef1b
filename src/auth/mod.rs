pub mod credential;
pub mod oauth;
pub mod prompt;
pub mod resolver;
pub mod sources;
pub mod store;

use std::fmt;
use std::io::IsTerminal;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::config::{self, ReelpostConfig};

pub use credential::Credential;
pub use oauth::{AuthorizationReply, ClientSecrets, OAuthClient, PendingAuthorization, TokenEndpoint, TokenRefresher};
pub use prompt::{AuthorizationPrompt, LoopbackPrompt, PastePrompt};
pub use resolver::CredentialResolver;
pub use sources::{CredentialSource, InjectedSecret, InteractiveFlow, PersistedFile, Provenance};
pub use store::{FileTokenStore, TokenStore};

/// Why one credential source was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no usable credential ({}); run `reelpost auth login` or set {}", summarize(.attempts), config::TOKEN_JSON_ENV)]
    Unavailable { attempts: Vec<SourceFailure> },
    #[error("malformed credential: {0}")]
    Malformed(String),
    #[error("credential does not grant scope {0}")]
    ScopeMismatch(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("authorization code exchange failed: {0}")]
    Exchange(String),
    #[error("client secrets: {0}")]
    Secrets(String),
    #[error("token endpoint unreachable: {0}")]
    Transport(String),
    #[error("authorization denied: {0}")]
    Denied(String),
    #[error("authorization abandoned")]
    Abandoned,
    #[error("authorization state mismatch")]
    StateMismatch,
    #[error("no pending authorization; run `reelpost auth begin` first")]
    NoPending,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn summarize(attempts: &[SourceFailure]) -> String {
    if attempts.is_empty() {
        return "no credential sources configured".into();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The standard source order: injected secret, token file, then the
/// interactive consent flow when a human and client secrets are present.
pub fn build_resolver(cfg: &ReelpostConfig, injected: Option<String>) -> Result<CredentialResolver, AuthError> {
    let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(&cfg.token_file));

    let mut resolver = CredentialResolver::new(config::UPLOAD_SCOPE, Box::new(TokenEndpoint::new()?))
        .with_source(InjectedSecret::new(injected))
        .with_source(PersistedFile::new(store.clone()))
        .with_store(store);

    let interactive = cfg.allow_interactive && std::io::stdin().is_terminal();
    if interactive && cfg.client_secrets_file.exists() {
        let secrets = ClientSecrets::from_file(&cfg.client_secrets_file)?;
        let client = OAuthClient::new(secrets, config::UPLOAD_SCOPE)?;
        resolver = resolver.with_source(InteractiveFlow::new(client, Box::new(LoopbackPrompt::default())));
    } else if interactive {
        info!(
            "{} not found; interactive authorization disabled",
            cfg.client_secrets_file.display()
        );
    }

    debug!("credential sources: {}", resolver.source_names().join(", "));
    Ok(resolver)
}
