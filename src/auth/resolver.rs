use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::oauth::TokenRefresher;
use super::sources::{CredentialSource, Provenance};
use super::store::TokenStore;
use super::{AuthError, Credential, SourceFailure};

/// Produces one valid credential from an ordered list of sources.
///
/// Sources are consulted in order and the first one that yields a usable
/// credential for the required scope wins. An expired credential that can be
/// refreshed is refreshed in place. Credentials that were refreshed or obtained
/// interactively are written to the store once; a failed write is logged and
/// does not fail resolution.
pub struct CredentialResolver {
    scope: String,
    sources: Vec<Box<dyn CredentialSource>>,
    refresher: Box<dyn TokenRefresher>,
    store: Option<Arc<dyn TokenStore>>,
}

impl CredentialResolver {
    pub fn new(scope: impl Into<String>, refresher: Box<dyn TokenRefresher>) -> Self {
        Self {
            scope: scope.into(),
            sources: Vec::new(),
            refresher,
            store: None,
        }
    }

    pub fn with_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Where refreshed and newly granted credentials are written.
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn resolve(&self) -> Result<Credential, AuthError> {
        self.resolve_at(Utc::now())
    }

    pub fn resolve_at(&self, now: DateTime<Utc>) -> Result<Credential, AuthError> {
        let mut attempts = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            match self.try_source(source.as_ref(), now) {
                Ok(credential) => return Ok(credential),
                Err(reason) => {
                    debug!("credential source {} skipped: {}", source.name(), reason);
                    attempts.push(SourceFailure {
                        source: source.name().to_string(),
                        reason,
                    });
                }
            }
        }

        Err(AuthError::Unavailable { attempts })
    }

    fn try_source(&self, source: &dyn CredentialSource, now: DateTime<Utc>) -> Result<Credential, String> {
        let credential = match source.obtain() {
            Ok(Some(c)) => c,
            Ok(None) => return Err("nothing available".into()),
            Err(e) => {
                warn!("credential source {} unusable: {}", source.name(), e);
                return Err(e.to_string());
            }
        };

        if !credential.has_scope(&self.scope) {
            warn!("credential from {} lacks scope {}", source.name(), self.scope);
            return Err(AuthError::ScopeMismatch(self.scope.clone()).to_string());
        }

        if credential.is_usable_at(now) {
            info!("using credential from {}", source.name());
            if source.provenance() == Provenance::Interactive {
                self.persist(&credential);
            }
            return Ok(credential);
        }

        if !credential.is_refreshable() {
            return Err("expired and not refreshable".into());
        }

        info!("credential from {} expired, refreshing", source.name());
        match self.refresher.refresh(&credential) {
            Ok(refreshed) => {
                self.persist(&refreshed);
                Ok(refreshed)
            }
            Err(e) => {
                warn!("refresh failed: {}", e);
                Err(e.to_string())
            }
        }
    }

    fn persist(&self, credential: &Credential) {
        let Some(store) = &self.store else {
            return;
        };
        let result = credential
            .to_json()
            .and_then(|payload| store.save(&payload).map_err(AuthError::from));
        match result {
            Ok(()) => info!("saved credential to {}", store.describe()),
            Err(e) => warn!("could not save credential to {}: {}", store.describe(), e),
        }
    }
}
