pub mod hook;

use std::fmt;
use std::path::PathBuf;

use log::{debug, info, warn};
use thiserror::Error;

use crate::acquire::{AcquireError, MediaAsset, SourceAcquirer};
use crate::auth::{AuthError, CredentialResolver};
use crate::config::ReelpostConfig;
use crate::publish::{PublishError, PublishRequest, Publisher};
use hook::PipelineHook;

/// Where a pipeline run currently is.
///
/// `Idle -> Acquiring -> (AcquireFailed | Acquired) -> Authenticating ->
/// (AuthFailed | Authenticated) -> Publishing -> (PublishFailed | Published) -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Acquiring,
    Acquired,
    AcquireFailed,
    Authenticating,
    Authenticated,
    AuthFailed,
    Publishing,
    Published,
    PublishFailed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Acquiring => "downloading",
            Stage::Acquired => "downloaded",
            Stage::AcquireFailed => "download failed",
            Stage::Authenticating => "authenticating",
            Stage::Authenticated => "authenticated",
            Stage::AuthFailed => "authentication failed",
            Stage::Publishing => "uploading",
            Stage::Published => "published",
            Stage::PublishFailed => "upload failed",
        };
        f.write_str(name)
    }
}

/// A terminal failure, naming the stage it happened in.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("download failed: {0}")]
    Acquisition(#[source] AcquireError),
    #[error("authentication failed: {error} (media kept at {})", .asset_path.display())]
    Auth {
        #[source]
        error: AuthError,
        asset_path: PathBuf,
    },
    #[error("upload failed: {error} (media kept at {})", .asset_path.display())]
    Publish {
        #[source]
        error: PublishError,
        asset_path: PathBuf,
    },
}

impl PipelineError {
    /// The failure state the run ended in.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Acquisition(_) => Stage::AcquireFailed,
            PipelineError::Auth { .. } => Stage::AuthFailed,
            PipelineError::Publish { .. } => Stage::PublishFailed,
        }
    }

    /// Process exit status for the command line.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Acquisition(AcquireError::InvalidSource(_)) => 2,
            PipelineError::Acquisition(_) => 3,
            PipelineError::Auth { .. } => 4,
            PipelineError::Publish { .. } => 5,
        }
    }

    /// The local media file left behind, if the run got that far.
    pub fn asset_path(&self) -> Option<&PathBuf> {
        match self {
            PipelineError::Acquisition(_) => None,
            PipelineError::Auth { asset_path, .. } | PipelineError::Publish { asset_path, .. } => Some(asset_path),
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub video_id: String,
    pub title: String,
    pub watch_url: String,
    pub shorts_url: String,
}

/// Acquire, authenticate, publish: strictly in that order, each step only
/// after the previous one succeeded. Nothing is retried.
pub struct Pipeline {
    acquirer: SourceAcquirer,
    resolver: CredentialResolver,
    publisher: Box<dyn Publisher>,
    cfg: ReelpostConfig,
}

impl Pipeline {
    pub fn new(
        acquirer: SourceAcquirer,
        resolver: CredentialResolver,
        publisher: Box<dyn Publisher>,
        cfg: ReelpostConfig,
    ) -> Self {
        Self {
            acquirer,
            resolver,
            publisher,
            cfg,
        }
    }

    /// Download `url` and publish it as `title`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use reelpost::acquire::fetch::ReqwestFetch;
    /// use reelpost::{auth, NoopHook, Pipeline, ReelpostConfig, SourceAcquirer, YoutubeUploader};
    ///
    /// let cfg = ReelpostConfig::default();
    /// let acquirer = SourceAcquirer::from_config(&cfg, Arc::new(ReqwestFetch::new().unwrap()));
    /// let resolver = auth::build_resolver(&cfg, None).unwrap();
    /// let uploader = YoutubeUploader::new(&cfg).unwrap();
    /// let pipeline = Pipeline::new(acquirer, resolver, Box::new(uploader), cfg);
    ///
    /// let outcome = pipeline
    ///     .run("https://www.instagram.com/reel/ABC123/", "Sunset", &NoopHook)
    ///     .unwrap();
    /// println!("{}", outcome.shorts_url);
    /// ```
    pub fn run<H: PipelineHook + ?Sized>(
        &self,
        url: &str,
        title: &str,
        hook: &H,
    ) -> Result<PublishOutcome, PipelineError> {
        enter(hook, Stage::Acquiring);
        match self.acquirer.acquire(url) {
            Ok(asset) => {
                enter(hook, Stage::Acquired);
                self.publish_asset(asset, title, hook)
            }
            Err(e) => {
                enter(hook, Stage::AcquireFailed);
                enter(hook, Stage::Idle);
                Err(PipelineError::Acquisition(e))
            }
        }
    }

    /// Publish an asset that was obtained some other way.
    pub fn run_with_asset<H: PipelineHook + ?Sized>(
        &self,
        asset: MediaAsset,
        title: &str,
        hook: &H,
    ) -> Result<PublishOutcome, PipelineError> {
        enter(hook, Stage::Acquired);
        self.publish_asset(asset, title, hook)
    }

    fn publish_asset<H: PipelineHook + ?Sized>(
        &self,
        asset: MediaAsset,
        title: &str,
        hook: &H,
    ) -> Result<PublishOutcome, PipelineError> {
        enter(hook, Stage::Authenticating);
        let credential = match self.resolver.resolve() {
            Ok(c) => c,
            Err(error) => {
                enter(hook, Stage::AuthFailed);
                enter(hook, Stage::Idle);
                return Err(PipelineError::Auth {
                    error,
                    asset_path: asset.path().to_path_buf(),
                });
            }
        };
        enter(hook, Stage::Authenticated);

        enter(hook, Stage::Publishing);
        let request = PublishRequest::new(title, &asset, credential, &self.cfg);
        let published = match self.publisher.publish(&request) {
            Ok(p) => p,
            Err(error) => {
                if error.requires_reauth() {
                    warn!("the upload credential was rejected; run `reelpost auth login` to authorize again");
                }
                enter(hook, Stage::PublishFailed);
                enter(hook, Stage::Idle);
                return Err(PipelineError::Publish {
                    error,
                    asset_path: asset.path().to_path_buf(),
                });
            }
        };
        enter(hook, Stage::Published);

        let path = asset.path().to_path_buf();
        match asset.remove() {
            Ok(()) => debug!("removed {}", path.display()),
            Err(e) => warn!("could not remove {}: {}", path.display(), e),
        }

        let outcome = PublishOutcome {
            watch_url: published.watch_url(),
            shorts_url: published.shorts_url(),
            video_id: published.video_id,
            title: request.title,
        };
        info!("published {}", outcome.shorts_url);
        enter(hook, Stage::Idle);
        Ok(outcome)
    }
}

fn enter<H: PipelineHook + ?Sized>(hook: &H, stage: Stage) {
    debug!("stage: {}", stage);
    hook.on_stage(stage);
}
