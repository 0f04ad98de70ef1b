pub mod fetch;
pub mod relay;
pub mod scrape;
pub mod ytdlp;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use crate::config::{self, ReelpostConfig};
use crate::integrity;
use crate::source::{SourceError, SourcePatterns, SourceUrl};
use fetch::{FetchError, HttpFetch};

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("not available: {0}")]
    Unavailable(String),
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no media URL found in {0}")]
    NoMediaUrl(String),
    #[error("{tool} exited with {status}: {stderr}")]
    Tool {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("finished without producing a non-empty file")]
    EmptyOutput,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One method of turning a source link into a local media file.
pub trait DownloadStrategy {
    /// Short name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Try to place the media for `source` at `dest`.
    ///
    /// Returning `Ok` is not enough on its own: the acquirer still checks that
    /// `dest` exists and is non-empty before accepting the result.
    fn attempt(&self, source: &SourceUrl, dest: &Path) -> Result<(), StrategyError>;
}

/// Why a single strategy did not produce an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: String,
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("invalid source link: {0}")]
    InvalidSource(#[from] SourceError),
    #[error("all {} download strategies failed for {url}", .failures.len())]
    AllStrategiesFailed {
        url: String,
        failures: Vec<StrategyFailure>,
    },
    #[error("unsupported media file {}: expected one of {}", .0.display(), config::IMPORT_EXTENSIONS.join(", "))]
    UnsupportedFile(PathBuf),
    #[error("media file {} is missing or empty", .0.display())]
    EmptyFile(PathBuf),
    #[error("preparing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AcquireError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> AcquireError + '_ {
        move |source| AcquireError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A downloaded, verified, non-empty local media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    path: PathBuf,
    size: u64,
    source: String,
    sha256: String,
}

impl MediaAsset {
    /// Verify `path` and describe it. Fails if the file is missing or empty.
    pub fn verify(path: &Path, source: impl Into<String>) -> Result<Self, AcquireError> {
        let size = integrity::non_empty_size(path)
            .map_err(AcquireError::io(path))?
            .ok_or_else(|| AcquireError::EmptyFile(path.to_path_buf()))?;
        let sha256 = integrity::sha256_file(path).map_err(AcquireError::io(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            size,
            source: source.into(),
            sha256,
        })
    }

    /// Copy a file obtained by other means into `work_dir` and verify the copy.
    ///
    /// The original is never touched, so deleting the asset after publishing
    /// only removes the copy.
    pub fn import(file: &Path, work_dir: &Path) -> Result<Self, AcquireError> {
        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !config::IMPORT_EXTENSIONS.contains(&ext.as_str()) {
            return Err(AcquireError::UnsupportedFile(file.to_path_buf()));
        }
        if integrity::non_empty_size(file)
            .map_err(AcquireError::io(file))?
            .is_none()
        {
            return Err(AcquireError::EmptyFile(file.to_path_buf()));
        }

        std::fs::create_dir_all(work_dir).map_err(AcquireError::io(work_dir))?;
        let dest = work_dir.join(format!("upload.{ext}"));
        integrity::remove_if_exists(&dest).map_err(AcquireError::io(&dest))?;
        std::fs::copy(file, &dest).map_err(AcquireError::io(&dest))?;

        info!("imported {} ({} bytes)", file.display(), dest.metadata().map(|m| m.len()).unwrap_or(0));
        Self::verify(&dest, file.display().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The link (or original file) this asset was derived from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Delete the file backing this asset.
    pub fn remove(self) -> std::io::Result<()> {
        integrity::remove_if_exists(&self.path).map(|_| ())
    }
}

/// Turns a source link into one [`MediaAsset`] by trying strategies in order.
///
/// The first strategy whose attempt leaves a non-empty file at the destination
/// wins; later strategies are never called.
pub struct SourceAcquirer {
    patterns: SourcePatterns,
    work_dir: PathBuf,
    strategies: Vec<Box<dyn DownloadStrategy>>,
}

impl SourceAcquirer {
    pub fn new(patterns: SourcePatterns, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            patterns,
            work_dir: work_dir.into(),
            strategies: Vec::new(),
        }
    }

    /// The default chain: `yt-dlp`, then the embed page, then the post page,
    /// then every configured relay API.
    pub fn from_config(cfg: &ReelpostConfig, http: Arc<dyn HttpFetch>) -> Self {
        let mut acquirer = Self::new(SourcePatterns::default(), &cfg.work_dir)
            .with_strategy(ytdlp::CommandLineExtractor::from_config(cfg))
            .with_strategy(scrape::PageScrape::embed(http.clone(), cfg))
            .with_strategy(scrape::PageScrape::direct(http.clone(), cfg));
        for endpoint in &cfg.relay_endpoints {
            match relay::ThirdPartyApi::new(endpoint, http.clone(), cfg) {
                Ok(strategy) => acquirer.push(Box::new(strategy)),
                Err(e) => warn!("ignoring relay endpoint {}: {}", endpoint, e),
            }
        }
        acquirer
    }

    pub fn with_strategy(mut self, strategy: impl DownloadStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn push(&mut self, strategy: Box<dyn DownloadStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Where the asset for `source` is written.
    pub fn destination(&self, source: &SourceUrl) -> PathBuf {
        self.work_dir.join(source.media_file_name())
    }

    /// Recognise `raw_url` and download it.
    ///
    /// Unrecognised links fail with [`AcquireError::InvalidSource`] before any
    /// strategy runs.
    pub fn acquire(&self, raw_url: &str) -> Result<MediaAsset, AcquireError> {
        let source = self.patterns.parse(raw_url)?;
        self.acquire_source(&source)
    }

    pub fn acquire_source(&self, source: &SourceUrl) -> Result<MediaAsset, AcquireError> {
        std::fs::create_dir_all(&self.work_dir).map_err(AcquireError::io(&self.work_dir))?;

        let dest = self.destination(source);
        if integrity::remove_if_exists(&dest).map_err(AcquireError::io(&dest))? {
            info!("removed stale media file {}", dest.display());
        }

        let mut failures = Vec::with_capacity(self.strategies.len());
        for (idx, strategy) in self.strategies.iter().enumerate() {
            info!(
                "[{}/{}] trying {} for {}",
                idx + 1,
                self.strategies.len(),
                strategy.name(),
                source.id()
            );

            let outcome = strategy.attempt(source, &dest).and_then(|()| {
                match integrity::non_empty_size(&dest)? {
                    Some(_) => Ok(()),
                    None => Err(StrategyError::EmptyOutput),
                }
            });

            match outcome {
                Ok(()) => {
                    let asset = MediaAsset::verify(&dest, source.url().as_str())?;
                    info!(
                        "{} produced {} ({} bytes)",
                        strategy.name(),
                        asset.path().display(),
                        asset.size()
                    );
                    return Ok(asset);
                }
                Err(e) => {
                    warn!("{} failed: {}", strategy.name(), e);
                    if let Err(rm) = integrity::remove_if_exists(&dest) {
                        warn!("could not clear {}: {}", dest.display(), rm);
                    }
                    failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(AcquireError::AllStrategiesFailed {
            url: source.url().to_string(),
            failures,
        })
    }
}
