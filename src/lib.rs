pub mod acquire;
pub mod auth;
pub mod config;
mod integrity;
pub mod pipeline;
pub mod publish;
pub mod source;

pub use acquire::{AcquireError, DownloadStrategy, MediaAsset, SourceAcquirer, StrategyFailure};
pub use auth::{AuthError, Credential, CredentialResolver, CredentialSource};
pub use config::{Privacy, ReelpostConfig};
pub use pipeline::hook::{NoopHook, PipelineHook};
pub use pipeline::{Pipeline, PipelineError, PublishOutcome, Stage};
pub use publish::{PublishError, PublishRequest, Published, Publisher, YoutubeUploader};
pub use source::{SourcePatterns, SourceUrl};
