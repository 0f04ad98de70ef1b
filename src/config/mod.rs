use std::path::PathBuf;
use std::time::Duration;

/// Description attached to every published video.
pub const STATIC_DESCRIPTION: &str = "
Follow the channel and support us on the journey to 1K subscribers ❤️
We upload short videos based on motivation and real-life mindset.

#Shorts #Motivation #Reels
";

/// Marker the title must carry for the platform to file the upload as a Short.
pub const SHORTS_MARKER: &str = "#Shorts";

// Upload metadata
pub const DEFAULT_CATEGORY_ID: &str = "22"; // People & Blogs
pub const DEFAULT_TAGS: [&str; 5] = ["Shorts", "Short", "Vertical Video", "Instagram", "Reels"];

// OAuth
pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";
pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const LOOPBACK_PORT: u16 = 8080;
/// Credentials expiring within this window are treated as already expired.
pub const EXPIRY_SKEW_SECS: i64 = 60;

// Upload API
pub const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
pub const WATCH_URL_BASE: &str = "https://www.youtube.com/watch?v=";
pub const SHORTS_URL_BASE: &str = "https://youtube.com/shorts/";
/// Chunk size for resumable uploads. Must be a multiple of 256 KiB.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;
pub const UPLOAD_CHUNK_GRANULARITY: usize = 256 * 1024;

// Acquisition
pub const DEFAULT_PAGE_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MEDIA_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_YTDLP_BINARY: &str = "yt-dlp";
pub const SOURCE_HOSTS: [&str; 4] = [
    "instagram.com",
    "www.instagram.com",
    "m.instagram.com",
    "instagr.am",
];
/// Path kinds that carry a post identifier as the next segment.
pub const SOURCE_PATH_KINDS: [&str; 4] = ["p", "reel", "reels", "tv"];
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// File extensions accepted by `reelpost upload`.
pub const IMPORT_EXTENSIONS: [&str; 4] = ["mp4", "mov", "avi", "mkv"];

// Default file locations, relative to the current directory
pub const DEFAULT_WORK_DIR: &str = ".reelpost";
pub const DEFAULT_TOKEN_FILE: &str = "token.json";
pub const DEFAULT_CLIENT_SECRETS_FILE: &str = "client_secret.json";
pub const PENDING_AUTH_FILE: &str = "pending_auth.json";

/// Environment variable holding an externally supplied authorized-user JSON.
pub const TOKEN_JSON_ENV: &str = "REELPOST_TOKEN_JSON";

/// Privacy setting for a published video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Privacy {
    #[default]
    Public,
    Unlisted,
    Private,
}

impl Privacy {
    pub fn as_api_str(self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Unlisted => "unlisted",
            Privacy::Private => "private",
        }
    }
}

/// Runtime configuration for a download / publish run.
#[derive(Debug, Clone)]
pub struct ReelpostConfig {
    pub work_dir: PathBuf,
    pub token_file: PathBuf,
    pub client_secrets_file: PathBuf,
    pub ytdlp_binary: String,
    pub cookies_from_browser: Option<String>,
    pub cookies_file: Option<PathBuf>,
    pub relay_endpoints: Vec<String>,
    pub page_timeout: Duration,
    pub media_timeout: Duration,
    pub tool_timeout: Duration,
    pub upload_chunk_size: usize,
    pub privacy: Privacy,
    pub category_id: String,
    pub tags: Vec<String>,
    pub allow_interactive: bool,
}

impl ReelpostConfig {
    /// Where the two-phase authorization keeps its pending state.
    pub fn pending_auth_file(&self) -> PathBuf {
        self.work_dir.join(PENDING_AUTH_FILE)
    }

    /// Round the configured upload chunk size down to the API granularity.
    pub fn effective_chunk_size(&self) -> usize {
        let rounded = self.upload_chunk_size / UPLOAD_CHUNK_GRANULARITY * UPLOAD_CHUNK_GRANULARITY;
        rounded.max(UPLOAD_CHUNK_GRANULARITY)
    }
}

impl Default for ReelpostConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            client_secrets_file: PathBuf::from(DEFAULT_CLIENT_SECRETS_FILE),
            ytdlp_binary: DEFAULT_YTDLP_BINARY.to_string(),
            cookies_from_browser: None,
            cookies_file: None,
            relay_endpoints: Vec::new(),
            page_timeout: Duration::from_secs(DEFAULT_PAGE_TIMEOUT_SECS),
            media_timeout: Duration::from_secs(DEFAULT_MEDIA_TIMEOUT_SECS),
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            privacy: Privacy::default(),
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            tags: DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
            allow_interactive: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chunk_size_is_aligned() {
        let cfg = ReelpostConfig::default();
        assert_eq!(cfg.effective_chunk_size(), DEFAULT_UPLOAD_CHUNK_SIZE);
        assert_eq!(DEFAULT_UPLOAD_CHUNK_SIZE % UPLOAD_CHUNK_GRANULARITY, 0);
    }

    #[test]
    fn test_chunk_size_rounds_down_with_floor() {
        let cfg = ReelpostConfig {
            upload_chunk_size: 300 * 1024,
            ..Default::default()
        };
        assert_eq!(cfg.effective_chunk_size(), 256 * 1024);

        let tiny = ReelpostConfig {
            upload_chunk_size: 10,
            ..Default::default()
        };
        assert_eq!(tiny.effective_chunk_size(), UPLOAD_CHUNK_GRANULARITY);
    }

    #[test]
    fn test_privacy_api_strings() {
        assert_eq!(Privacy::default().as_api_str(), "public");
        assert_eq!(Privacy::Unlisted.as_api_str(), "unlisted");
    }
}
