use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use reqwest::blocking::{Client, Response};
use thiserror::Error;
use url::Url;

use crate::config;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("response from {url} is not valid JSON: {message}")]
    Decode { url: String, message: String },
    #[error("writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }

    fn from_reqwest(url: &Url, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Network access used by the scraping and relay strategies.
///
/// Every call carries its own upper bound; exceeding it yields
/// [`FetchError::Timeout`] rather than blocking indefinitely.
pub trait HttpFetch {
    /// GET `url` and return the body as text.
    fn get_text(&self, url: &Url, timeout: Duration) -> Result<String, FetchError>;

    /// GET `url` and stream the body into `dest`. Returns the byte count.
    fn download(&self, url: &Url, dest: &Path, timeout: Duration) -> Result<u64, FetchError>;

    /// GET `url` and parse the body as JSON.
    fn get_json(&self, url: &Url, timeout: Duration) -> Result<serde_json::Value, FetchError> {
        let body = self.get_text(url, timeout)?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Blocking `reqwest` transport with a browser user agent.
pub struct ReqwestFetch {
    client: Client,
    show_progress: bool,
}

impl ReqwestFetch {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config::BROWSER_USER_AGENT)
            .connect_timeout(Duration::from_secs(config::DEFAULT_PAGE_TIMEOUT_SECS))
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            show_progress: true,
        })
    }

    /// Disable the terminal progress bar (for non-interactive runs).
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    fn send(&self, url: &Url, timeout: Duration) -> Result<Response, FetchError> {
        debug!("GET {} (timeout {}s)", url, timeout.as_secs());
        let response = self
            .client
            .get(url.clone())
            .header("Accept-Language", "en-US,en;q=0.9")
            .timeout(timeout)
            .send()
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        response
            .error_for_status()
            .map_err(|e| FetchError::from_reqwest(url, e))
    }

    fn progress_bar(&self, total: Option<u64>) -> ProgressBar {
        match total {
            Some(len) if self.show_progress => {
                let bar = ProgressBar::new(len);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                {
                    bar.set_style(style.progress_chars("##-"));
                }
                bar
            }
            _ => ProgressBar::hidden(),
        }
    }
}

impl HttpFetch for ReqwestFetch {
    fn get_text(&self, url: &Url, timeout: Duration) -> Result<String, FetchError> {
        self.send(url, timeout)?
            .text()
            .map_err(|e| FetchError::from_reqwest(url, e))
    }

    fn download(&self, url: &Url, dest: &Path, timeout: Duration) -> Result<u64, FetchError> {
        let mut response = self.send(url, timeout)?;

        // Stream into a sibling file so an interrupted transfer never sits at `dest`.
        let partial = dest.with_extension("part");
        let io_err = |source| FetchError::Io {
            path: partial.clone(),
            source,
        };
        let file = File::create(&partial).map_err(io_err)?;

        let bar = self.progress_bar(response.content_length());
        let mut writer = bar.wrap_write(file);
        let copied = response.copy_to(&mut writer);
        let flushed = writer.flush();
        drop(writer);
        bar.finish_and_clear();

        let written = match (copied, flushed) {
            (Ok(n), Ok(())) => n,
            (Err(e), _) => {
                let _ = std::fs::remove_file(&partial);
                return Err(FetchError::from_reqwest(url, e));
            }
            (Ok(_), Err(e)) => {
                let _ = std::fs::remove_file(&partial);
                return Err(io_err(e));
            }
        };

        std::fs::rename(&partial, dest).map_err(|source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        debug!("downloaded {} bytes from {}", written, url);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_get_json_decodes_body() {
        struct Canned;
        impl HttpFetch for Canned {
            fn get_text(&self, _url: &Url, _t: Duration) -> Result<String, FetchError> {
                Ok(r#"{"url":"https://cdn.example/v.mp4"}"#.to_string())
            }
            fn download(&self, _: &Url, _: &Path, _: Duration) -> Result<u64, FetchError> {
                unreachable!()
            }
        }

        let url = Url::parse("https://relay.example/api").unwrap();
        let json = Canned.get_json(&url, Duration::from_secs(1)).unwrap();
        assert_eq!(json["url"], "https://cdn.example/v.mp4");
    }

    #[test]
    fn test_default_get_json_reports_decode_error() {
        struct Html;
        impl HttpFetch for Html {
            fn get_text(&self, _url: &Url, _t: Duration) -> Result<String, FetchError> {
                Ok("<html>blocked</html>".to_string())
            }
            fn download(&self, _: &Url, _: &Path, _: Duration) -> Result<u64, FetchError> {
                unreachable!()
            }
        }

        let url = Url::parse("https://relay.example/api").unwrap();
        let err = Html.get_json(&url, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
        assert!(!err.is_timeout());
    }
}
