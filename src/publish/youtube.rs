use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{PublishError, PublishErrorKind, PublishRequest, Published, Publisher};
use crate::config::{self, ReelpostConfig};

/// Chunk responses in a row that may leave the committed offset unchanged.
const MAX_STALLED_CHUNKS: u32 = 3;

/// Resumable upload to the YouTube Data API v3.
///
/// One POST opens a session carrying the metadata; the file then goes up in
/// fixed-size PUT chunks. Each chunk response is either `308` with the
/// committed byte range or the final video resource.
pub struct YoutubeUploader {
    http: Client,
    endpoint: String,
    chunk_size: usize,
    request_timeout: Duration,
    show_progress: bool,
}

#[derive(Deserialize)]
struct VideoResource {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: String,
}

impl YoutubeUploader {
    pub fn new(cfg: &ReelpostConfig) -> Result<Self, PublishError> {
        let http = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config::DEFAULT_PAGE_TIMEOUT_SECS))
            .build()
            .map_err(|e| PublishError::new(PublishErrorKind::Transient, e.to_string()))?;
        Ok(Self {
            http,
            endpoint: config::UPLOAD_ENDPOINT.to_string(),
            chunk_size: cfg.effective_chunk_size(),
            request_timeout: cfg.media_timeout,
            show_progress: true,
        })
    }

    /// Point at a different upload endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    fn open_session(&self, request: &PublishRequest) -> Result<String, PublishError> {
        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .header(AUTHORIZATION, bearer(request))
            .header("X-Upload-Content-Type", content_type(&request.media_path))
            .header("X-Upload-Content-Length", request.media_size)
            .timeout(self.request_timeout)
            .json(&video_metadata(request))
            .send()
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(error_from_response(response));
        }
        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PublishError::new(PublishErrorKind::Malformed, "no upload session location returned"))
    }

    fn send_chunks(&self, session: &str, request: &PublishRequest) -> Result<Published, PublishError> {
        let mut file = File::open(&request.media_path).map_err(local_io)?;
        let total = request.media_size;
        let bar = self.progress_bar(total);
        let mut buf = vec![0u8; self.chunk_size];
        let mut offset = 0u64;
        let mut stalled = 0u32;

        loop {
            file.seek(SeekFrom::Start(offset)).map_err(local_io)?;
            let len = read_up_to(&mut file, &mut buf).map_err(local_io)?;
            if len == 0 {
                return Err(PublishError::new(
                    PublishErrorKind::Malformed,
                    format!("{} shrank during upload", request.media_path.display()),
                ));
            }
            let last = offset + len as u64 - 1;
            debug!("PUT bytes {}-{}/{}", offset, last, total);

            let response = self
                .http
                .put(session)
                .header(AUTHORIZATION, bearer(request))
                .header(CONTENT_TYPE, content_type(&request.media_path))
                .header(CONTENT_RANGE, format!("bytes {offset}-{last}/{total}"))
                .timeout(self.request_timeout)
                .body(buf[..len].to_vec())
                .send()
                .map_err(transport)?;

            match response.status() {
                StatusCode::PERMANENT_REDIRECT => {
                    let committed = committed_offset(response.headers().get(RANGE).and_then(|v| v.to_str().ok()));
                    offset = advance(offset, committed, &mut stalled).inspect_err(|_| bar.abandon())?;
                    bar.set_position(offset);
                }
                s if s.is_success() => {
                    bar.finish_and_clear();
                    let video: VideoResource = response.json().map_err(|e| {
                        PublishError::new(PublishErrorKind::Malformed, format!("unexpected upload response: {e}"))
                    })?;
                    return Ok(Published { video_id: video.id });
                }
                _ => {
                    bar.abandon();
                    return Err(error_from_response(response));
                }
            }
        }
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.green/white} {bytes}/{total_bytes} ({eta})")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        bar
    }
}

impl Publisher for YoutubeUploader {
    fn publish(&self, request: &PublishRequest) -> Result<Published, PublishError> {
        info!(
            "uploading {} ({} bytes) as \"{}\"",
            request.media_path.display(),
            request.media_size,
            request.title
        );
        let session = self.open_session(request)?;
        let published = self.send_chunks(&session, request)?;
        info!("upload complete: {}", published.video_id);
        Ok(published)
    }
}

/// The `snippet` and `status` parts of the video resource.
pub fn video_metadata(request: &PublishRequest) -> serde_json::Value {
    json!({
        "snippet": {
            "title": request.title,
            "description": request.description,
            "categoryId": request.category_id,
            "tags": request.tags,
        },
        "status": {
            "privacyStatus": request.privacy.as_api_str(),
            "selfDeclaredMadeForKids": false,
        }
    })
}

fn bearer(request: &PublishRequest) -> String {
    format!("Bearer {}", request.credential.access_token)
}

fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        _ => "video/mp4",
    }
}

/// Next byte to send given a `Range: bytes=0-N` header from a 308.
fn committed_offset(range: Option<&str>) -> u64 {
    range
        .and_then(|r| r.trim().strip_prefix("bytes="))
        .and_then(|r| r.split('-').nth(1))
        .and_then(|end| end.trim().parse::<u64>().ok())
        .map_or(0, |end| end + 1)
}

/// Accept the server's committed offset, failing once it stops moving forward.
fn advance(offset: u64, committed: u64, stalled: &mut u32) -> Result<u64, PublishError> {
    if committed > offset {
        *stalled = 0;
        return Ok(committed);
    }
    *stalled += 1;
    if *stalled >= MAX_STALLED_CHUNKS {
        return Err(PublishError::new(
            PublishErrorKind::Transient,
            format!("upload stalled at byte {offset} after {stalled} chunks without progress"),
        ));
    }
    debug!("server committed up to {}, resending from there", committed);
    Ok(committed)
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn transport(err: reqwest::Error) -> PublishError {
    PublishError::new(PublishErrorKind::Transient, err.to_string())
}

fn local_io(err: std::io::Error) -> PublishError {
    PublishError::new(PublishErrorKind::Malformed, format!("reading media file: {err}"))
}

fn error_from_response(response: Response) -> PublishError {
    let status = response.status();
    let body = response.text().unwrap_or_default();
    let (reason, message) = parse_error_body(&body);
    let message = message.unwrap_or_else(|| format!("HTTP {status}"));
    PublishError::from_status(status.as_u16(), reason.as_deref(), message)
}

fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => {
            let reason = env.error.errors.into_iter().map(|e| e.reason).find(|r| !r.is_empty());
            let message = Some(env.error.message).filter(|m| !m.is_empty());
            (reason, message)
        }
        Err(_) => (None, None),
    }
}
