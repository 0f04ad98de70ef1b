//! Media-URL scraping from the post's own pages.
//!
//! These heuristics depend on undocumented page markup and are expected to
//! break whenever the site changes it. Each extractor is tried in order and the
//! first match wins.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lazy_regex::regex;
use log::debug;
use url::Url;

use super::fetch::HttpFetch;
use super::{DownloadStrategy, StrategyError};
use crate::config::ReelpostConfig;
use crate::source::SourceUrl;

/// Which page of the post is scraped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeTarget {
    /// The `/embed/captioned/` variant, which usually inlines the video URL.
    Embed,
    /// The post page itself (OpenGraph tags, inline JSON, JSON-LD).
    Direct,
}

pub type Extractor = fn(&str) -> Option<String>;

const EMBED_EXTRACTORS: &[Extractor] = &[inline_video_url, video_tag_src];
const DIRECT_EXTRACTORS: &[Extractor] = &[og_video, inline_video_url, json_ld_content_url];

impl ScrapeTarget {
    fn page_url(self, source: &SourceUrl) -> Url {
        match self {
            ScrapeTarget::Embed => source.embed_url(),
            ScrapeTarget::Direct => source.canonical(),
        }
    }

    fn extractors(self) -> &'static [Extractor] {
        match self {
            ScrapeTarget::Embed => EMBED_EXTRACTORS,
            ScrapeTarget::Direct => DIRECT_EXTRACTORS,
        }
    }
}

/// Fetch a post page, extract a direct media URL, stream it to disk.
pub struct PageScrape {
    name: &'static str,
    target: ScrapeTarget,
    http: Arc<dyn HttpFetch>,
    page_timeout: Duration,
    media_timeout: Duration,
}

impl PageScrape {
    pub fn new(target: ScrapeTarget, http: Arc<dyn HttpFetch>, cfg: &ReelpostConfig) -> Self {
        let name = match target {
            ScrapeTarget::Embed => "embed-page",
            ScrapeTarget::Direct => "post-page",
        };
        Self {
            name,
            target,
            http,
            page_timeout: cfg.page_timeout,
            media_timeout: cfg.media_timeout,
        }
    }

    pub fn embed(http: Arc<dyn HttpFetch>, cfg: &ReelpostConfig) -> Self {
        Self::new(ScrapeTarget::Embed, http, cfg)
    }

    pub fn direct(http: Arc<dyn HttpFetch>, cfg: &ReelpostConfig) -> Self {
        Self::new(ScrapeTarget::Direct, http, cfg)
    }
}

impl DownloadStrategy for PageScrape {
    fn name(&self) -> &str {
        self.name
    }

    fn attempt(&self, source: &SourceUrl, dest: &Path) -> Result<(), StrategyError> {
        let page = self.target.page_url(source);
        let html = self.http.get_text(&page, self.page_timeout)?;

        let media = extract_media_url(&html, self.target.extractors())
            .ok_or_else(|| StrategyError::NoMediaUrl(page.to_string()))?;
        debug!("{} found media URL {}", self.name, media);

        self.http.download(&media, dest, self.media_timeout)?;
        Ok(())
    }
}

/// Run `extractors` in order and return the first absolute http(s) URL.
pub fn extract_media_url(html: &str, extractors: &[Extractor]) -> Option<Url> {
    extractors
        .iter()
        .filter_map(|extract| extract(html))
        .filter_map(|raw| Url::parse(&raw).ok())
        .find(|url| matches!(url.scheme(), "http" | "https"))
}

/// `"video_url":"https:\/\/..."` inside inline JSON.
pub fn inline_video_url(html: &str) -> Option<String> {
    let caps = regex!(r#""video_url"\s*:\s*"((?:[^"\\]|\\.)+)""#).captures(html)?;
    unescape_json_string(&caps[1])
}

/// `<meta property="og:video" content="...">`, secure variant included.
pub fn og_video(html: &str) -> Option<String> {
    let caps = regex!(
        r#"<meta[^>]+property="og:video(?::secure_url|:url)?"[^>]+content="([^"]+)""#
    )
    .captures(html)?;
    Some(unescape_html(&caps[1]))
}

/// `"contentUrl":"..."` in a JSON-LD block.
pub fn json_ld_content_url(html: &str) -> Option<String> {
    let caps = regex!(r#""contentUrl"\s*:\s*"((?:[^"\\]|\\.)+)""#).captures(html)?;
    unescape_json_string(&caps[1])
}

/// `<video ... src="...">`.
pub fn video_tag_src(html: &str) -> Option<String> {
    let caps = regex!(r#"<video[^>]*\ssrc="([^"]+)""#).captures(html)?;
    Some(unescape_html(&caps[1]))
}

fn unescape_json_string(raw: &str) -> Option<String> {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).ok()
}

fn unescape_html(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x2F;", "/")
        .replace("&#39;", "'")
}
