use std::fmt;

use thiserror::Error;
use url::Url;

use crate::config;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("not a valid URL: {0}")]
    Malformed(String),
    #[error("unsupported scheme: {0}")]
    Scheme(String),
    #[error("unrecognised host: {0}")]
    Host(String),
    #[error("no post identifier in path: {0}")]
    NoIdentifier(String),
}

/// The set of link shapes the acquirer accepts.
///
/// A link is recognised when its host is one of `hosts` and its path contains
/// `/<kind>/<identifier>` (optionally behind a `/<username>` prefix).
#[derive(Debug, Clone)]
pub struct SourcePatterns {
    hosts: Vec<String>,
    kinds: Vec<String>,
}

impl SourcePatterns {
    pub fn new<H, K>(hosts: H, kinds: K) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| Into::<String>::into(h).to_ascii_lowercase())
                .collect(),
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse and recognise a user-supplied link.
    pub fn parse(&self, raw: &str) -> Result<SourceUrl, SourceError> {
        let trimmed = raw.trim();
        let url = Url::parse(trimmed).map_err(|_| SourceError::Malformed(trimmed.to_string()))?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(SourceError::Scheme(url.scheme().to_string()));
        }

        let host = url
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| SourceError::Host(trimmed.to_string()))?;
        if !self.hosts.iter().any(|h| *h == host) {
            return Err(SourceError::Host(host));
        }

        let (kind, id) = self
            .find_identifier(&url)
            .ok_or_else(|| SourceError::NoIdentifier(url.path().to_string()))?;

        Ok(SourceUrl { url, kind, id })
    }

    fn find_identifier(&self, url: &Url) -> Option<(String, String)> {
        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        // /<kind>/<id> or /<username>/<kind>/<id>
        for start in 0..segments.len().min(2) {
            let (Some(kind), Some(id)) = (segments.get(start), segments.get(start + 1)) else {
                continue;
            };
            if self.kinds.iter().any(|k| k == kind) && is_identifier(id) {
                return Some((kind.to_string(), id.to_string()));
            }
        }
        None
    }
}

fn is_identifier(segment: &str) -> bool {
    segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl Default for SourcePatterns {
    fn default() -> Self {
        Self::new(config::SOURCE_HOSTS, config::SOURCE_PATH_KINDS)
    }
}

/// A recognised source link together with the post identifier it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    url: Url,
    kind: String,
    id: String,
}

impl SourceUrl {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Path kind the identifier was found under (`reel`, `p`, ...).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Post identifier (shortcode).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Canonical post page: `<scheme>://<host>/<kind>/<id>/`, no query or fragment.
    pub fn canonical(&self) -> Url {
        let mut url = self.url.clone();
        url.set_path(&format!("/{}/{}/", self.kind, self.id));
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    /// The embeddable variant of the post page.
    pub fn embed_url(&self) -> Url {
        let mut url = self.canonical();
        url.set_path(&format!("/{}/{}/embed/captioned/", self.kind, self.id));
        url
    }

    /// File name used for the downloaded asset.
    pub fn media_file_name(&self) -> String {
        format!("{}.mp4", self.id)
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognises_reel_and_post_links() {
        let patterns = SourcePatterns::default();

        let reel = patterns
            .parse("https://www.instagram.com/reel/C8xYz_12-aB/?igsh=abc")
            .unwrap();
        assert_eq!(reel.kind(), "reel");
        assert_eq!(reel.id(), "C8xYz_12-aB");
        assert_eq!(
            reel.canonical().as_str(),
            "https://www.instagram.com/reel/C8xYz_12-aB/"
        );

        let post = patterns.parse("  https://instagram.com/p/ABC123  ").unwrap();
        assert_eq!(post.kind(), "p");
        assert_eq!(post.media_file_name(), "ABC123.mp4");
    }

    #[test]
    fn test_username_prefixed_path() {
        let patterns = SourcePatterns::default();
        let src = patterns
            .parse("https://www.instagram.com/someone/reel/XyZ987/")
            .unwrap();
        assert_eq!(src.id(), "XyZ987");
        assert_eq!(
            src.embed_url().as_str(),
            "https://www.instagram.com/reel/XyZ987/embed/captioned/"
        );
    }

    #[test]
    fn test_rejects_unrecognised_links() {
        let patterns = SourcePatterns::default();
        assert!(matches!(
            patterns.parse("not a url"),
            Err(SourceError::Malformed(_))
        ));
        assert!(matches!(
            patterns.parse("ftp://instagram.com/reel/ABC"),
            Err(SourceError::Scheme(_))
        ));
        assert!(matches!(
            patterns.parse("https://example.com/reel/ABC"),
            Err(SourceError::Host(_))
        ));
        assert!(matches!(
            patterns.parse("https://www.instagram.com/reel/"),
            Err(SourceError::NoIdentifier(_))
        ));
        assert!(matches!(
            patterns.parse("https://www.instagram.com/someone/"),
            Err(SourceError::NoIdentifier(_))
        ));
    }

    #[test]
    fn test_custom_hosts() {
        let patterns = SourcePatterns::new(["site.example"], ["reel"]);
        assert_eq!(
            patterns.parse("https://site.example/reel/ABC123").unwrap().id(),
            "ABC123"
        );
        assert!(patterns.parse("https://site.example/p/ABC123").is_err());
    }
}
