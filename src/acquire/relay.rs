use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde_json::Value;
use url::Url;

use super::fetch::HttpFetch;
use super::{DownloadStrategy, StrategyError};
use crate::config::ReelpostConfig;
use crate::source::SourceUrl;

/// Placeholder replaced by the percent-encoded source link.
pub const URL_PLACEHOLDER: &str = "{url}";

/// JSON pointers checked, in order, for the direct media URL.
const MEDIA_URL_POINTERS: [&str; 9] = [
    "/url",
    "/download_url",
    "/video_url",
    "/data/url",
    "/data/video_url",
    "/data/0/url",
    "/medias/0/url",
    "/links/0/url",
    "/result/url",
];

/// A third-party download relay reached over a JSON API.
///
/// The endpoint is a URL template; `{url}` is replaced by the source link. A
/// template without the placeholder gets the link appended as `?url=`.
pub struct ThirdPartyApi {
    name: String,
    template: String,
    http: Arc<dyn HttpFetch>,
    page_timeout: Duration,
    media_timeout: Duration,
}

impl ThirdPartyApi {
    pub fn new(
        template: &str,
        http: Arc<dyn HttpFetch>,
        cfg: &ReelpostConfig,
    ) -> Result<Self, url::ParseError> {
        let sample = Url::parse(&template.replace(URL_PLACEHOLDER, "x"))?;
        let host = sample.host_str().unwrap_or("relay");
        Ok(Self {
            name: format!("relay:{host}"),
            template: template.to_string(),
            http,
            page_timeout: cfg.page_timeout,
            media_timeout: cfg.media_timeout,
        })
    }

    fn request_url(&self, source: &SourceUrl) -> Result<Url, StrategyError> {
        let link = source.canonical();
        let parsed = if self.template.contains(URL_PLACEHOLDER) {
            let encoded: String = url::form_urlencoded::byte_serialize(link.as_str().as_bytes()).collect();
            Url::parse(&self.template.replace(URL_PLACEHOLDER, &encoded))
        } else {
            Url::parse(&self.template).map(|mut u| {
                u.query_pairs_mut().append_pair("url", link.as_str());
                u
            })
        };
        parsed.map_err(|e| StrategyError::Unavailable(format!("bad endpoint {}: {e}", self.template)))
    }
}

impl DownloadStrategy for ThirdPartyApi {
    fn name(&self) -> &str {
        &self.name
    }

    fn attempt(&self, source: &SourceUrl, dest: &Path) -> Result<(), StrategyError> {
        let request = self.request_url(source)?;
        let body = self.http.get_json(&request, self.page_timeout)?;

        let media = find_media_url(&body)
            .ok_or_else(|| StrategyError::NoMediaUrl(format!("{} response", self.name)))?;
        debug!("{} returned media URL {}", self.name, media);

        self.http.download(&media, dest, self.media_timeout)?;
        Ok(())
    }
}

/// Look up the first http(s) URL among the known response shapes.
pub fn find_media_url(body: &Value) -> Option<Url> {
    MEDIA_URL_POINTERS
        .iter()
        .filter_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
        .filter_map(|raw| Url::parse(raw).ok())
        .find(|url| matches!(url.scheme(), "http" | "https"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::fetch::FetchError;
    use crate::source::SourcePatterns;
    use serde_json::json;
    use std::cell::RefCell;

    struct JsonRelay {
        body: String,
        requests: RefCell<Vec<String>>,
    }

    impl HttpFetch for JsonRelay {
        fn get_text(&self, url: &Url, _timeout: Duration) -> Result<String, FetchError> {
            self.requests.borrow_mut().push(url.to_string());
            Ok(self.body.clone())
        }

        fn download(&self, url: &Url, dest: &Path, _timeout: Duration) -> Result<u64, FetchError> {
            self.requests.borrow_mut().push(url.to_string());
            std::fs::write(dest, b"relayed").map_err(|source| FetchError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
            Ok(7)
        }
    }

    fn source() -> SourceUrl {
        SourcePatterns::default()
            .parse("https://www.instagram.com/reel/ABC123/?igsh=1")
            .unwrap()
    }

    #[test]
    fn test_find_media_url_shapes() {
        assert_eq!(
            find_media_url(&json!({"url": "https://cdn.example/a.mp4"})).unwrap().as_str(),
            "https://cdn.example/a.mp4"
        );
        assert_eq!(
            find_media_url(&json!({"status": "ok", "medias": [{"url": "https://cdn.example/b.mp4"}]}))
                .unwrap()
                .as_str(),
            "https://cdn.example/b.mp4"
        );
        assert!(find_media_url(&json!({"url": "not a url", "error": "rate limited"})).is_none());
        assert!(find_media_url(&json!([])).is_none());
    }

    #[test]
    fn test_request_url_templates() {
        let http: Arc<dyn HttpFetch> = Arc::new(JsonRelay {
            body: String::new(),
            requests: RefCell::new(Vec::new()),
        });
        let cfg = ReelpostConfig::default();

        let templated = ThirdPartyApi::new("https://relay.example/api?link={url}&hd=1", http.clone(), &cfg).unwrap();
        assert_eq!(templated.name(), "relay:relay.example");
        assert_eq!(
            templated.request_url(&source()).unwrap().as_str(),
            "https://relay.example/api?link=https%3A%2F%2Fwww.instagram.com%2Freel%2FABC123%2F&hd=1"
        );

        let plain = ThirdPartyApi::new("https://dl.example/fetch", http, &cfg).unwrap();
        assert_eq!(
            plain.request_url(&source()).unwrap().as_str(),
            "https://dl.example/fetch?url=https%3A%2F%2Fwww.instagram.com%2Freel%2FABC123%2F"
        );
    }

    #[test]
    fn test_relay_downloads_returned_url() {
        let http = Arc::new(JsonRelay {
            body: r#"{"data":{"video_url":"https://cdn.example/r.mp4"}}"#.into(),
            requests: RefCell::new(Vec::new()),
        });
        let strategy =
            ThirdPartyApi::new("https://relay.example/api", http.clone(), &ReelpostConfig::default())
                .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("ABC123.mp4");
        strategy.attempt(&source(), &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"relayed");
        assert_eq!(http.requests.borrow().last().unwrap(), "https://cdn.example/r.mp4");
    }

    #[test]
    fn test_rejects_unparseable_template() {
        let http: Arc<dyn HttpFetch> = Arc::new(JsonRelay {
            body: String::new(),
            requests: RefCell::new(Vec::new()),
        });
        assert!(ThirdPartyApi::new("relay without scheme", http, &ReelpostConfig::default()).is_err());
    }
}
