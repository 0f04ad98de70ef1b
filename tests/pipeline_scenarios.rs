use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use reelpost::acquire::fetch::{FetchError, HttpFetch};
use reelpost::acquire::relay::ThirdPartyApi;
use reelpost::acquire::scrape::PageScrape;
use reelpost::auth::{InjectedSecret, TokenEndpoint};
use reelpost::config::UPLOAD_SCOPE;
use reelpost::{
    AcquireError, CredentialResolver, NoopHook, Pipeline, PipelineError, PublishError, PublishRequest,
    Published, Publisher, ReelpostConfig, SourceAcquirer, SourcePatterns, Stage,
};

const LINK: &str = "https://site.example/reel/ABC123";
const MEDIA_BYTES: usize = 4_000_000;

enum Reply {
    Timeout,
    Page(&'static str),
    Media(usize),
}

/// Fake network keyed by `host + path`; counts every request.
#[derive(Default)]
struct FakeNet {
    routes: HashMap<String, Reply>,
    requests: Cell<usize>,
}

impl FakeNet {
    fn route(mut self, key: &str, reply: Reply) -> Self {
        self.routes.insert(key.to_string(), reply);
        self
    }

    fn lookup(&self, url: &Url) -> Option<&Reply> {
        self.requests.set(self.requests.get() + 1);
        let key = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
        self.routes.get(&key)
    }
}

fn not_found(url: &Url) -> FetchError {
    FetchError::Status {
        url: url.to_string(),
        status: 404,
    }
}

impl HttpFetch for FakeNet {
    fn get_text(&self, url: &Url, _timeout: Duration) -> Result<String, FetchError> {
        match self.lookup(url) {
            Some(Reply::Page(body)) => Ok(body.to_string()),
            Some(Reply::Timeout) => Err(FetchError::Timeout { url: url.to_string() }),
            _ => Err(not_found(url)),
        }
    }

    fn download(&self, url: &Url, dest: &Path, _timeout: Duration) -> Result<u64, FetchError> {
        match self.lookup(url) {
            Some(Reply::Media(len)) => {
                std::fs::write(dest, vec![0x42u8; *len]).map_err(|source| FetchError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
                Ok(*len as u64)
            }
            Some(Reply::Timeout) => Err(FetchError::Timeout { url: url.to_string() }),
            _ => Err(not_found(url)),
        }
    }
}

/// Records every request it receives.
struct RecordingPublisher {
    calls: Rc<Cell<usize>>,
    sizes: Rc<RefCell<Vec<u64>>>,
}

impl Publisher for RecordingPublisher {
    fn publish(&self, request: &PublishRequest) -> Result<Published, PublishError> {
        self.calls.set(self.calls.get() + 1);
        self.sizes.borrow_mut().push(request.media_size);
        Ok(Published {
            video_id: "shorts01".into(),
        })
    }
}

fn publisher() -> (Box<dyn Publisher>, Rc<Cell<usize>>, Rc<RefCell<Vec<u64>>>) {
    let calls = Rc::new(Cell::new(0));
    let sizes = Rc::new(RefCell::new(Vec::new()));
    let publisher = RecordingPublisher {
        calls: calls.clone(),
        sizes: sizes.clone(),
    };
    (Box::new(publisher), calls, sizes)
}

fn patterns() -> SourcePatterns {
    SourcePatterns::new(["site.example"], ["reel", "p"])
}

fn acquirer(net: Arc<FakeNet>, work_dir: &Path) -> SourceAcquirer {
    let cfg = ReelpostConfig::default();
    SourceAcquirer::new(patterns(), work_dir)
        .with_strategy(PageScrape::embed(net.clone(), &cfg))
        .with_strategy(PageScrape::direct(net.clone(), &cfg))
        .with_strategy(
            ThirdPartyApi::new("https://relay.example/api/fetch?link={url}", net, &cfg).unwrap(),
        )
}

fn resolver(token: Option<&str>) -> CredentialResolver {
    let resolver = CredentialResolver::new(UPLOAD_SCOPE, Box::new(TokenEndpoint::new().unwrap()));
    match token {
        Some(t) => resolver.with_source(InjectedSecret::new(Some(t.to_string()))),
        None => resolver,
    }
}

#[test]
fn scenario_a_timeout_then_scrape_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let net = Arc::new(
        FakeNet::default()
            .route("site.example/reel/ABC123/embed/captioned/", Reply::Timeout)
            .route(
                "site.example/reel/ABC123/",
                Reply::Page(r#"<meta property="og:video" content="https://cdn.example/v/abc.mp4">"#),
            )
            .route("cdn.example/v/abc.mp4", Reply::Media(MEDIA_BYTES)),
    );

    let asset = acquirer(net.clone(), dir.path()).acquire(LINK).unwrap();
    assert_eq!(asset.path(), dir.path().join("ABC123.mp4"));
    assert!(asset.size() >= MEDIA_BYTES as u64);
    assert_eq!(net.requests.get(), 3);

    let (publisher, calls, sizes) = publisher();
    let pipeline = Pipeline::new(
        acquirer(net, dir.path()),
        resolver(Some(r#"{"token":"ya29.test"}"#)),
        publisher,
        ReelpostConfig::default(),
    );
    let outcome = pipeline.run(LINK, "Reel", &NoopHook).unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(*sizes.borrow(), vec![MEDIA_BYTES as u64]);
    assert_eq!(outcome.title, "Reel #Shorts");
    assert_eq!(outcome.watch_url, "https://www.youtube.com/watch?v=shorts01");
    assert!(!dir.path().join("ABC123.mp4").exists());
}

#[test]
fn scenario_b_link_without_identifier_makes_no_requests() {
    let dir = tempfile::tempdir().unwrap();
    let net = Arc::new(FakeNet::default());
    let (publisher, calls, _) = publisher();
    let pipeline = Pipeline::new(
        acquirer(net.clone(), dir.path()),
        resolver(Some(r#"{"token":"t"}"#)),
        publisher,
        ReelpostConfig::default(),
    );

    let failure = pipeline.run("https://site.example/reel/", "t", &NoopHook).unwrap_err();
    assert!(matches!(
        failure,
        PipelineError::Acquisition(AcquireError::InvalidSource(_))
    ));
    assert_eq!(failure.exit_code(), 2);
    assert_eq!(net.requests.get(), 0);
    assert_eq!(calls.get(), 0);
}

#[test]
fn scenario_c_all_strategies_fail_and_nothing_is_published() {
    let dir = tempfile::tempdir().unwrap();
    let net = Arc::new(
        FakeNet::default()
            .route("site.example/reel/ABC123/", Reply::Page("<html>log in to continue</html>"))
            .route("relay.example/api/fetch", Reply::Page(r#"{"status":"error"}"#)),
    );
    let (publisher, calls, _) = publisher();
    let pipeline = Pipeline::new(
        acquirer(net, dir.path()),
        resolver(Some(r#"{"token":"t"}"#)),
        publisher,
        ReelpostConfig::default(),
    );

    let failure = pipeline.run(LINK, "t", &NoopHook).unwrap_err();
    assert_eq!(failure.stage(), Stage::AcquireFailed);
    assert_eq!(failure.exit_code(), 3);
    match failure {
        PipelineError::Acquisition(AcquireError::AllStrategiesFailed { failures, .. }) => {
            let names: Vec<_> = failures.iter().map(|f| f.strategy.as_str()).collect();
            assert_eq!(names, ["embed-page", "post-page", "relay:relay.example"]);
            assert!(failures[0].reason.contains("404"));
        }
        other => panic!("unexpected failure: {other}"),
    }
    assert_eq!(calls.get(), 0);
    assert!(!dir.path().join("ABC123.mp4").exists());
}

#[test]
fn scenario_d_no_credentials_keeps_media() {
    let dir = tempfile::tempdir().unwrap();
    let net = Arc::new(
        FakeNet::default()
            .route(
                "site.example/reel/ABC123/embed/captioned/",
                Reply::Page(r#"{"video_url":"https:\/\/cdn.example\/v\/abc.mp4"}"#),
            )
            .route("cdn.example/v/abc.mp4", Reply::Media(2048)),
    );
    let (publisher, calls, _) = publisher();
    let pipeline = Pipeline::new(acquirer(net, dir.path()), resolver(None), publisher, ReelpostConfig::default());

    let failure = pipeline.run(LINK, "t", &NoopHook).unwrap_err();
    assert_eq!(failure.stage(), Stage::AuthFailed);
    assert_eq!(failure.exit_code(), 4);
    assert_eq!(calls.get(), 0);

    let kept = dir.path().join("ABC123.mp4");
    assert_eq!(failure.asset_path(), Some(&kept));
    assert_eq!(std::fs::metadata(&kept).unwrap().len(), 2048);
}
