use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use reelpost::acquire::fetch::ReqwestFetch;
use reelpost::auth::{
    self, AuthorizationPrompt, AuthorizationReply, ClientSecrets, CredentialSource, FileTokenStore,
    InteractiveFlow, LoopbackPrompt, OAuthClient, PastePrompt, PendingAuthorization, TokenStore,
};
use reelpost::config::{
    DEFAULT_CLIENT_SECRETS_FILE, DEFAULT_MEDIA_TIMEOUT_SECS, DEFAULT_PAGE_TIMEOUT_SECS,
    DEFAULT_TOKEN_FILE, DEFAULT_TOOL_TIMEOUT_SECS, DEFAULT_UPLOAD_CHUNK_SIZE, DEFAULT_WORK_DIR,
    DEFAULT_YTDLP_BINARY, LOOPBACK_PORT, TOKEN_JSON_ENV, UPLOAD_SCOPE,
};
use reelpost::{
    AcquireError, MediaAsset, Pipeline, PipelineError, PipelineHook, Privacy, PublishOutcome,
    ReelpostConfig, SourceAcquirer, Stage, YoutubeUploader,
};

/// reelpost: repost a short-form video from a post link to YouTube Shorts.
#[derive(Parser)]
#[command(name = "reelpost", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Serialized credential JSON (authorized-user layout)
    #[arg(long, env = TOKEN_JSON_ENV, hide_env_values = true, global = true)]
    token_json: Option<String>,

    /// Where the credential is stored between runs
    #[arg(long, default_value = DEFAULT_TOKEN_FILE, global = true)]
    token_file: PathBuf,

    /// OAuth client registration downloaded from the cloud console
    #[arg(long, default_value = DEFAULT_CLIENT_SECRETS_FILE, global = true)]
    client_secrets: PathBuf,

    /// Scratch directory for downloaded media
    #[arg(long, default_value = DEFAULT_WORK_DIR, global = true)]
    work_dir: PathBuf,

    /// Never start the browser authorization flow
    #[arg(long, global = true)]
    no_interactive: bool,

    /// Visibility of the published video
    #[arg(long, value_enum, default_value_t = Privacy::Public, global = true)]
    privacy: Privacy,

    /// Video category id
    #[arg(long, default_value = "22", global = true)]
    category: String,

    /// yt-dlp executable
    #[arg(long, default_value = DEFAULT_YTDLP_BINARY, global = true)]
    ytdlp: String,

    /// Browser to read cookies from (passed to yt-dlp)
    #[arg(long, global = true)]
    cookies_from_browser: Option<String>,

    /// Netscape cookies file (passed to yt-dlp)
    #[arg(long, global = true)]
    cookies: Option<PathBuf>,

    /// Download relay endpoint; `{url}` is replaced by the post link. Repeatable.
    #[arg(long = "relay", global = true)]
    relays: Vec<String>,

    /// Page fetch timeout in seconds
    #[arg(long, default_value_t = DEFAULT_PAGE_TIMEOUT_SECS, global = true)]
    page_timeout: u64,

    /// Media download timeout in seconds
    #[arg(long, default_value_t = DEFAULT_MEDIA_TIMEOUT_SECS, global = true)]
    media_timeout: u64,

    /// yt-dlp timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TOOL_TIMEOUT_SECS, global = true)]
    tool_timeout: u64,

    /// Upload chunk size in bytes (rounded down to a multiple of 256 KiB)
    #[arg(long, default_value_t = DEFAULT_UPLOAD_CHUNK_SIZE, global = true)]
    chunk_size: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a post and publish it
    Run {
        /// Post link (asked for on stdin if omitted)
        #[arg(short, long)]
        url: Option<String>,

        /// Video title (asked for on stdin if omitted)
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Publish a video file downloaded by other means
    Upload {
        /// Local video file (mp4, mov, avi, mkv)
        #[arg(short, long)]
        file: PathBuf,

        /// Video title
        #[arg(short, long)]
        title: String,
    },

    /// Download a post without publishing it
    Download {
        /// Post link
        #[arg(short, long)]
        url: String,
    },

    /// Manage the upload credential
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Authorize in the browser, store the credential and print it
    Login {
        /// Paste the redirect address instead of listening on a local port
        #[arg(long)]
        paste: bool,
    },

    /// Start a two-step authorization and print the consent URL
    Begin,

    /// Finish a two-step authorization
    Complete {
        /// Authorization code, or the full address the browser was sent to
        #[arg(long)]
        code: String,
    },
}

impl Cli {
    fn config(&self) -> ReelpostConfig {
        ReelpostConfig {
            work_dir: self.work_dir.clone(),
            token_file: self.token_file.clone(),
            client_secrets_file: self.client_secrets.clone(),
            ytdlp_binary: self.ytdlp.clone(),
            cookies_from_browser: self.cookies_from_browser.clone(),
            cookies_file: self.cookies.clone(),
            relay_endpoints: self.relays.clone(),
            page_timeout: Duration::from_secs(self.page_timeout),
            media_timeout: Duration::from_secs(self.media_timeout),
            tool_timeout: Duration::from_secs(self.tool_timeout),
            upload_chunk_size: self.chunk_size,
            privacy: self.privacy,
            category_id: self.category.clone(),
            allow_interactive: !self.no_interactive,
            ..Default::default()
        }
    }
}

/// Prints one status line per pipeline stage.
struct StatusLine;

impl PipelineHook for StatusLine {
    fn on_stage(&self, stage: Stage) {
        match stage {
            Stage::Idle => {}
            _ => eprintln!("> {stage}"),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg = cli.config();

    match &cli.command {
        Commands::Run { url, title } => {
            let url = match url {
                Some(u) => u.clone(),
                None => ask("Post link")?,
            };
            let title = match title {
                Some(t) => t.clone(),
                None => ask("Title")?,
            };
            let pipeline = build_pipeline(&cfg, cli.token_json.clone())?;
            finish(pipeline.run(&url, &title, &StatusLine))
        }

        Commands::Upload { file, title } => {
            let asset = MediaAsset::import(file, &cfg.work_dir)
                .with_context(|| format!("cannot use {}", file.display()))?;
            let pipeline = build_pipeline(&cfg, cli.token_json.clone())?;
            finish(pipeline.run_with_asset(asset, title, &StatusLine))
        }

        Commands::Download { url } => {
            let acquirer = build_acquirer(&cfg)?;
            match acquirer.acquire(url) {
                Ok(asset) => {
                    println!("{}", asset.path().display());
                    println!("  size:   {} bytes", asset.size());
                    println!("  sha256: {}", asset.sha256());
                    Ok(())
                }
                Err(e) => {
                    let failure = PipelineError::Acquisition(e);
                    report(&failure);
                    std::process::exit(failure.exit_code());
                }
            }
        }

        Commands::Auth { action } => run_auth(action, &cfg),
    }
}

fn build_acquirer(cfg: &ReelpostConfig) -> Result<SourceAcquirer> {
    let mut fetch = ReqwestFetch::new().context("building HTTP client")?;
    if !std::io::stderr().is_terminal() {
        fetch = fetch.quiet();
    }
    Ok(SourceAcquirer::from_config(cfg, Arc::new(fetch)))
}

fn build_pipeline(cfg: &ReelpostConfig, token_json: Option<String>) -> Result<Pipeline> {
    let acquirer = build_acquirer(cfg)?;
    let resolver = auth::build_resolver(cfg, token_json).context("configuring credentials")?;
    let mut uploader = YoutubeUploader::new(cfg).context("building upload client")?;
    if !std::io::stderr().is_terminal() {
        uploader = uploader.quiet();
    }
    Ok(Pipeline::new(acquirer, resolver, Box::new(uploader), cfg.clone()))
}

fn finish(result: std::result::Result<PublishOutcome, PipelineError>) -> Result<()> {
    match result {
        Ok(outcome) => {
            println!("Published \"{}\"", outcome.title);
            println!("  {}", outcome.watch_url);
            println!("  {}", outcome.shorts_url);
            Ok(())
        }
        Err(failure) => {
            report(&failure);
            std::process::exit(failure.exit_code());
        }
    }
}

fn report(failure: &PipelineError) {
    eprintln!("error ({}): {failure}", failure.stage());
    if let PipelineError::Acquisition(AcquireError::AllStrategiesFailed { failures, .. }) = failure {
        for f in failures {
            eprintln!("  - {f}");
        }
    }
    if let PipelineError::Publish { error, .. } = failure {
        if error.requires_reauth() {
            eprintln!("  run `reelpost auth login` and try again");
        } else if error.is_retryable() {
            eprintln!("  the media file was kept; `reelpost upload` can retry it");
        }
    }
}

fn run_auth(action: &AuthAction, cfg: &ReelpostConfig) -> Result<()> {
    let secrets = ClientSecrets::from_file(&cfg.client_secrets_file)?;
    let client = OAuthClient::new(secrets, UPLOAD_SCOPE)?;
    let store = FileTokenStore::new(&cfg.token_file);
    let pending_path = cfg.pending_auth_file();

    let credential = match action {
        AuthAction::Login { paste } => {
            let prompt: Box<dyn AuthorizationPrompt> = if *paste {
                Box::new(PastePrompt::new())
            } else {
                Box::new(LoopbackPrompt::new(LOOPBACK_PORT))
            };
            InteractiveFlow::new(client, prompt)
                .obtain()?
                .context("authorization produced no credential")?
        }

        AuthAction::Begin => {
            let redirect_uri = format!("http://127.0.0.1:{LOOPBACK_PORT}/");
            let (url, pending) = client.begin(&redirect_uri)?;
            pending.save(&pending_path)?;
            println!("{url}");
            eprintln!(
                "Open the URL above, approve access, then run:\n  reelpost auth complete --code '<address you were redirected to>'"
            );
            return Ok(());
        }

        AuthAction::Complete { code } => {
            let pending = PendingAuthorization::load(&pending_path)?;
            let Some(reply) = AuthorizationReply::parse(code)? else {
                bail!("no authorization code given");
            };
            let credential = client.complete(&pending, &reply)?;
            PendingAuthorization::clear(&pending_path)?;
            credential
        }
    };

    let payload = credential.to_json()?;
    store
        .save(&payload)
        .with_context(|| format!("saving credential to {}", store.describe()))?;
    eprintln!("Credential saved to {}. To inject it elsewhere, set {TOKEN_JSON_ENV} to:", store.describe());
    println!("{payload}");
    Ok(())
}

fn ask(label: &str) -> Result<String> {
    eprint!("{label}: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading from stdin")?;
    let value = line.trim();
    if value.is_empty() {
        bail!("{} is required", label.to_lowercase());
    }
    Ok(value.to_string())
}
