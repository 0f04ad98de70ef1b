use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::{DownloadStrategy, StrategyError};
use crate::config::ReelpostConfig;
use crate::source::SourceUrl;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Only the tail of stderr is kept for the failure report.
const STDERR_TAIL: usize = 600;

/// Downloads through an external `yt-dlp` binary.
pub struct CommandLineExtractor {
    binary: String,
    cookies_from_browser: Option<String>,
    cookies_file: Option<PathBuf>,
    timeout: Duration,
}

impl CommandLineExtractor {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            cookies_from_browser: None,
            cookies_file: None,
            timeout,
        }
    }

    pub fn from_config(cfg: &ReelpostConfig) -> Self {
        Self {
            cookies_from_browser: cfg.cookies_from_browser.clone(),
            cookies_file: cfg.cookies_file.clone(),
            ..Self::new(&cfg.ytdlp_binary, cfg.tool_timeout)
        }
    }

    fn build_args(&self, source: &SourceUrl, dest: &Path) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-playlist",
            "--no-part",
            "--no-progress",
            "--quiet",
            "--force-overwrites",
            "-f",
            "mp4/best[ext=mp4]",
            "-o",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(dest.to_string_lossy().into_owned());

        if let Some(browser) = &self.cookies_from_browser {
            args.push("--cookies-from-browser".into());
            args.push(browser.clone());
        }
        if let Some(file) = &self.cookies_file {
            args.push("--cookies".into());
            args.push(file.to_string_lossy().into_owned());
        }

        args.push(source.canonical().to_string());
        args
    }
}

impl DownloadStrategy for CommandLineExtractor {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn attempt(&self, source: &SourceUrl, dest: &Path) -> Result<(), StrategyError> {
        let binary = which::which(&self.binary)
            .map_err(|_| StrategyError::Unavailable(format!("{} not found on PATH", self.binary)))?;

        let args = self.build_args(source, dest);
        debug!("running {} {}", binary.display(), args.join(" "));

        let child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let (status, stderr) = wait_with_timeout(child, self.timeout)?;
        if !status.success() {
            return Err(StrategyError::Tool {
                tool: self.binary.clone(),
                status: status.to_string(),
                stderr: tail(&stderr, STDERR_TAIL),
            });
        }
        Ok(())
    }
}

/// Wait for `child`, killing it once `timeout` has elapsed.
///
/// Stderr is drained on a separate thread so a chatty process cannot fill
/// the pipe and stall.
pub fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
) -> Result<(ExitStatus, String), StrategyError> {
    let reader = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    });

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            let stderr = reader
                .and_then(|handle| handle.join().ok())
                .unwrap_or_default();
            return Ok((status, stderr));
        }
        if Instant::now() >= deadline {
            warn!("process {} timed out after {}s, killing", child.id(), timeout.as_secs());
            let _ = child.kill();
            let _ = child.wait();
            // Grandchildren may still hold the pipe open; the reader is left detached.
            return Err(StrategyError::Timeout(timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}
