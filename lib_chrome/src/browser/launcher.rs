use crate::config::ExecBrowser;
use crate::errors::{ChromeError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

/// Headless flag set applied when `exec` runs with default flags.
pub const DEFAULT_EXEC_FLAGS: &[&str] = &[
    "--headless",
    "--disable-gpu",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-renderer-backgrounding",
    "--disable-sync",
    "--enable-automation",
    "--force-color-profile=srgb",
    "--hide-scrollbars",
    "--metrics-recording-only",
    "--mute-audio",
    "--password-store=basic",
    "--use-mock-keychain",
];

const BINARY_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "headless-shell",
];

const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

/// A local browser process plus everything needed to talk to and clean up
/// after it. `user_data_dir` is removed from disk when the browser is dropped.
pub struct LaunchedBrowser {
    pub ws_url: String,
    pub child: Option<Child>,
    pub user_data_dir: Option<TempDir>,
}

impl LaunchedBrowser {
    pub fn remote(ws_url: String) -> Self {
        Self {
            ws_url,
            child: None,
            user_data_dir: None,
        }
    }
}

/// Spawn a local browser and scrape its DevTools WebSocket URL from stderr.
pub async fn launch(exec: &ExecBrowser) -> Result<LaunchedBrowser> {
    let path = match &exec.path {
        Some(path) => PathBuf::from(path),
        None => find_binary().ok_or_else(|| {
            ChromeError::Provision(format!(
                "no browser binary found on PATH (tried {})",
                BINARY_CANDIDATES.join(", ")
            ))
        })?,
    };

    let user_data_dir = tempfile::Builder::new()
        .prefix("chrome-ssr-")
        .tempdir()
        .map_err(|err| ChromeError::Provision(format!("failed to create user data dir: {err}")))?;

    let mut command = Command::new(&path);
    if exec.default_flags {
        command.args(DEFAULT_EXEC_FLAGS);
    }
    command.args(&exec.flags);
    command
        .arg(format!("--user-data-dir={}", user_data_dir.path().display()))
        .arg("--remote-debugging-port=0")
        .arg("about:blank")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|err| {
        ChromeError::Provision(format!("failed to launch {}: {err}", path.display()))
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        ChromeError::Provision("browser stderr pipe unavailable".to_string())
    })?;

    let ws_url = tokio::time::timeout(STARTUP_TIMEOUT, read_devtools_url(stderr))
        .await
        .map_err(|_| {
            ChromeError::Provision(format!(
                "browser did not announce a DevTools endpoint within {STARTUP_TIMEOUT:?}"
            ))
        })??;

    log::info!("launched {} with DevTools at {}", path.display(), ws_url);
    Ok(LaunchedBrowser {
        ws_url,
        child: Some(child),
        user_data_dir: Some(user_data_dir),
    })
}

async fn read_devtools_url(stderr: ChildStderr) -> Result<String> {
    let mut lines = BufReader::new(stderr).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|err| ChromeError::Provision(format!("failed to read browser stderr: {err}")))?
    {
        if let Some(ws_url) = line.strip_prefix("DevTools listening on ") {
            let ws_url = ws_url.trim().to_string();
            // Keep draining so the child never blocks on a full pipe.
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    log::trace!("browser: {line}");
                }
            });
            return Ok(ws_url);
        }
        log::debug!("browser: {line}");
    }
    Err(ChromeError::Provision(
        "browser exited before announcing a DevTools endpoint".to_string(),
    ))
}

fn find_binary() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for candidate in BINARY_CANDIDATES {
            let full = dir.join(candidate);
            if full.is_file() {
                return Some(full);
            }
        }
    }
    None
}
