use crate::errors::{ChromeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Middleware configuration. Carries both wire forms: the JSON form maps
/// field-for-field, the textual `chrome { ... }` directive block is parsed by
/// [`ChromeConfig::parse_directive`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChromeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mime_types: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_browser: Option<ExecBrowser>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_browser: Option<RemoteBrowser>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fulfill_hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub continue_hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub links: bool,
}

/// Launch a local browser binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecBrowser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default_flags: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

/// Connect to an already-running browser over its WebSocket debugging URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteBrowser {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// How the browser is provisioned, after defaults are applied.
#[derive(Debug, Clone)]
pub enum BrowserMode {
    Exec(ExecBrowser),
    Remote(String),
}

/// Configuration with defaults applied and the timeout parsed, ready for
/// [`crate::Chrome::provision`].
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub timeout: Duration,
    pub mime_types: Vec<String>,
    pub browser: BrowserMode,
    pub fulfill_hosts: Vec<String>,
    pub continue_hosts: Vec<String>,
    pub links: bool,
}

impl ChromeConfig {
    /// Parse the textual directive block:
    ///
    /// ```text
    /// chrome {
    ///     mime_types text/html
    ///     exec /usr/bin/chromium -- --headless
    ///     links
    /// }
    /// ```
    ///
    /// One key per line. For `exec`/`exec_no_default_flags`, a bare token
    /// before any `--`-prefixed token is the binary path, a literal `--` is
    /// discarded, and everything from the first `--`-prefixed token on is
    /// collected as flags.
    pub fn parse_directive(input: &str) -> Result<ChromeConfig> {
        let mut lines = input
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));

        let header = lines
            .next()
            .ok_or_else(|| ChromeError::Config("empty directive".to_string()))?;
        let mut header_tokens = header.split_whitespace();
        if header_tokens.next() != Some("chrome") {
            return Err(ChromeError::Config(format!(
                "expected directive to start with 'chrome', got '{header}'"
            )));
        }

        let mut config = ChromeConfig::default();
        match header_tokens.next() {
            None => return Ok(config),
            Some("{") => {}
            Some(other) => {
                return Err(ChromeError::Config(format!(
                    "unexpected token '{other}' after 'chrome'"
                )))
            }
        }

        let mut closed = false;
        for line in lines {
            if line == "}" {
                closed = true;
                break;
            }
            let mut tokens = line.split_whitespace();
            let key = match tokens.next() {
                Some(key) => key,
                None => continue,
            };
            let args: Vec<&str> = tokens.collect();
            config.apply_key(key, &args)?;
        }
        if !closed {
            return Err(ChromeError::Config("unclosed 'chrome' block".to_string()));
        }
        Ok(config)
    }

    fn apply_key(&mut self, key: &str, args: &[&str]) -> Result<()> {
        match key {
            "timeout" => {
                let [value] = args else {
                    return Err(ChromeError::Config(
                        "timeout expects exactly one argument".to_string(),
                    ));
                };
                self.timeout = Some(value.to_string());
            }
            "mime_types" => {
                if args.is_empty() {
                    return Err(ChromeError::Config(
                        "mime_types expects at least one argument".to_string(),
                    ));
                }
                self.mime_types = args.iter().map(|s| s.to_string()).collect();
            }
            "exec" | "exec_no_default_flags" => {
                let mut exec = ExecBrowser {
                    default_flags: key == "exec",
                    ..ExecBrowser::default()
                };
                let mut flags_started = false;
                for token in args {
                    if token.starts_with("--") {
                        flags_started = true;
                    }
                    if *token == "--" {
                        continue;
                    }
                    if flags_started {
                        exec.flags.push(token.to_string());
                    } else {
                        exec.path = Some(token.to_string());
                    }
                }
                self.exec_browser = Some(exec);
            }
            "url" => {
                let [value] = args else {
                    return Err(ChromeError::Config(
                        "url expects exactly one argument".to_string(),
                    ));
                };
                self.remote_browser = Some(RemoteBrowser {
                    url: value.to_string(),
                });
            }
            "fulfill_hosts" => {
                self.fulfill_hosts.extend(args.iter().map(|s| s.to_string()));
            }
            "continue_hosts" => {
                self.continue_hosts.extend(args.iter().map(|s| s.to_string()));
            }
            "links" => {
                if !args.is_empty() {
                    return Err(ChromeError::Config(
                        "links takes no arguments".to_string(),
                    ));
                }
                self.links = true;
            }
            other => {
                return Err(ChromeError::Config(format!("unknown key '{other}'")));
            }
        }
        Ok(())
    }

    /// Apply defaults and validate. Exactly one provisioning mode survives:
    /// configuring both `exec` and `url` is an error, configuring neither
    /// implies a local exec with the default flag set.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let browser = match (&self.exec_browser, &self.remote_browser) {
            (Some(_), Some(_)) => {
                return Err(ChromeError::Config(
                    "cannot specify both exec and remote browser".to_string(),
                ))
            }
            (Some(exec), None) => BrowserMode::Exec(exec.clone()),
            (None, Some(remote)) => {
                if remote.url.is_empty() {
                    return Err(ChromeError::Config(
                        "remote browser URL is empty".to_string(),
                    ));
                }
                BrowserMode::Remote(remote.url.clone())
            }
            (None, None) => BrowserMode::Exec(ExecBrowser {
                default_flags: true,
                ..ExecBrowser::default()
            }),
        };

        let timeout = match &self.timeout {
            Some(value) => parse_duration(value)
                .map_err(|err| ChromeError::Config(format!("invalid timeout '{value}': {err}")))?,
            None => DEFAULT_TIMEOUT,
        };

        let mime_types = if self.mime_types.is_empty() {
            vec!["text/html".to_string()]
        } else {
            self.mime_types
                .iter()
                .map(|m| m.to_ascii_lowercase())
                .collect()
        };

        Ok(ResolvedConfig {
            timeout,
            mime_types,
            browser,
            fulfill_hosts: self.fulfill_hosts.clone(),
            continue_hosts: self.continue_hosts.clone(),
            links: self.links,
        })
    }
}

/// Parse duration strings like `500ms`, `10s`, `1m30s`, `2h`.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in '{input}'"))?;
        if digits_end == 0 {
            return Err(format!("expected a number in '{input}'"));
        }
        let value: u64 = rest[..digits_end]
            .parse()
            .map_err(|_| format!("bad number in '{input}'"))?;
        rest = &rest[digits_end..];
        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];
        total += match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            other => return Err(format!("unknown unit '{other}' in '{input}'")),
        };
    }
    Ok(total)
}
