use clap::Parser;
use lib_chrome::ChromeConfig;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(about = "Static file server with server-side rendering through headless Chromium")]
pub struct Config {
    #[clap(long, env = "CHROME_SSR_PORT", default_value = "9080")]
    pub port: u16,

    /// Document root served by the file server.
    #[clap(long, env = "CHROME_SSR_ROOT", default_value = "./servers/testdata")]
    pub root: PathBuf,

    #[clap(long, env = "CHROME_SSR_LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    #[clap(long, env = "CHROME_SSR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// JSON middleware configuration file.
    #[clap(long, env = "CHROME_SSR_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    /// Textual `chrome { ... }` directive file; alternative to --config-path.
    #[clap(long, env = "CHROME_SSR_DIRECTIVE_PATH")]
    pub directive_path: Option<PathBuf>,
}

pub fn load_config() -> Config {
    Config::parse()
}

/// Load the middleware configuration from whichever form was given. With
/// neither, the defaults apply (local exec, default flags, text/html).
pub fn load_chrome_config(config: &Config) -> anyhow::Result<ChromeConfig> {
    match (&config.config_path, &config.directive_path) {
        (Some(_), Some(_)) => {
            anyhow::bail!("specify at most one of --config-path and --directive-path")
        }
        (Some(path), None) => {
            let raw = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        (None, Some(path)) => {
            let raw = fs::read_to_string(path)?;
            Ok(ChromeConfig::parse_directive(&raw)?)
        }
        (None, None) => Ok(ChromeConfig::default()),
    }
}
