use thiserror::Error;

/// Error kinds surfaced by the middleware. Provisioning-time errors
/// (`Config`, `Provision`) prevent startup; the rest are fatal to a single
/// request only and never to the process.
#[derive(Debug, Error)]
pub enum ChromeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to provision browser: {0}")]
    Provision(String),

    #[error("{method} failed: {message}")]
    Cdp { method: String, message: String },

    #[error("browser connection lost: {0}")]
    Transport(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("intercepted request failed: {0}")]
    Intercept(String),
}

pub type Result<T> = std::result::Result<T, ChromeError>;
