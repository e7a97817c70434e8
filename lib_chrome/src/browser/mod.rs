mod launcher;

#[allow(clippy::module_inception)]
mod browser;

pub use browser::{Browser, Session};
pub use launcher::DEFAULT_EXEC_FLAGS;
