use std::time::Duration;

use lazy_static::lazy_static;

use crate::error::AppError;

pub const USER_AGENT: &str = concat!("tts-pipe-server/", env!("CARGO_PKG_VERSION"));

lazy_static! {
    pub static ref AGENT: ureq::Agent = {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(60)))
            .build();
        config.into()
    };
}

/// Error raised while building an engine handle.
pub fn init_error(engine: &str, e: ureq::Error) -> AppError {
    let reason = match e {
        ureq::Error::StatusCode(401) | ureq::Error::StatusCode(403) => {
            "credentials were rejected".to_string()
        }
        other => format!("service unreachable: {}", other),
    };
    AppError::engine_init(engine, reason)
}

/// Error raised by a provider call on an existing handle.
pub fn call_error(engine: &str, e: ureq::Error) -> AppError {
    AppError::Synthesis(format!("{} request failed: {}", engine, e))
}

pub fn require(engine: &str, value: Option<&str>, what: &str) -> Result<String, AppError> {
    value
        .map(str::to_string)
        .ok_or_else(|| AppError::engine_init(engine, format!("{} not configured", what)))
}
