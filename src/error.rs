#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Undecodable request: {0}")]
    Decode(String),

    #[error("Invalid request schema: {0}")]
    Schema(String),

    #[error("Engine {engine} failed to initialize: {reason}")]
    EngineInit { engine: String, reason: String },

    #[error("TTS generation failed: {0}")]
    Synthesis(String),

    #[error("Audio cache error: {0}")]
    CacheIo(String),

    #[error("Pipe error: {0}")]
    PipeIo(String),

    #[error("Voice not found: {0}")]
    VoiceNotFound(String),

    #[error("Engine {engine} does not support {capability}")]
    Unsupported {
        engine: String,
        capability: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn engine_init(engine: &str, reason: impl Into<String>) -> Self {
        AppError::EngineInit {
            engine: engine.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Decode(_) => "DECODE_ERROR",
            AppError::Schema(_) => "SCHEMA_ERROR",
            AppError::EngineInit { .. } => "ENGINE_INIT_ERROR",
            AppError::Synthesis(_) => "SYNTHESIS_ERROR",
            AppError::CacheIo(_) => "CACHE_IO_ERROR",
            AppError::PipeIo(_) => "PIPE_IO_ERROR",
            AppError::VoiceNotFound(_) => "VOICE_NOT_FOUND",
            AppError::Unsupported { .. } => "UNSUPPORTED",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Json(_) => "JSON_ERROR",
        }
    }

    /// Log the failure the way every request-path error is reported.
    pub fn log(&self) {
        tracing::error!("Request failed: {} - {}", self.code(), self);
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::CacheIo(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_init_message() {
        let err = AppError::engine_init("azureTTS", "missing key");
        assert_eq!(err.code(), "ENGINE_INIT_ERROR");
        assert_eq!(
            err.to_string(),
            "Engine azureTTS failed to initialize: missing key"
        );
    }

    #[test]
    fn test_sqlite_errors_become_cache_io() {
        let err: AppError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.code(), "CACHE_IO_ERROR");
    }
}
