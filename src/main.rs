use tts_pipe_server::config::log_file_from_env;
use tts_pipe_server::logging::{self, LOG_CHECK_INTERVAL};
use tts_pipe_server::{Server, ServerSettings};

#[tokio::main]
async fn main() {
    logging::init(log_file_from_env().as_deref());

    let settings = match ServerSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("TTS Pipe Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Pipe name: {}", settings.pipe_name);
    tracing::info!("Audio directory: {}", settings.audio_dir.display());
    tracing::info!("Voices directory: {}", settings.voices_dir.display());

    if let Some(path) = &settings.log_file {
        tracing::info!("Log file: {} (capped at {} bytes)", path.display(), settings.log_max_bytes);
        logging::spawn_size_cap(path.clone(), settings.log_max_bytes, LOG_CHECK_INTERVAL);
    }

    let result = match Server::new(settings) {
        Ok(server) => server.run().await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::error!("Server stopped: {} - {}", e.code(), e);
        std::process::exit(1);
    }
}
