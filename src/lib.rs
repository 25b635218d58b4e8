pub mod audio;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod playback;
pub mod protocol;
pub mod server;
pub mod tts;

pub use config::ServerSettings;
pub use error::AppError;
pub use server::Server;
