use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
use interprocess::local_socket::{GenericNamespaced, ListenerOptions, Name, ToNsName};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::cache::AudioCache;
use crate::config::ServerSettings;
use crate::dispatch::RequestDispatcher;
use crate::error::AppError;
use crate::protocol::{self, MAX_MESSAGE_SIZE};
use crate::tts::{BuiltinEngines, EngineRegistry};

/// How long to wait for the rest of a framed request split across reads.
const FRAME_WAIT: Duration = Duration::from_millis(500);

pub fn pipe_name(name: &str) -> Result<Name<'_>, AppError> {
    name.to_ns_name::<GenericNamespaced>()
        .map_err(|e| AppError::PipeIo(format!("invalid pipe name '{}': {}", name, e)))
}

/// Whether something already answers on the endpoint.
pub async fn instance_running(name: &str) -> bool {
    match pipe_name(name) {
        Ok(name) => Stream::connect(name).await.is_ok(),
        Err(_) => false,
    }
}

/// Owns the named endpoint and serves one request per connection, forever.
pub struct PipeListener {
    name: String,
    listener: Listener,
    dispatcher: Arc<RequestDispatcher>,
}

impl PipeListener {
    pub fn bind(name: &str, dispatcher: Arc<RequestDispatcher>) -> Result<Self, AppError> {
        let listener = ListenerOptions::new()
            .name(pipe_name(name)?)
            .try_overwrite(true)
            .create_tokio()
            .map_err(|e| AppError::PipeIo(format!("cannot create pipe '{}': {}", name, e)))?;

        tracing::info!("Listening on pipe {}", name);
        Ok(Self {
            name: name.to_string(),
            listener,
            dispatcher,
        })
    }

    /// Accept and serve clients one at a time. Per-connection failures are
    /// logged and never end the loop.
    pub async fn serve(self) {
        tracing::info!("Accepting clients on {}", self.name);
        loop {
            let conn = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            tracing::debug!("Client connected");
            if let Err(e) = self.serve_connection(conn).await {
                e.log();
            }
            tracing::debug!("Connection closed");
        }
    }

    async fn serve_connection(&self, mut conn: Stream) -> Result<(), AppError> {
        let buf = read_request(&mut conn).await?;
        if buf.is_empty() {
            tracing::debug!("Client sent nothing");
            return Ok(());
        }
        tracing::info!("Received {} bytes", buf.len());

        // Undecodable or malformed requests get no response.
        let message = match protocol::decode(&buf).and_then(|request| request.parse()) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping request: {} - {}", e.code(), e);
                return Ok(());
            }
        };

        let job = self.dispatcher.dispatch(message);
        let response = self.dispatcher.handle(job).await;
        let kind = response.kind();
        let bytes = protocol::encode(response)?;

        if bytes.is_empty() {
            tracing::info!("No response data to send");
            return Ok(());
        }

        conn.write_all(&bytes)
            .await
            .map_err(|e| AppError::PipeIo(format!("write failed: {}", e)))?;
        conn.flush()
            .await
            .map_err(|e| AppError::PipeIo(format!("flush failed: {}", e)))?;
        tracing::info!("Sent {} response, {} bytes", kind, bytes.len());
        Ok(())
    }
}

/// Read one request of at most [`MAX_MESSAGE_SIZE`] bytes.
///
/// Byte-stream sockets may split a framed request across reads, so a frame
/// whose declared length has not fully arrived is read further, until it
/// completes, the client closes, or [`FRAME_WAIT`] passes.
async fn read_request<R>(conn: &mut R) -> Result<Vec<u8>, AppError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
    let mut filled = read_some(conn, &mut buf).await?;
    if filled == 0 {
        return Ok(Vec::new());
    }

    let deadline = tokio::time::Instant::now() + FRAME_WAIT;
    while let Some(total) = protocol::declared_total(&buf[..filled]) {
        if filled >= total {
            break;
        }
        match tokio::time::timeout_at(deadline, read_some(conn, &mut buf[filled..])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::debug!("Frame incomplete after {:?}; decoding {} bytes", FRAME_WAIT, filled);
                break;
            }
        }
    }

    buf.truncate(filled);
    Ok(buf)
}

async fn read_some<R>(conn: &mut R, buf: &mut [u8]) -> Result<usize, AppError>
where
    R: AsyncRead + Unpin,
{
    conn.read(buf)
        .await
        .map_err(|e| AppError::PipeIo(format!("read failed: {}", e)))
}

/// Delete stale cache files on a fixed cadence, starting now.
pub fn spawn_sweeper(
    dispatcher: Arc<RequestDispatcher>,
    every: Duration,
    max_age_days: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let dispatcher = Arc::clone(&dispatcher);
            let swept = tokio::task::spawn_blocking(move || {
                dispatcher.cache().map(|cache| cache.sweep(max_age_days))
            })
            .await;

            match swept {
                Ok(Some(Ok(removed))) => {
                    tracing::info!("Cache sweep removed {} file(s)", removed.len())
                }
                Ok(Some(Err(e))) => e.log(),
                Ok(None) => return,
                Err(e) => tracing::error!("Cache sweep task failed: {}", e),
            }
        }
    })
}

/// The full server: settings, engines, cache and endpoint.
pub struct Server {
    settings: ServerSettings,
    dispatcher: Arc<RequestDispatcher>,
}

impl Server {
    pub fn new(settings: ServerSettings) -> Result<Self, AppError> {
        let defaults = settings.load_defaults()?;
        let registry = EngineRegistry::new(Box::new(BuiltinEngines::new(
            settings.voices_dir.clone(),
        )));

        let cache = match AudioCache::open(&settings.audio_dir) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!("Audio cache disabled: {}", e);
                None
            }
        };

        let dispatcher = Arc::new(RequestDispatcher::new(
            registry,
            cache,
            defaults,
            settings.job_timeout,
        ));
        Ok(Self {
            settings,
            dispatcher,
        })
    }

    /// Refuse to start beside a running instance, then serve until the process ends.
    pub async fn run(self) -> Result<(), AppError> {
        let name = &self.settings.pipe_name;
        if instance_running(name).await {
            return Err(AppError::PipeIo(format!(
                "another instance is already serving '{}'",
                name
            )));
        }

        let listener = PipeListener::bind(name, Arc::clone(&self.dispatcher))?;
        spawn_sweeper(
            Arc::clone(&self.dispatcher),
            self.settings.sweep_interval,
            self.settings.cache_threshold_days,
        );
        listener.serve().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::ConfigMap;
    use crate::tts::testing::FakeFactory;

    static NEXT_PIPE: AtomicUsize = AtomicUsize::new(0);

    fn unique_name() -> String {
        format!(
            "tts-pipe-test-{}-{}",
            std::process::id(),
            NEXT_PIPE.fetch_add(1, Ordering::SeqCst)
        )
    }

    fn start(dir: &tempfile::TempDir) -> (String, Arc<AtomicUsize>) {
        let factory = FakeFactory::default();
        let builds = Arc::clone(&factory.builds);
        let dispatcher = Arc::new(RequestDispatcher::new(
            EngineRegistry::new(Box::new(factory)),
            Some(AudioCache::open(dir.path()).unwrap()),
            ConfigMap::new(),
            Duration::from_secs(5),
        ));

        let name = unique_name();
        let listener = PipeListener::bind(&name, dispatcher).unwrap();
        tokio::spawn(listener.serve());
        (name, builds)
    }

    async fn exchange(name: &str, request: &[u8]) -> Vec<u8> {
        let mut conn = Stream::connect(pipe_name(name).unwrap()).await.unwrap();
        conn.write_all(request).await.unwrap();
        let mut response = Vec::new();
        conn.read_to_end(&mut response).await.unwrap();
        response
    }

    const HELLO: &str = r#"{"clipboard_text":"Hello","config":{"TTS":{"engine":"SherpaOnnxTTS"},"translate":{"no_translate":"True"}},"args":{"return_audio_bytes":true}}"#;

    #[tokio::test]
    async fn test_audio_round_trip_over_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let (name, _) = start(&dir);

        let response = exchange(&name, HELLO.as_bytes()).await;
        let declared = u32::from_le_bytes(response[0..4].try_into().unwrap()) as usize;
        assert_eq!(declared, response.len() - 4);
        assert_eq!(&response[4..8], b"RIFF");
        assert_eq!(&response[12..16], b"WAVE");
    }

    #[tokio::test]
    async fn test_length_prefixed_request() {
        let dir = tempfile::tempdir().unwrap();
        let (name, _) = start(&dir);

        let response = exchange(&name, &protocol::length_prefixed(HELLO.as_bytes())).await;
        assert_eq!(&response[4..8], b"RIFF");
    }

    async fn exchange_in_two_writes(name: &str, request: &[u8], split: usize) -> Vec<u8> {
        let mut conn = Stream::connect(pipe_name(name).unwrap()).await.unwrap();
        conn.write_all(&request[..split]).await.unwrap();
        conn.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        conn.write_all(&request[split..]).await.unwrap();
        let mut response = Vec::new();
        conn.read_to_end(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_length_prefixed_request_split_after_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let (name, _) = start(&dir);

        let framed = protocol::length_prefixed(HELLO.as_bytes());
        let response = exchange_in_two_writes(&name, &framed, 4).await;
        assert_eq!(&response[4..8], b"RIFF");
    }

    #[tokio::test]
    async fn test_versioned_request_split_inside_header() {
        let dir = tempfile::tempdir().unwrap();
        let (name, _) = start(&dir);

        let framed = protocol::versioned(HELLO.as_bytes());
        let response = exchange_in_two_writes(&name, &framed, 6).await;
        assert_eq!(&response[4..8], b"RIFF");
    }

    #[tokio::test]
    async fn test_read_request_stops_at_deadline() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut framed = protocol::length_prefixed(HELLO.as_bytes());
        framed.truncate(10);
        client.write_all(&framed).await.unwrap();

        let started = std::time::Instant::now();
        let received = read_request(&mut server).await.unwrap();
        assert_eq!(received, framed);
        assert!(started.elapsed() >= FRAME_WAIT);
        drop(client);
    }

    #[tokio::test]
    async fn test_read_request_stops_at_eof() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[200, 0, 0, 0, b'{']).await.unwrap();
        drop(client);

        let received = read_request(&mut server).await.unwrap();
        assert_eq!(received, vec![200, 0, 0, 0, b'{']);
    }

    #[tokio::test]
    async fn test_sweeper_removes_stale_files_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::open(dir.path()).unwrap();
        let path = cache.path_for("old.wav");
        std::fs::write(&path, b"RIFF").unwrap();
        cache.store("old text", "SherpaOnnxTTS", "old.wav").unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(std::time::SystemTime::now() - Duration::from_secs(10 * 24 * 60 * 60))
            .unwrap();
        drop(file);

        let dispatcher = Arc::new(RequestDispatcher::new(
            EngineRegistry::new(Box::new(FakeFactory::default())),
            Some(cache),
            ConfigMap::new(),
            Duration::from_secs(5),
        ));
        let sweeper = spawn_sweeper(Arc::clone(&dispatcher), Duration::from_millis(5), 7);
        tokio::time::sleep(Duration::from_millis(200)).await;
        sweeper.abort();

        assert!(!path.exists());
        let cache = dispatcher.cache().unwrap();
        assert!(cache.lookup("old text").unwrap().is_none());
        assert_eq!(cache.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_exits_without_cache() {
        let dispatcher = Arc::new(RequestDispatcher::new(
            EngineRegistry::new(Box::new(FakeFactory::default())),
            None,
            ConfigMap::new(),
            Duration::from_secs(5),
        ));
        let sweeper = spawn_sweeper(dispatcher, Duration::from_millis(5), 7);
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_garbage_gets_no_response_and_listener_survives() {
        let dir = tempfile::tempdir().unwrap();
        let (name, _) = start(&dir);

        assert!(exchange(&name, b"\x01\x02").await.is_empty());
        assert!(exchange(&name, b"{not json").await.is_empty());

        let response = exchange(&name, HELLO.as_bytes()).await;
        assert!(!response.is_empty());
    }

    #[tokio::test]
    async fn test_list_voices_returns_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let (name, builds) = start(&dir);

        let request = r#"{"clipboard_text":"","config":{"TTS":{"engine":"SherpaOnnxTTS"}},"args":{"listvoices":true}}"#;
        let response = exchange(&name, request.as_bytes()).await;
        let voices: serde_json::Value = serde_json::from_slice(&response).unwrap();
        assert!(voices.is_array());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_running_instance_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let (name, _) = start(&dir);

        assert!(instance_running(&name).await);
        assert!(!instance_running(&unique_name()).await);
    }
}
