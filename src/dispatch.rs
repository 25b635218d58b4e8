use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::Audio;
use crate::cache::{self, AudioCache};
use crate::config::ConfigMap;
use crate::error::AppError;
use crate::playback;
use crate::protocol::{Message, Response};
use crate::tts::{self, EngineKind, EngineRegistry, SynthesisOptions};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFlags {
    pub list_voices: bool,
    pub return_audio_bytes: bool,
    pub bypass_tts: bool,
    pub no_translate: bool,
    pub replace_clipboard: bool,
    pub save_audio_file: bool,
    pub style: Option<String>,
    pub style_degree: Option<f32>,
}

/// One normalized unit of synthesis work.
#[derive(Debug, Clone)]
pub struct Job {
    pub text: String,
    pub engine: String,
    pub voice: String,
    pub config: ConfigMap,
    pub flags: JobFlags,
    pub options: SynthesisOptions,
}

impl Job {
    /// Resolve engine, voice and options from a message, with `defaults`
    /// underneath the request's own config.
    pub fn from_message(message: Message, defaults: &ConfigMap) -> Self {
        let config = defaults.merged_with(&message.config);
        let args = message.args;

        let engine = config
            .get_non_empty("TTS", "engine")
            .unwrap_or(EngineKind::SherpaOnnx.identifier())
            .to_string();

        let voice = config
            .get_non_empty(&engine, "voice_id")
            .or_else(|| config.get_non_empty("TTS", "voice_id"))
            .or(args.voice.as_deref().filter(|v| !v.trim().is_empty()))
            .unwrap_or("")
            .to_string();

        let rate = args.rate().or_else(|| {
            config
                .get_non_empty("TTS", "rate")
                .and_then(|r| r.parse::<f64>().ok())
                .map(|r| r as i32)
        });
        let volume = args.volume().or_else(|| {
            config
                .get_non_empty("TTS", "volume")
                .and_then(|v| v.parse::<f64>().ok())
                .map(|v| v.max(0.0) as u32)
        });
        let style = args.style.clone().filter(|s| !s.trim().is_empty());
        let style_degree = args.style_degree();

        let flags = JobFlags {
            list_voices: args.listvoices,
            return_audio_bytes: args.return_audio_bytes,
            bypass_tts: config.get_bool("TTS", "bypass_tts", false),
            no_translate: config.get_bool("translate", "no_translate", true),
            replace_clipboard: config.get_bool("translate", "replace_pb", false),
            save_audio_file: config.get_bool("TTS", "save_audio_file", true),
            style: style.clone(),
            style_degree,
        };

        Self {
            text: message.text,
            engine,
            voice,
            config,
            flags,
            options: SynthesisOptions {
                rate,
                volume,
                style,
                style_degree,
            },
        }
    }

    /// Styled renderings never read or write the cache.
    pub fn uses_cache(&self) -> bool {
        self.flags.save_audio_file && self.flags.style.is_none()
    }
}

/// Runs jobs against the engine registry and the audio cache, one at a time.
pub struct RequestDispatcher {
    registry: EngineRegistry,
    cache: Option<AudioCache>,
    defaults: ConfigMap,
    busy: Arc<AtomicBool>,
    job_timeout: Duration,
}

/// Holds the readiness gate; releases it on drop.
struct JobSlot(Arc<AtomicBool>);

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RequestDispatcher {
    pub fn new(
        registry: EngineRegistry,
        cache: Option<AudioCache>,
        defaults: ConfigMap,
        job_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            defaults,
            busy: Arc::new(AtomicBool::new(false)),
            job_timeout,
        }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn cache(&self) -> Option<&AudioCache> {
        self.cache.as_ref()
    }

    pub fn dispatch(&self, message: Message) -> Job {
        let job = Job::from_message(message, &self.defaults);
        tracing::info!(
            "Job: engine={}, voice='{}', listvoices={}, return_audio_bytes={}, style={:?}",
            job.engine,
            job.voice,
            job.flags.list_voices,
            job.flags.return_audio_bytes,
            job.flags.style
        );
        if job.flags.replace_clipboard {
            tracing::debug!("replace_pb is set; clipboard handling belongs to the client");
        }
        if !job.flags.no_translate {
            tracing::debug!("Translation requested upstream; speaking text as received");
        }
        job
    }

    fn try_acquire(&self) -> Option<JobSlot> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| JobSlot(Arc::clone(&self.busy)))
    }

    /// Run `job` on a blocking helper and wait up to the job timeout.
    ///
    /// A request arriving while another job holds the gate is dropped. On
    /// timeout the helper keeps running to completion and keeps the gate
    /// until then; its result is discarded.
    pub async fn handle(self: &Arc<Self>, job: Job) -> Response {
        let Some(slot) = self.try_acquire() else {
            tracing::warn!("A job is already in flight; dropping request");
            return Response::Empty;
        };

        let dispatcher = Arc::clone(self);
        let worker = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            dispatcher.run(&job)
        });

        match tokio::time::timeout(self.job_timeout, worker).await {
            Ok(Ok(Ok(response))) => response,
            Ok(Ok(Err(e))) => {
                e.log();
                Response::Empty
            }
            Ok(Err(e)) => {
                tracing::error!("Job worker failed: {}", e);
                Response::Empty
            }
            Err(_) => {
                tracing::warn!(
                    "Job did not finish within {:?}; answering empty",
                    self.job_timeout
                );
                Response::Empty
            }
        }
    }

    /// The synchronous pipeline for one job.
    pub fn run(&self, job: &Job) -> Result<Response, AppError> {
        if job.flags.bypass_tts {
            tracing::info!("bypass_tts is set; skipping synthesis");
            return Ok(Response::Empty);
        }

        if job.flags.list_voices {
            let engine = self
                .registry
                .get_or_create(&job.engine, &job.voice, &job.config)?;
            let voices = engine.list_voices()?;
            tracing::info!("Listing {} voices for {}", voices.len(), job.engine);
            return Ok(Response::VoiceList(voices));
        }

        if job.text.trim().is_empty() {
            tracing::warn!("Empty text; nothing to speak");
            return Ok(Response::Empty);
        }

        if job.uses_cache() {
            if let Some(wav) = self.cached_audio(job) {
                return Ok(self.deliver(job, wav));
            }
        }

        let engine = self
            .registry
            .get_or_create(&job.engine, &job.voice, &job.config)?;
        let wav = tts::synthesize(engine.as_ref(), &job.text, &job.options)?.into_wav_bytes();
        tracing::info!("Synthesized {} bytes with {}", wav.len(), job.engine);

        if job.uses_cache() {
            if let Err(e) = self.remember(job, &wav) {
                e.log();
            }
        }

        Ok(self.deliver(job, wav))
    }

    /// Cache failures count as a miss.
    fn cached_audio(&self, job: &Job) -> Option<Vec<u8>> {
        let cache = self.cache.as_ref()?;
        let entry = match cache.lookup(&job.text) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                e.log();
                return None;
            }
        };

        if entry.engine != job.engine {
            tracing::warn!(
                "Serving cached audio rendered by {} for a {} request",
                entry.engine,
                job.engine
            );
        }

        match std::fs::read(cache.path_for(&entry.filename)) {
            Ok(bytes) => {
                tracing::info!("Cache hit: {}", entry.filename);
                Some(bytes)
            }
            Err(e) => {
                tracing::warn!("Failed to read cached file {}: {}", entry.filename, e);
                None
            }
        }
    }

    fn remember(&self, job: &Job, wav: &[u8]) -> Result<(), AppError> {
        let Some(cache) = self.cache.as_ref() else {
            return Ok(());
        };
        let filename = cache::new_filename();
        std::fs::write(cache.path_for(&filename), wav)
            .map_err(|e| AppError::CacheIo(format!("{}: {}", filename, e)))?;
        cache.store(&job.text, &job.engine, &filename)?;
        tracing::debug!("Cached audio as {}", filename);
        Ok(())
    }

    fn deliver(&self, job: &Job, wav: Vec<u8>) -> Response {
        if job.flags.return_audio_bytes {
            Response::Audio(Audio::Wav(wav))
        } else {
            playback::play_detached(wav);
            Response::Empty
        }
    }
}
