use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    azure::AzureEngine, elevenlabs::ElevenLabsEngine, google::GoogleEngine,
    google_trans::GoogleTransEngine, openai::OpenAiEngine, piper::PiperEngine, EngineKind,
    TtsEngine,
};
use crate::config::ConfigMap;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineKey {
    pub engine: String,
    pub voice: String,
}

impl EngineKey {
    pub fn new(engine: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            voice: voice.into(),
        }
    }
}

/// Builds engine handles. Construction may do network handshakes or load models.
pub trait EngineFactory: Send + Sync {
    fn create(&self, key: &EngineKey, config: &ConfigMap) -> Result<Arc<dyn TtsEngine>, AppError>;
}

/// Keeps at most one live handle per (engine, voice).
pub struct EngineRegistry {
    factory: Box<dyn EngineFactory>,
    engines: Mutex<HashMap<EngineKey, Arc<dyn TtsEngine>>>,
}

impl EngineRegistry {
    pub fn new(factory: Box<dyn EngineFactory>) -> Self {
        Self {
            factory,
            engines: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(
        &self,
        engine: &str,
        voice: &str,
        config: &ConfigMap,
    ) -> Result<Arc<dyn TtsEngine>, AppError> {
        let key = EngineKey::new(engine, voice);

        // The lock is held across construction so a key is never built twice.
        let mut engines = self.lock();
        if let Some(handle) = engines.get(&key) {
            return Ok(Arc::clone(handle));
        }

        tracing::info!("Creating engine {} (voice '{}')", key.engine, key.voice);
        let handle = self.factory.create(&key, config)?;
        engines.insert(key, Arc::clone(&handle));

        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EngineKey, Arc<dyn TtsEngine>>> {
        self.engines.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Engine registry lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

/// The engines this server ships.
pub struct BuiltinEngines {
    voices_dir: PathBuf,
}

impl BuiltinEngines {
    pub fn new(voices_dir: PathBuf) -> Self {
        Self { voices_dir }
    }
}

impl EngineFactory for BuiltinEngines {
    fn create(&self, key: &EngineKey, config: &ConfigMap) -> Result<Arc<dyn TtsEngine>, AppError> {
        let kind = EngineKind::from_identifier(&key.engine)
            .ok_or_else(|| AppError::engine_init(&key.engine, "unknown engine"))?;
        let voice = key.voice.as_str();

        let engine: Arc<dyn TtsEngine> = match kind {
            EngineKind::SherpaOnnx => Arc::new(PiperEngine::load(&self.voices_dir, voice)?),
            EngineKind::Azure => Arc::new(AzureEngine::connect(config, voice)?),
            EngineKind::Google => Arc::new(GoogleEngine::new(config, voice)?),
            EngineKind::GoogleTrans => Arc::new(GoogleTransEngine::new(voice)),
            EngineKind::ElevenLabs => Arc::new(ElevenLabsEngine::new(config, voice)?),
            EngineKind::OpenAi => Arc::new(OpenAiEngine::new(config, voice)?),
            EngineKind::Sapi5
            | EngineKind::Polly
            | EngineKind::Watson
            | EngineKind::PlayHt
            | EngineKind::WitAi => {
                return Err(AppError::engine_init(
                    kind.identifier(),
                    "engine is not supported by this server",
                ))
            }
        };

        Ok(engine)
    }
}
