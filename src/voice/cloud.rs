//! Synthesizer backed by `OpenAI` TTS and the local speaker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::playback::AudioPlayback;
use super::synthesizer::Synthesizer;
use super::tts::TextToSpeech;
use crate::{Error, Result};

/// Renders speech remotely and plays it locally
pub struct CloudSynthesizer {
    tts: TextToSpeech,
    current: Mutex<Arc<AtomicBool>>,
}

impl std::fmt::Debug for CloudSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSynthesizer")
            .field("tts", &self.tts)
            .finish_non_exhaustive()
    }
}

impl CloudSynthesizer {
    /// Wrap a TTS client
    #[must_use]
    pub fn new(tts: TextToSpeech) -> Self {
        Self {
            tts,
            current: Mutex::new(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Register a fresh cancel flag for the unit about to play
    fn begin(&self) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        if let Ok(mut current) = self.current.lock() {
            *current = Arc::clone(&cancel);
        }
        cancel
    }
}

#[async_trait]
impl Synthesizer for CloudSynthesizer {
    async fn speak(&self, text: &str) -> Result<()> {
        let cancel = self.begin();

        let audio = self
            .tts
            .synthesize(text)
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if cancel.load(Ordering::SeqCst) {
            tracing::debug!("speech cancelled before playback");
            return Ok(());
        }

        tokio::task::spawn_blocking(move || {
            let playback = AudioPlayback::open()?;
            playback.play_mp3(&audio, &cancel)
        })
        .await
        .map_err(|e| Error::Synthesis(format!("playback task failed: {e}")))?
        .map_err(|e| Error::Synthesis(e.to_string()))
    }

    fn stop(&self) {
        if let Ok(current) = self.current.lock() {
            current.store(true, Ordering::SeqCst);
        }
    }

    fn set_language(&self, language: &str) {
        // Voices are multilingual and follow the input text
        tracing::debug!(language, "speech language noted");
    }
}
