//! Microphone-backed recognition
//!
//! A session opens the default input device, waits for one utterance and
//! sends it to Whisper. Capture runs on a blocking thread because cpal
//! streams are tied to the thread that built them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
use super::recognizer::RecognitionEngine;
use super::segmenter::UtteranceSegmenter;
use super::stt::SpeechToText;
use crate::{Error, RecognitionError, Result};

/// How long a session waits for speech before reporting no-speech
pub const DEFAULT_NO_SPEECH_TIMEOUT: Duration = Duration::from_secs(8);

/// Capture buffer poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sets the flag when dropped, ending the capture thread
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Recognizes speech from the default microphone
#[derive(Debug)]
pub struct MicrophoneEngine {
    stt: SpeechToText,
    no_speech_timeout: Duration,
}

impl MicrophoneEngine {
    /// Create an engine that transcribes with `stt`
    #[must_use]
    pub const fn new(stt: SpeechToText) -> Self {
        Self {
            stt,
            no_speech_timeout: DEFAULT_NO_SPEECH_TIMEOUT,
        }
    }

    /// Override the no-speech timeout
    #[must_use]
    pub const fn with_no_speech_timeout(mut self, timeout: Duration) -> Self {
        self.no_speech_timeout = timeout;
        self
    }
}

#[async_trait]
impl RecognitionEngine for MicrophoneEngine {
    async fn initialize(&self) -> Result<()> {
        tokio::task::spawn_blocking(|| AudioCapture::open().map(drop))
            .await
            .map_err(|e| Error::Audio(format!("device probe failed: {e}")))?
            .map_err(|e| {
                tracing::error!(error = %e, "microphone unavailable");
                Error::Recognition(RecognitionError::NotAllowed)
            })
    }

    async fn recognize(
        &self,
        language: &str,
    ) -> std::result::Result<Option<String>, RecognitionError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(Arc::clone(&cancelled));
        let timeout = self.no_speech_timeout;

        let samples = tokio::task::spawn_blocking(move || capture_utterance(&cancelled, timeout))
            .await
            .map_err(|e| RecognitionError::AudioCapture(e.to_string()))??;

        let wav = samples_to_wav(&samples, SAMPLE_RATE)
            .map_err(|e| RecognitionError::AudioCapture(e.to_string()))?;

        let transcript = self
            .stt
            .transcribe(&wav, language)
            .await
            .map_err(|e| RecognitionError::Network(e.to_string()))?;

        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Ok(None);
        }
        Ok(Some(transcript.to_string()))
    }
}

/// Record until one utterance completes, the timeout passes or the session
/// is cancelled
fn capture_utterance(
    cancelled: &AtomicBool,
    timeout: Duration,
) -> std::result::Result<Vec<f32>, RecognitionError> {
    let mut capture =
        AudioCapture::open().map_err(|e| RecognitionError::AudioCapture(e.to_string()))?;
    capture
        .start()
        .map_err(|e| RecognitionError::AudioCapture(e.to_string()))?;

    let mut segmenter = UtteranceSegmenter::new();
    let started = Instant::now();

    loop {
        if cancelled.load(Ordering::SeqCst) {
            return Err(RecognitionError::Aborted);
        }

        std::thread::sleep(POLL_INTERVAL);

        if segmenter.process(&capture.take_buffer()) {
            return Ok(segmenter.take_utterance());
        }

        if !segmenter.is_speaking() && started.elapsed() > timeout {
            return Err(RecognitionError::NoSpeech);
        }
    }
}
