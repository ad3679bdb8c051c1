//! Terminal-backed recognition and synthesis
//!
//! Each stdin line is one utterance and a blank line counts as silence.
//! Spoken text is printed and paced at a fixed rate per character so
//! turn-taking behaves like real audio.

use std::io::BufRead;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, mpsc};

use super::recognizer::RecognitionEngine;
use super::synthesizer::Synthesizer;
use crate::{RecognitionError, Result};

/// Default pacing for printed speech
pub const DEFAULT_CHAR_DELAY: Duration = Duration::from_millis(30);

/// Reads utterances from standard input
///
/// Lines are read on a dedicated thread so a pending read never holds up
/// runtime shutdown.
#[derive(Debug)]
pub struct ConsoleEngine {
    lines: Mutex<mpsc::UnboundedReceiver<std::io::Result<String>>>,
}

impl Default for ConsoleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleEngine {
    /// Create an engine over this process's stdin
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
            tracing::info!("input closed");
        });

        Self::from_receiver(rx)
    }

    /// Create an engine over an existing line source
    #[must_use]
    pub fn from_receiver(lines: mpsc::UnboundedReceiver<std::io::Result<String>>) -> Self {
        Self {
            lines: Mutex::new(lines),
        }
    }
}

#[async_trait]
impl RecognitionEngine for ConsoleEngine {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn recognize(
        &self,
        _language: &str,
    ) -> std::result::Result<Option<String>, RecognitionError> {
        // `recv` is cancel safe, so an aborted session loses no input
        let mut lines = self.lines.lock().await;
        match lines.recv().await {
            Some(Ok(line)) => {
                let text = line.trim();
                if text.is_empty() {
                    Err(RecognitionError::NoSpeech)
                } else {
                    Ok(Some(text.to_string()))
                }
            }
            Some(Err(e)) => Err(RecognitionError::AudioCapture(e.to_string())),
            // Input closed: nothing more will ever be heard
            None => std::future::pending().await,
        }
    }
}

/// Prints speech to stdout
pub struct ConsoleSynthesizer {
    char_delay: Duration,
    language: RwLock<String>,
    cancel: Notify,
}

impl std::fmt::Debug for ConsoleSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSynthesizer")
            .field("char_delay", &self.char_delay)
            .finish_non_exhaustive()
    }
}

impl Default for ConsoleSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_CHAR_DELAY)
    }
}

impl ConsoleSynthesizer {
    /// Create a synthesizer pacing output at `char_delay` per character
    #[must_use]
    pub fn new(char_delay: Duration) -> Self {
        Self {
            char_delay,
            language: RwLock::new(String::new()),
            cancel: Notify::new(),
        }
    }

    fn speaking_time(&self, text: &str) -> Duration {
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        self.char_delay.saturating_mul(chars)
    }
}

#[async_trait]
impl Synthesizer for ConsoleSynthesizer {
    async fn speak(&self, text: &str) -> Result<()> {
        let language = self.language.read().map(|l| l.clone()).unwrap_or_default();
        if language.is_empty() {
            println!("🔊 {text}");
        } else {
            println!("🔊 [{language}] {text}");
        }

        tokio::select! {
            () = tokio::time::sleep(self.speaking_time(text)) => {}
            () = self.cancel.notified() => {
                tracing::debug!("console speech cancelled");
            }
        }
        Ok(())
    }

    fn stop(&self) {
        self.cancel.notify_waiters();
    }

    fn set_language(&self, language: &str) {
        if let Ok(mut current) = self.language.write() {
            language.clone_into(&mut current);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_speaking_time_scales_with_chars() {
        let synth = ConsoleSynthesizer::new(Duration::from_millis(10));
        assert_eq!(synth.speaking_time("привет"), Duration::from_millis(60));
        assert_eq!(synth.speaking_time(""), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_lines_become_sessions() {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = ConsoleEngine::from_receiver(rx);

        tx.send(Ok("  привет  ".to_string())).unwrap();
        tx.send(Ok(String::new())).unwrap();

        assert_eq!(engine.recognize("ru-RU").await, Ok(Some("привет".to_string())));
        assert_eq!(engine.recognize("ru-RU").await, Err(RecognitionError::NoSpeech));
    }

    #[tokio::test]
    async fn test_stop_cancels_speech() {
        let synth = Arc::new(ConsoleSynthesizer::new(Duration::from_secs(1)));
        let speaking = {
            let synth = Arc::clone(&synth);
            tokio::spawn(async move { synth.speak("long sentence").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        synth.stop();

        speaking.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
