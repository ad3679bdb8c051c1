//! Transcript source
//!
//! [`SpeechRecognizer`] runs back-to-back recognition sessions on a
//! [`RecognitionEngine`] and restarts itself after each session ends or
//! fails. Every restart is gated on a single "should be listening" flag, so
//! once [`SpeechRecognizer::stop`] returns no pending restart can re-arm
//! capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::{Error, RecognitionError, Result};

/// Delay before restarting after a session ends or hears nothing
pub const RESTART_DELAY: Duration = Duration::from_millis(300);

/// Delay before restarting after any other fault
pub const ERROR_RESTART_DELAY: Duration = Duration::from_millis(1000);

/// A speech recognition backend
///
/// One call to [`recognize`](Self::recognize) is one session. Dropping the
/// returned future must cancel the session.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// One-time permission and device check
    ///
    /// # Errors
    ///
    /// Returns error if capture is not permitted or no device is usable
    async fn initialize(&self) -> Result<()>;

    /// Run one session
    ///
    /// Returns the recognized text, or `None` when the session ended
    /// without a result.
    ///
    /// # Errors
    ///
    /// Returns the fault that ended the session
    async fn recognize(&self, language: &str)
    -> std::result::Result<Option<String>, RecognitionError>;
}

/// Emitted by the recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// An utterance was recognized
    Transcript(String),
    /// A session failed
    Error(RecognitionError),
}

struct Shared {
    engine: Arc<dyn RecognitionEngine>,
    should_listen: watch::Sender<bool>,
    is_listening: AtomicBool,
    initialized: AtomicBool,
    language: RwLock<String>,
    events: mpsc::UnboundedSender<RecognizerEvent>,
}

impl Shared {
    fn should_listen(&self) -> bool {
        *self.should_listen.borrow()
    }

    fn language(&self) -> String {
        self.language
            .read()
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    fn emit(&self, event: RecognizerEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("recognizer event dropped, no listener");
        }
    }
}

/// Continuous speech recognizer with automatic restart
#[derive(Clone)]
pub struct SpeechRecognizer {
    shared: Arc<Shared>,
}

impl SpeechRecognizer {
    /// Create a recognizer and the receiver for its events
    #[must_use]
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        language: &str,
    ) -> (Self, mpsc::UnboundedReceiver<RecognizerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (should_listen, _) = watch::channel(false);

        let recognizer = Self {
            shared: Arc::new(Shared {
                engine,
                should_listen,
                is_listening: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                language: RwLock::new(language.to_string()),
                events,
            }),
        };

        (recognizer, rx)
    }

    /// Request device access once
    ///
    /// # Errors
    ///
    /// Returns error if the engine refuses access
    pub async fn initialize(&self) -> Result<()> {
        if self.shared.initialized.load(Ordering::SeqCst) {
            tracing::debug!("recognizer already initialized");
            return Ok(());
        }

        self.shared.engine.initialize().await?;
        self.shared.initialized.store(true, Ordering::SeqCst);
        tracing::info!("recognizer initialized");
        Ok(())
    }

    /// Whether [`initialize`](Self::initialize) succeeded
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    /// Begin listening
    ///
    /// Idempotent: only one listening loop exists at a time.
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer was never initialized
    pub fn start(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::Recognition(RecognitionError::Other(
                "recognizer not initialized".to_string(),
            )));
        }

        self.shared.should_listen.send_replace(true);

        if self
            .shared
            .is_listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("recognizer already active");
            return Ok(());
        }

        tracing::debug!("recognizer started");
        tokio::spawn(run_sessions(Arc::clone(&self.shared)));
        Ok(())
    }

    /// Stop listening and cancel any pending restart
    pub fn stop(&self) {
        let was_listening = self.shared.should_listen.send_replace(false);
        if was_listening {
            tracing::debug!("recognizer stopped");
        }
    }

    /// Set the recognition language used by the next session
    pub fn set_language(&self, language: &str) {
        if let Ok(mut current) = self.shared.language.write() {
            language.clone_into(&mut current);
        }
        tracing::debug!(language, "recognition language set");
    }

    /// Current recognition language
    #[must_use]
    pub fn language(&self) -> String {
        self.shared.language()
    }

    /// Whether a listening loop is running
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.shared.is_listening.load(Ordering::SeqCst)
    }

    /// Whether listening is currently requested
    #[must_use]
    pub fn should_listen(&self) -> bool {
        self.shared.should_listen()
    }
}

/// Resolve once listening is no longer requested
async fn stopped(rx: &mut watch::Receiver<bool>) {
    while *rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Listening loop: one session after another until stopped
async fn run_sessions(shared: Arc<Shared>) {
    let mut should_listen = shared.should_listen.subscribe();

    loop {
        while shared.should_listen() {
            let language = shared.language();

            let outcome = tokio::select! {
                outcome = shared.engine.recognize(&language) => outcome,
                () = stopped(&mut should_listen) => {
                    tracing::debug!("recognition session aborted");
                    break;
                }
            };

            let delay = match outcome {
                Ok(Some(text)) => {
                    tracing::debug!(text, "recognized");
                    if shared.should_listen() {
                        shared.emit(RecognizerEvent::Transcript(text));
                    }
                    RESTART_DELAY
                }
                Ok(None) => {
                    tracing::trace!("session ended without result");
                    RESTART_DELAY
                }
                Err(e) if e.is_routine() => {
                    tracing::trace!(code = e.code(), "routine recognition fault");
                    shared.emit(RecognizerEvent::Error(e));
                    RESTART_DELAY
                }
                Err(e) => {
                    tracing::warn!(code = e.code(), error = %e, "recognition fault");
                    shared.emit(RecognizerEvent::Error(e));
                    ERROR_RESTART_DELAY
                }
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = stopped(&mut should_listen) => break,
            }
        }

        shared.is_listening.store(false, Ordering::SeqCst);

        // A start() that raced with our exit saw the latch still held
        if !shared.should_listen()
            || shared
                .is_listening
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            break;
        }
    }

    tracing::trace!("listening loop exited");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Engine that replays a script, then idles
    struct ScriptedEngine {
        script: Mutex<Vec<std::result::Result<Option<String>, RecognitionError>>>,
        sessions: AtomicUsize,
    }

    impl ScriptedEngine {
        fn new(mut script: Vec<std::result::Result<Option<String>, RecognitionError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                sessions: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RecognitionEngine for ScriptedEngine {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn recognize(
            &self,
            _language: &str,
        ) -> std::result::Result<Option<String>, RecognitionError> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop();
            match next {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn test_start_requires_initialize() {
        let engine = Arc::new(ScriptedEngine::new(vec![]));
        let (recognizer, _rx) = SpeechRecognizer::new(engine, "en-US");
        assert!(recognizer.start().is_err());

        recognizer.initialize().await.unwrap();
        assert!(recognizer.start().is_ok());
        assert!(recognizer.is_listening());
        recognizer.stop();
    }

    #[tokio::test]
    async fn test_restarts_after_no_speech() {
        let engine = Arc::new(ScriptedEngine::new(vec![
            Err(RecognitionError::NoSpeech),
            Ok(Some("hello".to_string())),
        ]));
        let (recognizer, mut rx) = SpeechRecognizer::new(engine.clone(), "en-US");
        recognizer.initialize().await.unwrap();
        recognizer.start().unwrap();

        assert_eq!(
            rx.recv().await,
            Some(RecognizerEvent::Error(RecognitionError::NoSpeech))
        );
        assert_eq!(
            rx.recv().await,
            Some(RecognizerEvent::Transcript("hello".to_string()))
        );
        assert!(engine.sessions.load(Ordering::SeqCst) >= 2);
        recognizer.stop();
    }

    #[tokio::test]
    async fn test_stop_suppresses_pending_restart() {
        let engine = Arc::new(ScriptedEngine::new(vec![Err(RecognitionError::Network(
            "offline".to_string(),
        ))]));
        let (recognizer, mut rx) = SpeechRecognizer::new(engine.clone(), "en-US");
        recognizer.initialize().await.unwrap();
        recognizer.start().unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(RecognizerEvent::Error(RecognitionError::Network(_)))
        ));

        // The loop is now waiting out the error restart delay
        recognizer.stop();
        tokio::time::sleep(ERROR_RESTART_DELAY + Duration::from_millis(200)).await;

        assert_eq!(engine.sessions.load(Ordering::SeqCst), 1);
        assert!(!recognizer.is_listening());
    }

    #[tokio::test]
    async fn test_start_is_single_flight() {
        let engine = Arc::new(ScriptedEngine::new(vec![]));
        let (recognizer, _rx) = SpeechRecognizer::new(engine.clone(), "en-US");
        recognizer.initialize().await.unwrap();

        recognizer.start().unwrap();
        recognizer.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine.sessions.load(Ordering::SeqCst), 1);
        recognizer.stop();
    }
}
