//! Conversation orchestrator
//!
//! [`VoiceBot`] owns the session: it greets, listens, routes each utterance
//! through stage detection and the completion client, speaks the reply and
//! re-arms listening once the reply (or its first sentence) has been said.
//! While the bot waits for the user, an idle timer occasionally nudges them
//! with a waiting phrase.
//!
//! Listening is always paused before the bot speaks so it never hears
//! itself, and every resume is gated on the bot still being active, so a
//! [`stop`](VoiceBot::stop) is final until the next [`start`](VoiceBot::start).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::completion::CompletionClient;
use crate::config::Settings;
use crate::playback::PlaybackQueue;
use crate::stages::{determine_stage, find_stage, parse_stage_command};
use crate::voice::{RecognitionEngine, RecognizerEvent, SpeechRecognizer, Synthesizer};
use crate::{Error, RecognitionError, Result};

/// How often the idle timer checks for inactivity
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Pause between a waiting phrase and listening again
pub const IDLE_RESUME_DELAY: Duration = Duration::from_millis(300);

/// Pause before listening again after a failed turn
pub const ERROR_RESUME_DELAY: Duration = Duration::from_millis(1000);

/// Stage every session starts in
const INITIAL_STAGE: u32 = 1;

/// What the bot is doing, for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotStatus {
    /// Not initialized yet
    Idle,
    /// Initialized, not started
    Ready,
    /// Listening for the user
    Listening,
    /// Handling an utterance
    Processing,
    /// Speaking a reply
    Speaking,
    /// Stopped
    Stopped,
    /// Last operation failed
    Error(String),
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Ready => write!(f, "ready"),
            Self::Listening => write!(f, "listening"),
            Self::Processing => write!(f, "processing"),
            Self::Speaking => write!(f, "speaking"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Snapshot of the conversation session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// Stage number in effect
    pub current_stage: u32,
    /// Last time the user spoke or the bot nudged them
    pub last_activity: Instant,
    /// Whether the bot is waiting for the user
    pub is_waiting: bool,
    /// Whether the bot is running
    pub is_active: bool,
}

struct BotInner {
    settings: RwLock<Arc<Settings>>,
    client: RwLock<CompletionClient>,
    recognizer: SpeechRecognizer,
    synthesizer: Arc<dyn Synthesizer>,
    playback: PlaybackQueue,
    current_stage: AtomicU32,
    last_activity: Mutex<Instant>,
    is_waiting: AtomicBool,
    is_active: AtomicBool,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
    status: watch::Sender<BotStatus>,
}

impl Drop for BotInner {
    fn drop(&mut self) {
        self.recognizer.stop();
        if let Some(timer) = lock(&self.idle_timer).take() {
            timer.abort();
        }
    }
}

/// The voice bot
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct VoiceBot {
    inner: Arc<BotInner>,
}

impl std::fmt::Debug for VoiceBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceBot")
            .field("session", &self.session())
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl VoiceBot {
    /// Create a bot and start dispatching recognizer events
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        settings: Settings,
        engine: Arc<dyn RecognitionEngine>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        let (recognizer, events) = SpeechRecognizer::new(engine, &settings.language);
        synthesizer.set_language(&settings.language);

        let client = CompletionClient::new(&settings);
        let playback = PlaybackQueue::new(Arc::clone(&synthesizer));
        let (status, _) = watch::channel(BotStatus::Idle);

        let inner = Arc::new(BotInner {
            settings: RwLock::new(Arc::new(settings)),
            client: RwLock::new(client),
            recognizer,
            synthesizer,
            playback,
            current_stage: AtomicU32::new(INITIAL_STAGE),
            last_activity: Mutex::new(Instant::now()),
            is_waiting: AtomicBool::new(false),
            is_active: AtomicBool::new(false),
            idle_timer: Mutex::new(None),
            status,
        });

        tokio::spawn(dispatch_events(Arc::downgrade(&inner), events));

        Self { inner }
    }

    /// Probe the microphone and report streaming support
    ///
    /// A refused device is reported through the status but is not fatal;
    /// [`start`](Self::start) will try again.
    pub async fn initialize(&self) {
        let settings = self.settings();
        if settings.use_streaming {
            let streaming = self.client().supports_streaming();
            tracing::info!(streaming, "streaming support checked");
        }

        match self.inner.recognizer.initialize().await {
            Ok(()) => self.set_status(BotStatus::Ready),
            Err(e) => self.display_error("microphone initialization failed", &e),
        }
    }

    /// Begin a session: greet, then listen
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be initialized
    pub async fn start(&self) -> Result<()> {
        if !self.inner.recognizer.is_initialized()
            && let Err(e) = self.inner.recognizer.initialize().await
        {
            self.display_error("microphone initialization failed", &e);
            return Err(e);
        }

        if self.inner.is_active.swap(true, Ordering::SeqCst) {
            tracing::debug!("bot already active");
            return Ok(());
        }

        self.inner.current_stage.store(INITIAL_STAGE, Ordering::SeqCst);
        self.start_idle_timer();
        tracing::info!("session started");

        let greeting = self.settings().greeting_text.clone();
        self.speak(&greeting).await;

        if !self.is_active() {
            return Ok(());
        }

        self.inner.recognizer.start()?;
        self.set_status(BotStatus::Listening);
        Ok(())
    }

    /// End the session
    ///
    /// Cancels speech, listening and the idle timer. Safe to call at any
    /// time, any number of times.
    pub fn stop(&self) {
        let was_active = self.inner.is_active.swap(false, Ordering::SeqCst);
        self.inner.is_waiting.store(false, Ordering::SeqCst);

        self.stop_idle_timer();
        self.inner.recognizer.stop();
        self.inner.playback.stop();

        if was_active {
            tracing::info!("session stopped");
        }
        self.set_status(BotStatus::Stopped);
    }

    /// Handle one recognized utterance
    ///
    /// Failures are reported through the status and the bot resumes
    /// listening shortly after.
    pub async fn process_utterance(&self, text: &str) {
        if !self.is_active() {
            tracing::debug!(text, "ignoring utterance while stopped");
            return;
        }

        self.touch();
        self.inner.is_waiting.store(false, Ordering::SeqCst);
        tracing::info!(kind = "input", text, "utterance");
        self.set_status(BotStatus::Processing);

        if let Err(e) = self.respond(text).await {
            self.display_error("failed to process utterance", &e);
            self.mark_waiting();
            self.resume_after(ERROR_RESUME_DELAY);
        }
    }

    /// Report a recognition fault
    ///
    /// Silence is routine and only logged.
    pub fn handle_recognition_error(&self, error: &RecognitionError) {
        if error.is_routine() {
            tracing::debug!(code = error.code(), "no speech detected");
            return;
        }

        self.display_error("speech recognition failed", &Error::Recognition(error.clone()));
    }

    /// Speak a waiting phrase if the user has been quiet too long
    ///
    /// Runs on every idle timer tick. Returns whether a phrase was spoken.
    #[must_use]
    pub fn check_idle(&self) -> bool {
        if !self.is_active() || !self.inner.is_waiting.load(Ordering::SeqCst) {
            return false;
        }

        let settings = self.settings();
        if self.idle_for() < settings.waiting_interval() {
            return false;
        }

        let Some(phrase) = settings.waiting_phrases.choose(&mut rand::thread_rng()) else {
            return false;
        };

        tracing::info!(kind = "output", phrase = %phrase, "nudging idle user");
        self.inner.recognizer.stop();
        self.set_status(BotStatus::Speaking);
        let spoken = self.inner.playback.enqueue(phrase.clone());
        self.touch();

        let bot = self.clone();
        tokio::spawn(async move {
            spoken.await;
            if bot.is_active() {
                tokio::time::sleep(IDLE_RESUME_DELAY).await;
                bot.resume_listening();
            }
        });

        true
    }

    /// Replace the settings
    ///
    /// Takes effect for the next utterance. Streaming support is re-probed.
    pub fn update_settings(&self, settings: Settings) {
        let streaming = write(&self.inner.client).configure(&settings);
        self.inner.recognizer.set_language(&settings.language);
        self.inner.synthesizer.set_language(&settings.language);

        tracing::info!(streaming, language = %settings.language, "settings updated");
        *write(&self.inner.settings) = Arc::new(settings);
    }

    /// Current settings
    #[must_use]
    pub fn settings(&self) -> Arc<Settings> {
        Arc::clone(&read(&self.inner.settings))
    }

    /// Snapshot of the session
    #[must_use]
    pub fn session(&self) -> SessionState {
        SessionState {
            current_stage: self.inner.current_stage.load(Ordering::SeqCst),
            last_activity: *lock(&self.inner.last_activity),
            is_waiting: self.inner.is_waiting.load(Ordering::SeqCst),
            is_active: self.is_active(),
        }
    }

    /// Whether a session is running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.is_active.load(Ordering::SeqCst)
    }

    /// Whether the recognizer is currently requested to listen
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.inner.recognizer.should_listen()
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<BotStatus> {
        self.inner.status.subscribe()
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> BotStatus {
        self.inner.status.borrow().clone()
    }

    /// One conversational turn
    async fn respond(&self, text: &str) -> Result<()> {
        let settings = self.settings();
        if settings.api_key.trim().is_empty() {
            return Err(Error::Config("API key is not configured".to_string()));
        }

        self.inner.recognizer.stop();

        if let Some(stage) = parse_stage_command(text, &settings.command_markers)
            .and_then(|n| find_stage(&settings.conversation_stages, n))
        {
            self.inner.current_stage.store(stage.stage_number, Ordering::SeqCst);
            tracing::info!(stage = stage.stage_number, "stage set by command");

            self.speak(&stage.transition_text).await;
            self.mark_waiting();
            self.resume_listening();
            return Ok(());
        }

        let previous = self.inner.current_stage.load(Ordering::SeqCst);
        if let Some(stage) = determine_stage(text, &settings.conversation_stages, previous)
            && stage.stage_number != previous
        {
            self.inner.current_stage.store(stage.stage_number, Ordering::SeqCst);
            tracing::info!(from = previous, to = stage.stage_number, "stage changed");
            self.speak(&stage.transition_text).await;
        }

        let stage_number = self.inner.current_stage.load(Ordering::SeqCst);
        let instruction = settings.instruction_for(stage_number).to_string();
        let client = self.client();

        if !self.is_active() {
            return Ok(());
        }

        if settings.use_streaming && client.supports_streaming() {
            let bot = self.clone();
            client
                .send_streaming_request(text, &instruction, move |chunk, _| {
                    bot.speak_chunk(chunk);
                })
                .await?;

            // Covers replies whose last chunk had no sentence end
            let drained = self.inner.playback.flush();
            let bot = self.clone();
            tokio::spawn(async move {
                drained.await;
                bot.resume_listening();
            });
        } else {
            let reply = client.send_request(text, &instruction).await?;
            if !self.is_active() {
                return Ok(());
            }
            self.speak(&reply).await;
            self.resume_listening();
        }

        self.mark_waiting();
        Ok(())
    }

    /// Start the idle clock for a reply; a stopped session stays idle
    fn mark_waiting(&self) {
        if self.is_active() {
            self.inner.is_waiting.store(true, Ordering::SeqCst);
        }
    }

    /// Queue a streamed chunk; a sentence end re-arms listening once heard
    fn speak_chunk(&self, chunk: &str) {
        if !self.is_active() {
            return;
        }

        tracing::info!(kind = "output", chunk, "reply chunk");
        self.set_status(BotStatus::Speaking);
        let spoken = self.inner.playback.enqueue(chunk);

        if chunk.contains(['.', '!', '?']) {
            let bot = self.clone();
            tokio::spawn(async move {
                spoken.await;
                bot.resume_listening();
            });
        }
    }

    /// Speak and wait until it has been said
    async fn speak(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        tracing::info!(kind = "output", text, "speaking");
        self.set_status(BotStatus::Speaking);
        self.inner.playback.enqueue(text).await;
    }

    /// Listen again if the session is still running
    fn resume_listening(&self) {
        if !self.is_active() {
            return;
        }

        match self.inner.recognizer.start() {
            Ok(()) => self.set_status(BotStatus::Listening),
            Err(e) => tracing::warn!(error = %e, "could not resume listening"),
        }
    }

    fn resume_after(&self, delay: Duration) {
        if !self.is_active() {
            return;
        }

        let bot = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bot.resume_listening();
        });
    }

    fn start_idle_timer(&self) {
        self.touch();
        self.inner.is_waiting.store(true, Ordering::SeqCst);

        let weak = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDLE_POLL_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let bot = VoiceBot { inner };
                if bot.check_idle() {
                    tracing::trace!("idle phrase queued");
                }
            }
        });

        if let Some(previous) = lock(&self.inner.idle_timer).replace(timer) {
            previous.abort();
        }
    }

    fn stop_idle_timer(&self) {
        if let Some(timer) = lock(&self.inner.idle_timer).take() {
            timer.abort();
        }
    }

    fn client(&self) -> CompletionClient {
        read(&self.inner.client).clone()
    }

    fn touch(&self) {
        *lock(&self.inner.last_activity) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        lock(&self.inner.last_activity).elapsed()
    }

    fn set_status(&self, status: BotStatus) {
        self.inner.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            tracing::debug!(from = %current, to = %status, "status");
            *current = status;
            true
        });
    }

    fn display_error(&self, context: &str, error: &Error) {
        tracing::error!(error = %error, "{context}");
        self.set_status(BotStatus::Error(format!("{context}: {error}")));
    }
}

/// Forward recognizer events to the bot for as long as it exists
async fn dispatch_events(bot: Weak<BotInner>, mut events: mpsc::UnboundedReceiver<RecognizerEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = bot.upgrade() else { break };
        let bot = VoiceBot { inner };

        match event {
            RecognizerEvent::Transcript(text) => bot.process_utterance(&text).await,
            RecognizerEvent::Error(e) => bot.handle_recognition_error(&e),
        }
    }

    tracing::trace!("event dispatch exited");
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
