//! Voice input and output
//!
//! Recognition and synthesis sit behind the [`RecognitionEngine`] and
//! [`Synthesizer`] traits. Console implementations drive the bot from a
//! terminal; microphone and cloud implementations use real audio.

mod capture;
mod cloud;
mod console;
mod microphone;
mod playback;
mod recognizer;
mod segmenter;
mod stt;
mod synthesizer;
mod tts;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use cloud::CloudSynthesizer;
pub use console::{ConsoleEngine, ConsoleSynthesizer, DEFAULT_CHAR_DELAY};
pub use microphone::{DEFAULT_NO_SPEECH_TIMEOUT, MicrophoneEngine};
pub use playback::AudioPlayback;
pub use recognizer::{
    ERROR_RESTART_DELAY, RESTART_DELAY, RecognitionEngine, RecognizerEvent, SpeechRecognizer,
};
pub use segmenter::{SegmenterState, UtteranceSegmenter};
pub use stt::SpeechToText;
pub use synthesizer::Synthesizer;
pub use tts::TextToSpeech;
