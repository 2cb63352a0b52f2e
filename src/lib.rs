//! voiceloop - push-to-talk voice interaction loop
//!
//! Captures microphone audio, streams it to a speech recognizer, commits
//! the utterance once the transcript has been quiet long enough, exchanges
//! it with a remote conversational service, and plays back the synthesized
//! reply - while publishing a live audio-level signal for visual feedback.
//!
//! The speech-to-text engine, audio devices, and the remote service are
//! external collaborators behind traits; the crate's core is the
//! controller's state machine and timing logic.

pub mod capture;
pub mod controller;
pub mod debounce;
pub mod exchange;
pub mod level;
pub mod playback;
pub mod recognizer;
pub mod session;

// Re-export main types for convenience
pub use capture::{AudioSource, CaptureError, CpalCapture};
pub use controller::{
    ControllerConfig, ControllerEvent, ControllerEventSink, ControllerState, LogEventSink,
    NoopEventSink, VoiceController, VoiceDeps,
};
pub use debounce::{TranscriptDebouncer, DEFAULT_SILENCE_THRESHOLD};
pub use exchange::{
    ExchangeError, ExchangeResult, ExchangeService, HttpExchangeClient, DEFAULT_ENDPOINT,
};
pub use level::compute_level;
pub use playback::{PlaybackError, PlaybackSink, RodioPlayer};
pub use recognizer::{RecognizerError, RecognizerEvent, SpeechRecognizer, TranscriptUpdate};
pub use session::{RecognitionSession, SessionError, SessionEvent};
