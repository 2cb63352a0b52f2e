// Speech-to-text seam
//
// The crate does not bundle a transcription backend; implementations bind
// whatever engine the host application uses. The session feeds captured
// frames in and consumes incremental transcript updates out.

use std::sync::mpsc::{Receiver, Sender};

/// Best-guess-so-far snapshot for the current utterance. Last write wins;
/// older updates are discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptUpdate {
    pub text: String,
    pub is_final: bool,
}

/// Events from a streaming recognizer. The stream terminates with either
/// `Failed` or `Cancelled`, never both.
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    Transcript(TranscriptUpdate),
    Failed(String),
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum RecognizerError {
    #[error("Recognizer unavailable: {0}")]
    Unavailable(String),
    #[error("Recognizer already streaming")]
    AlreadyStreaming,
}

/// Streaming speech-to-text over a frame source.
///
/// `start_streaming` takes ownership of the frame receiver for one
/// utterance attempt. `cancel` is idempotent and must terminate the event
/// stream with `RecognizerEvent::Cancelled`, never `Failed`, so callers
/// can tell a deliberate stop from a genuine mid-stream error.
pub trait SpeechRecognizer: Send {
    fn start_streaming(
        &mut self,
        frames: Receiver<Vec<f32>>,
        events: Sender<RecognizerEvent>,
    ) -> Result<(), RecognizerError>;

    fn cancel(&mut self);
}
