// Recognition session: one utterance lifetime of microphone -> streaming
// transcription, with level metering and silence-commit detection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, sync_channel, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::capture::{AudioSource, CaptureError};
use crate::debounce::TranscriptDebouncer;
use crate::level::compute_level;
use crate::recognizer::{RecognizerError, RecognizerEvent, SpeechRecognizer};

/// Worker tick; bounds both commit-poll latency and stop latency.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Capture-to-worker channel depth. Frames beyond this are dropped at the
/// source rather than buffered without bound.
const FRAME_CHANNEL_DEPTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Another session is already active")]
    AlreadyActive,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

/// Messages a session posts to its owner, tagged with the session id so
/// events from a superseded session can be recognized and dropped.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Level { session: u64, level: f32 },
    Transcript { session: u64, text: String },
    SilenceCommitted { session: u64 },
    Failed { session: u64, message: String },
}

/// One lifetime of (microphone open -> streaming transcribe -> close).
///
/// The worker thread merges the frame stream and the recognizer's event
/// stream: frames are level-metered and forwarded to the recognizer, and
/// each distinct transcript re-arms the silence debouncer. A stopped
/// session posts nothing further.
pub struct RecognitionSession {
    id: u64,
    stopped: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl RecognitionSession {
    /// Open the microphone and start streaming recognition.
    ///
    /// On recognizer failure the already-opened capture is closed before
    /// returning, so a failed start leaves nothing armed.
    pub fn start(
        id: u64,
        source: &mut dyn AudioSource,
        recognizer: &mut dyn SpeechRecognizer,
        out: Sender<SessionEvent>,
        silence_threshold: Duration,
    ) -> Result<Self, SessionError> {
        let (frame_tx, frame_rx) = sync_channel::<Vec<f32>>(FRAME_CHANNEL_DEPTH);
        let (rec_tx, rec_rx) = channel::<Vec<f32>>();
        let (event_tx, event_rx) = channel::<RecognizerEvent>();

        source.open(frame_tx)?;

        if let Err(e) = recognizer.start_streaming(rec_rx, event_tx) {
            source.close();
            return Err(e.into());
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let stop_flag = stopped.clone();

        let worker = std::thread::spawn(move || {
            let mut debouncer = TranscriptDebouncer::new(silence_threshold);
            log::debug!("[session {}] worker started", id);

            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                // Drain recognizer events first; a terminal event ends the worker
                loop {
                    match event_rx.try_recv() {
                        Ok(RecognizerEvent::Transcript(update)) => {
                            if debouncer.on_transcript(&update.text, Instant::now())
                                && !stop_flag.load(Ordering::SeqCst)
                            {
                                let _ = out.send(SessionEvent::Transcript {
                                    session: id,
                                    text: update.text,
                                });
                            }
                        }
                        Ok(RecognizerEvent::Failed(message)) => {
                            debouncer.cancel();
                            if !stop_flag.load(Ordering::SeqCst) {
                                log::warn!("[session {}] recognition failed: {}", id, message);
                                let _ = out.send(SessionEvent::Failed {
                                    session: id,
                                    message,
                                });
                            }
                            return;
                        }
                        Ok(RecognizerEvent::Cancelled) => {
                            debouncer.cancel();
                            log::debug!("[session {}] recognizer cancelled", id);
                            return;
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            debouncer.cancel();
                            log::debug!("[session {}] recognizer event channel closed", id);
                            return;
                        }
                    }
                }

                if debouncer.poll(Instant::now()) && !stop_flag.load(Ordering::SeqCst) {
                    let _ = out.send(SessionEvent::SilenceCommitted { session: id });
                }

                match frame_rx.recv_timeout(POLL_INTERVAL) {
                    Ok(frame) => {
                        if !stop_flag.load(Ordering::SeqCst) {
                            let _ = out.send(SessionEvent::Level {
                                session: id,
                                level: compute_level(&frame),
                            });
                        }
                        let _ = rec_tx.send(frame);
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                        // Capture went away; keep draining recognizer events
                        // at the poll cadence until stop or a terminal event.
                        std::thread::sleep(POLL_INTERVAL);
                    }
                }
            }

            log::debug!("[session {}] worker exiting", id);
        });

        Ok(Self {
            id,
            stopped,
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Tear down the session: close capture, cancel recognition, join the
    /// worker. Idempotent and safe to call at any point.
    pub fn stop(&mut self, source: &mut dyn AudioSource, recognizer: &mut dyn SpeechRecognizer) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        source.close();
        recognizer.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        log::debug!("[session {}] stopped", self.id);
    }
}
