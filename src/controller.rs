// Voice interaction controller
//
// Single-threaded control loop: every external callback (session worker,
// exchange worker, playback completion, user toggle) posts a message onto
// one queue, and the loop applies state transitions one at a time. No two
// state-mutating handlers ever run concurrently.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::capture::AudioSource;
use crate::debounce::DEFAULT_SILENCE_THRESHOLD;
use crate::exchange::{ExchangeError, ExchangeResult, ExchangeService};
use crate::playback::PlaybackSink;
use crate::recognizer::SpeechRecognizer;
use crate::session::{RecognitionSession, SessionEvent};

/// Delay before re-establishing recognition after a mid-stream failure.
/// Avoids a tight restart loop when the underlying device is unavailable.
pub const DEFAULT_RESTART_COOLDOWN: Duration = Duration::from_millis(500);

/// Controller phase. At most one of {microphone open, request in flight,
/// audio playing} is true at any instant; phases are strictly sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Listening,
    Exchanging,
    Playing,
}

/// Events published to the presentation layer.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// Controller entered a new phase
    StateChanged(ControllerState),
    /// Live loudness for visual feedback, [0, 1]
    LevelChanged(f32),
    /// Best transcript so far for the current utterance
    TranscriptChanged(String),
    /// Reply text from the remote service
    ReplyReceived { text: String },
    /// A turn ended; the presentation layer should reset its visuals
    ViewReset,
    /// A component failure that ended the current turn
    Error { message: String },
}

/// Trait for receiving controller events
pub trait ControllerEventSink: Send + Sync {
    fn on_event(&self, event: ControllerEvent);
}

/// No-op event sink (silent operation)
pub struct NoopEventSink;
impl ControllerEventSink for NoopEventSink {
    fn on_event(&self, _event: ControllerEvent) {}
}

/// Logging event sink
pub struct LogEventSink;
impl ControllerEventSink for LogEventSink {
    fn on_event(&self, event: ControllerEvent) {
        match &event {
            ControllerEvent::StateChanged(state) => {
                log::info!("[Controller] State: {:?}", state)
            }
            ControllerEvent::LevelChanged(level) => {
                log::trace!("[Controller] Level: {:.3}", level)
            }
            ControllerEvent::TranscriptChanged(text) => {
                log::info!("[Controller] Transcript: {:?}", text)
            }
            ControllerEvent::ReplyReceived { text } => {
                log::info!("[Controller] Reply: {:?}", text)
            }
            ControllerEvent::ViewReset => log::info!("[Controller] View reset"),
            ControllerEvent::Error { message } => log::error!("[Controller] Error: {}", message),
        }
    }
}

/// Controller timing configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Quiet interval after which a stable transcript is committed
    pub silence_threshold: Duration,
    /// Delay before the self-healing recognition restart
    pub restart_cooldown: Duration,
    /// Consecutive failed restart attempts before giving up and waiting
    /// for explicit user action
    pub max_restart_attempts: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            restart_cooldown: DEFAULT_RESTART_COOLDOWN,
            max_restart_attempts: 3,
        }
    }
}

/// Injected collaborators. Explicit dependencies rather than shared
/// singletons, so each seam can be substituted with a test double.
pub struct VoiceDeps {
    pub source: Box<dyn AudioSource>,
    pub recognizer: Box<dyn SpeechRecognizer>,
    pub exchange: Arc<dyn ExchangeService>,
    pub playback: Box<dyn PlaybackSink>,
}

enum ControlMsg {
    Toggle,
    Shutdown,
    Session(SessionEvent),
    ExchangeDone {
        session: u64,
        result: Result<ExchangeResult, ExchangeError>,
    },
    PlaybackFinished {
        session: u64,
    },
}

/// Handle to a running voice interaction controller.
///
/// The control loop runs on its own thread for the lifetime of the handle;
/// dropping the handle shuts it down.
pub struct VoiceController {
    tx: Sender<ControlMsg>,
    state: Arc<Mutex<ControllerState>>,
    worker: Option<JoinHandle<()>>,
}

impl VoiceController {
    pub fn spawn(
        config: ControllerConfig,
        deps: VoiceDeps,
        sink: Arc<dyn ControllerEventSink>,
    ) -> Self {
        let (tx, rx) = channel();
        let state = Arc::new(Mutex::new(ControllerState::Idle));

        let loop_state = state.clone();
        let loop_tx = tx.clone();
        let worker = std::thread::spawn(move || {
            ControlLoop::new(config, deps, sink, loop_state, loop_tx).run(rx);
        });

        Self {
            tx,
            state,
            worker: Some(worker),
        }
    }

    /// User toggle: starts listening from idle, tears everything down
    /// otherwise.
    pub fn toggle(&self) {
        let _ = self.tx.send(ControlMsg::Toggle);
    }

    /// Current phase snapshot.
    pub fn state(&self) -> ControllerState {
        *self.state.lock()
    }
}

impl Drop for VoiceController {
    fn drop(&mut self) {
        let _ = self.tx.send(ControlMsg::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct ControlLoop {
    config: ControllerConfig,
    source: Box<dyn AudioSource>,
    recognizer: Box<dyn SpeechRecognizer>,
    exchange: Arc<dyn ExchangeService>,
    playback: Box<dyn PlaybackSink>,
    sink: Arc<dyn ControllerEventSink>,
    shared_state: Arc<Mutex<ControllerState>>,
    self_tx: Sender<ControlMsg>,
    session_tx: Sender<SessionEvent>,

    state: ControllerState,
    /// Active recognition session (Listening only)
    current: Option<RecognitionSession>,
    /// Id of the turn in progress, carried through Exchanging/Playing so
    /// late completions from a superseded turn can be dropped
    turn: Option<u64>,
    /// Frozen-on-commit transcript of the turn in progress
    transcript: String,
    session_counter: u64,
    restart_at: Option<Instant>,
    restart_attempts: u32,
}

impl ControlLoop {
    fn new(
        config: ControllerConfig,
        deps: VoiceDeps,
        sink: Arc<dyn ControllerEventSink>,
        shared_state: Arc<Mutex<ControllerState>>,
        self_tx: Sender<ControlMsg>,
    ) -> Self {
        // Session workers speak SessionEvent; bridge them onto the
        // controller queue so the loop drains a single channel.
        let (session_tx, session_rx) = channel::<SessionEvent>();
        let bridge_tx = self_tx.clone();
        std::thread::spawn(move || {
            while let Ok(event) = session_rx.recv() {
                if bridge_tx.send(ControlMsg::Session(event)).is_err() {
                    break;
                }
            }
        });

        Self {
            config,
            source: deps.source,
            recognizer: deps.recognizer,
            exchange: deps.exchange,
            playback: deps.playback,
            sink,
            shared_state,
            self_tx,
            session_tx,
            state: ControllerState::Idle,
            current: None,
            turn: None,
            transcript: String::new(),
            session_counter: 0,
            restart_at: None,
            restart_attempts: 0,
        }
    }

    fn run(mut self, rx: Receiver<ControlMsg>) {
        loop {
            let msg = match self.restart_at {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.restart_at = None;
                        self.attempt_restart();
                        continue;
                    }
                    match rx.recv_timeout(deadline - now) {
                        Ok(msg) => msg,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            };

            match msg {
                ControlMsg::Toggle => self.on_toggle(),
                ControlMsg::Shutdown => break,
                ControlMsg::Session(event) => self.on_session_event(event),
                ControlMsg::ExchangeDone { session, result } => {
                    self.on_exchange_done(session, result)
                }
                ControlMsg::PlaybackFinished { session } => self.on_playback_finished(session),
            }
        }

        self.stop_current_session();
        self.playback.stop();
    }

    fn emit(&self, event: ControllerEvent) {
        self.sink.on_event(event);
    }

    fn set_state(&mut self, state: ControllerState) {
        if self.state == state {
            return;
        }
        self.state = state;
        *self.shared_state.lock() = state;
        self.emit(ControllerEvent::StateChanged(state));
    }

    fn on_toggle(&mut self) {
        if self.state == ControllerState::Idle && self.restart_at.is_none() {
            log::info!("User toggled on");
            // Clean up any stale playback before the microphone opens
            self.playback.stop();
            self.restart_attempts = 0;
            self.start_listening();
        } else {
            log::info!("User toggled off");
            self.restart_at = None;
            self.stop_current_session();
            self.playback.stop();
            self.finish_turn();
        }
    }

    fn start_listening(&mut self) -> bool {
        self.transcript.clear();
        self.session_counter += 1;
        let id = self.session_counter;

        match RecognitionSession::start(
            id,
            &mut *self.source,
            &mut *self.recognizer,
            self.session_tx.clone(),
            self.config.silence_threshold,
        ) {
            Ok(session) => {
                self.current = Some(session);
                self.turn = Some(id);
                self.restart_attempts = 0;
                log::info!("Listening (session {})", id);
                self.set_state(ControllerState::Listening);
                true
            }
            Err(e) => {
                log::error!("Failed to start recognition: {}", e);
                self.emit(ControllerEvent::Error {
                    message: e.to_string(),
                });
                self.turn = None;
                self.set_state(ControllerState::Idle);
                false
            }
        }
    }

    /// Cooldown expired: re-enter Listening unless the user toggled off in
    /// the meantime or a new turn started.
    fn attempt_restart(&mut self) {
        if self.state != ControllerState::Idle || self.current.is_some() {
            return;
        }
        log::info!(
            "Restarting recognition after stream failure (attempt {})",
            self.restart_attempts + 1
        );
        if !self.start_listening() {
            self.restart_attempts += 1;
            if self.restart_attempts < self.config.max_restart_attempts {
                self.restart_at = Some(Instant::now() + self.config.restart_cooldown);
            } else {
                log::warn!(
                    "Giving up after {} failed restarts; awaiting user action",
                    self.restart_attempts
                );
            }
        }
    }

    fn stop_current_session(&mut self) {
        if let Some(mut session) = self.current.take() {
            session.stop(&mut *self.source, &mut *self.recognizer);
            // Microphone is closed; park the meter
            self.emit(ControllerEvent::LevelChanged(0.0));
        }
    }

    /// End the turn: back to Idle and tell the presentation layer to reset.
    fn finish_turn(&mut self) {
        self.turn = None;
        self.set_state(ControllerState::Idle);
        self.emit(ControllerEvent::ViewReset);
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        let id = match &event {
            SessionEvent::Level { session, .. }
            | SessionEvent::Transcript { session, .. }
            | SessionEvent::SilenceCommitted { session }
            | SessionEvent::Failed { session, .. } => *session,
        };

        // Events from a superseded session must produce no state change
        if self.current.as_ref().map(RecognitionSession::id) != Some(id)
            || self.state != ControllerState::Listening
        {
            log::debug!("Dropping stale session event (session {})", id);
            return;
        }

        match event {
            SessionEvent::Level { level, .. } => {
                self.emit(ControllerEvent::LevelChanged(level));
            }
            SessionEvent::Transcript { text, .. } => {
                self.transcript = text.clone();
                self.emit(ControllerEvent::TranscriptChanged(text));
            }
            SessionEvent::SilenceCommitted { .. } => self.on_commit(id),
            SessionEvent::Failed { message, .. } => self.on_recognition_failed(message),
        }
    }

    /// Silence commit: freeze the transcript by stopping the session first,
    /// then hand the frozen text to the exchange worker. The session is
    /// down before the request starts, so later transcript mutations
    /// cannot race the send.
    fn on_commit(&mut self, session: u64) {
        let text = self.transcript.clone();
        log::info!("Utterance committed: {:?}", text);

        self.stop_current_session();
        self.set_state(ControllerState::Exchanging);

        let exchange = self.exchange.clone();
        let tx = self.self_tx.clone();
        std::thread::spawn(move || {
            let result = exchange.exchange(&text);
            let _ = tx.send(ControlMsg::ExchangeDone { session, result });
        });
    }

    /// Mid-stream recognition failure: tear down and schedule the
    /// self-healing restart. Not surfaced as a hard error; the restart is
    /// invisible apart from the log.
    fn on_recognition_failed(&mut self, message: String) {
        log::warn!("Recognition stream failed: {}; restarting shortly", message);
        self.stop_current_session();
        self.turn = None;
        self.set_state(ControllerState::Idle);
        self.restart_attempts = 0;
        self.restart_at = Some(Instant::now() + self.config.restart_cooldown);
    }

    fn on_exchange_done(
        &mut self,
        session: u64,
        result: Result<ExchangeResult, ExchangeError>,
    ) {
        if self.turn != Some(session) || self.state != ControllerState::Exchanging {
            log::debug!("Dropping stale exchange result (session {})", session);
            return;
        }

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                log::error!("Exchange failed: {}", e);
                self.emit(ControllerEvent::Error {
                    message: e.to_string(),
                });
                self.finish_turn();
                return;
            }
        };

        self.emit(ControllerEvent::ReplyReceived {
            text: result.reply_text,
        });

        let Some(audio) = result.reply_audio else {
            // Nothing to play
            self.finish_turn();
            return;
        };

        let tx = self.self_tx.clone();
        let finished = Box::new(move || {
            let _ = tx.send(ControlMsg::PlaybackFinished { session });
        });

        match self.playback.play(audio, finished) {
            Ok(()) => {
                self.set_state(ControllerState::Playing);
            }
            Err(e) => {
                log::error!("Playback failed: {}", e);
                self.emit(ControllerEvent::Error {
                    message: e.to_string(),
                });
                self.finish_turn();
            }
        }
    }

    fn on_playback_finished(&mut self, session: u64) {
        if self.turn != Some(session) || self.state != ControllerState::Playing {
            log::debug!("Dropping stale playback completion (session {})", session);
            return;
        }
        log::info!("Playback finished");
        self.finish_turn();
    }
}
