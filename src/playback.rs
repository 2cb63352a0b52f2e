// Reply playback behind the PlaybackSink seam
// rodio output; the OutputStream lives on a dedicated thread (!Send)

use std::io::Cursor;
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use rodio::{Decoder, OutputStream, Sink};

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("No output device found")]
    NoOutputDevice,
    #[error("Audio decode error: {0}")]
    Decode(String),
    #[error("Stream error: {0}")]
    StreamError(String),
}

/// Plays one reply's audio bytes and signals completion.
///
/// `on_finished` fires exactly once per successful `play`, on natural
/// completion or on `stop`. `stop` is idempotent and safe pre- or
/// post-completion.
pub trait PlaybackSink: Send {
    fn play(
        &mut self,
        audio: Vec<u8>,
        on_finished: Box<dyn FnOnce() + Send>,
    ) -> Result<(), PlaybackError>;

    fn stop(&mut self);
}

/// Speaker playback via rodio.
///
/// The `OutputStream` is held by a dedicated thread; the `Sink` is shared
/// and controlled from the caller. Completion is observed by a per-play
/// waiter thread sleeping on the sink.
pub struct RodioPlayer {
    sink: Arc<Sink>,
    // Dropping the sender unparks the stream thread, which drops the
    // OutputStream on its way out.
    _shutdown: Sender<()>,
    _worker: JoinHandle<()>,
}

impl RodioPlayer {
    pub fn new() -> Result<Self, PlaybackError> {
        let (shutdown_tx, shutdown_rx) = channel::<()>();
        let (ready_tx, ready_rx) = channel::<Result<Arc<Sink>, PlaybackError>>();

        let worker = std::thread::spawn(move || {
            let (stream, handle) = match OutputStream::try_default() {
                Ok(pair) => pair,
                Err(_) => {
                    let _ = ready_tx.send(Err(PlaybackError::NoOutputDevice));
                    return;
                }
            };

            let sink = match Sink::try_new(&handle) {
                Ok(sink) => Arc::new(sink),
                Err(e) => {
                    let _ = ready_tx.send(Err(PlaybackError::StreamError(e.to_string())));
                    return;
                }
            };

            let _ = ready_tx.send(Ok(sink));

            // Hold the output stream alive until the player is dropped
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        let sink = ready_rx
            .recv()
            .map_err(|_| PlaybackError::StreamError("playback thread exited".to_string()))??;

        Ok(Self {
            sink,
            _shutdown: shutdown_tx,
            _worker: worker,
        })
    }
}

impl PlaybackSink for RodioPlayer {
    fn play(
        &mut self,
        audio: Vec<u8>,
        on_finished: Box<dyn FnOnce() + Send>,
    ) -> Result<(), PlaybackError> {
        let source =
            Decoder::new(Cursor::new(audio)).map_err(|e| PlaybackError::Decode(e.to_string()))?;

        self.sink.append(source);

        let sink = self.sink.clone();
        std::thread::spawn(move || {
            sink.sleep_until_end();
            on_finished();
        });

        Ok(())
    }

    /// Stop playback and clear the queue.
    ///
    /// clear() removes queued sources but the currently-playing source may
    /// still be active; skip_one() drops it. The sink is then unpaused so a
    /// later play() produces audio. The interrupted play's waiter wakes up
    /// and fires its completion.
    fn stop(&mut self) {
        self.sink.clear();
        self.sink.skip_one();
        self.sink.play();
    }
}
