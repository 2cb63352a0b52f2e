// Microphone capture behind the AudioSource seam
// cpal input stream owned by a dedicated thread (cpal::Stream is !Send)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Sender, SyncSender, TrySendError};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

// Shared drop accounting for capture backpressure
static FRAME_DROP_COUNT: AtomicU64 = AtomicU64::new(0);
static LAST_DROP_LOG_MS: AtomicU64 = AtomicU64::new(0);

/// Total frames dropped because the consumer could not keep up.
pub fn frame_drops() -> u64 {
    FRAME_DROP_COUNT.load(Ordering::Relaxed)
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("No input device found")]
    NoInputDevice,
    #[error("Capture already open")]
    AlreadyOpen,
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Stream error: {0}")]
    StreamError(String),
}

/// Microphone input as a stream of PCM float frames.
///
/// Frames arrive at the device-native rate in fixed-size chunks; `close`
/// must be idempotent and safe from any state.
pub trait AudioSource: Send {
    fn open(&mut self, frames: SyncSender<Vec<f32>>) -> Result<(), CaptureError>;
    fn close(&mut self);
}

/// Default-device capture via cpal.
///
/// The stream lives on its own thread; open errors are reported back
/// synchronously through a ready channel. Multi-channel input is averaged
/// down to mono before delivery.
pub struct CpalCapture {
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self {
            stop_tx: None,
            worker: None,
        }
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for CpalCapture {
    fn open(&mut self, frames: SyncSender<Vec<f32>>) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyOpen);
        }

        let (stop_tx, stop_rx) = channel::<()>();
        let (ready_tx, ready_rx) = channel::<Result<(), CaptureError>>();

        let worker = std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_input_device() {
                Some(d) => d,
                None => {
                    let _ = ready_tx.send(Err(CaptureError::NoInputDevice));
                    return;
                }
            };

            log::info!("Using input device: {}", device.name().unwrap_or_default());

            let config = match device.default_input_config() {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(CaptureError::ConfigError(e.to_string())));
                    return;
                }
            };

            let channels = config.channels() as usize;
            log::info!(
                "Audio config: {} channels, {}Hz, {:?}",
                channels,
                config.sample_rate().0,
                config.sample_format()
            );

            let stream = device.build_input_stream(
                &config.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Average multi-channel input down to mono
                    let mono: Vec<f32> = if channels > 1 {
                        data.chunks(channels)
                            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
                            .collect()
                    } else {
                        data.to_vec()
                    };

                    // Bounded send with backpressure; drop if the consumer stalls
                    match frames.try_send(mono) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            FRAME_DROP_COUNT.fetch_add(1, Ordering::Relaxed);
                            // Rate-limit drop logs to avoid log storms
                            const DROP_LOG_INTERVAL_MS: u64 = 2000;
                            let now_ms = std::time::SystemTime::now()
                                .duration_since(std::time::UNIX_EPOCH)
                                .map(|d| d.as_millis() as u64)
                                .unwrap_or(0);
                            let last_ms = LAST_DROP_LOG_MS.load(Ordering::Relaxed);
                            if now_ms.saturating_sub(last_ms) >= DROP_LOG_INTERVAL_MS {
                                LAST_DROP_LOG_MS.store(now_ms, Ordering::Relaxed);
                                log::warn!(
                                    "Capture buffer full, dropping frames (total drops: {})",
                                    FRAME_DROP_COUNT.load(Ordering::Relaxed)
                                );
                            }
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            log::debug!("Capture channel disconnected");
                        }
                    }
                },
                |err| {
                    log::error!("Audio capture error: {}", err);
                },
                None,
            );

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(CaptureError::StreamError(e.to_string())));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::StreamError(e.to_string())));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            // Hold the stream alive until close(); dropping it ends capture
            let _ = stop_rx.recv();
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(CaptureError::StreamError(
                    "capture thread exited before ready".to_string(),
                ))
            }
        }
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}
