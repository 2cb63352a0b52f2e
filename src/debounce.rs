// Silence-based utterance commit detection

use std::time::{Duration, Instant};

/// Default quiet interval after which a stable transcript is committed.
pub const DEFAULT_SILENCE_THRESHOLD: Duration = Duration::from_millis(1500);

/// Detects when a transcript has stopped changing for a quiet interval.
///
/// Every distinct transcript re-arms the deadline; identical consecutive
/// text is a no-op so unchanged partial results don't push the commit out.
/// Clock-injected so it can be driven from an event loop and tested with
/// synthetic instants.
#[derive(Debug)]
pub struct TranscriptDebouncer {
    quiet: Duration,
    last_text: Option<String>,
    deadline: Option<Instant>,
}

impl TranscriptDebouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            last_text: None,
            deadline: None,
        }
    }

    /// Feed a transcript update. Re-arms the quiet deadline only if `text`
    /// differs from the last seen value; returns whether it re-armed.
    pub fn on_transcript(&mut self, text: &str, now: Instant) -> bool {
        if self.last_text.as_deref() == Some(text) {
            return false;
        }
        self.last_text = Some(text.to_string());
        self.deadline = Some(now + self.quiet);
        true
    }

    /// True exactly once per armed cycle, when `now` has passed the deadline.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Drop any pending deadline. A cancelled cycle never fires.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.last_text = None;
    }

    /// Pending deadline, if armed. Lets the event loop size its waits.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
