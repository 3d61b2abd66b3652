//! Cooperative stop and pause flags
//!
//! Long-running loops poll a [`ScanControl`] at comic and image boundaries.
//! Nothing is preempted: a stop takes effect at the next boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long a paused loop sleeps between polls
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared stop/pause flags for one scan
#[derive(Debug, Clone, Default)]
pub struct ScanControl {
    stop_flag: Arc<AtomicBool>,
    pause_flag: Arc<AtomicBool>,
}

impl ScanControl {
    /// Create a fresh, running control
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful stop. Also releases a pause so loops can exit.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.pause_flag.store(false, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Pause at the next boundary
    pub fn pause(&self) {
        self.pause_flag.store(true, Ordering::SeqCst);
    }

    /// Resume after a pause
    pub fn resume(&self) {
        self.pause_flag.store(false, Ordering::SeqCst);
    }

    /// Whether a pause is in effect
    pub fn is_paused(&self) -> bool {
        self.pause_flag.load(Ordering::SeqCst)
    }

    /// Clear both flags before a new scan
    pub fn reset(&self) {
        self.stop_flag.store(false, Ordering::SeqCst);
        self.pause_flag.store(false, Ordering::SeqCst);
    }

    /// Block while paused. Returns `false` if the scan should stop.
    pub fn checkpoint(&self) -> bool {
        while self.is_paused() && !self.is_stopped() {
            thread::sleep(PAUSE_POLL_INTERVAL);
        }
        !self.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_checkpoint_when_running() {
        let control = ScanControl::new();
        assert!(control.checkpoint());
        control.stop();
        assert!(!control.checkpoint());
    }

    #[test]
    fn test_stop_releases_pause() {
        let control = ScanControl::new();
        control.pause();
        control.stop();
        assert!(!control.is_paused());
        assert!(!control.checkpoint());
    }

    #[test]
    fn test_checkpoint_blocks_until_resumed() {
        let control = ScanControl::new();
        control.pause();

        let remote = control.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            remote.resume();
        });

        let start = Instant::now();
        assert!(control.checkpoint());
        assert!(start.elapsed() >= Duration::from_millis(100));
        handle.join().unwrap();
    }
}
