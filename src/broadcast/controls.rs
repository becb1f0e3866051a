use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Flags shared between an operator and a running broadcast.
///
/// The dispatcher re-reads every field at each poll instead of capturing
/// values at the start of a run, so changes land within one poll interval.
#[derive(Debug, Default)]
pub struct BroadcastControls {
    sending: AtomicBool,
    paused: AtomicBool,
    uploading: AtomicBool,
    delay_ms: AtomicU64,
}

impl BroadcastControls {
    pub fn new(delay_ms: u64) -> Self {
        let controls = Self::default();
        controls.delay_ms.store(delay_ms, Ordering::SeqCst);
        controls
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    /// Setting `false` cancels the running broadcast at its next check point.
    pub fn set_is_sending(&self, sending: bool) {
        self.sending.store(sending, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Flip the pause flag, returning the new value.
    pub fn toggle_pause(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn current_delay_ms(&self) -> u64 {
        self.delay_ms.load(Ordering::SeqCst)
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.current_delay_ms())
    }

    pub fn set_current_delay_ms(&self, delay_ms: u64) {
        self.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    /// Raise the uploading flag until the returned guard is dropped.
    pub fn begin_upload(&self) -> UploadingGuard<'_> {
        self.uploading.store(true, Ordering::SeqCst);
        UploadingGuard { controls: self }
    }
}

pub struct UploadingGuard<'a> {
    controls: &'a BroadcastControls,
}

impl Drop for UploadingGuard<'_> {
    fn drop(&mut self) {
        self.controls.uploading.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_pause_returns_new_state() {
        let controls = BroadcastControls::new(1000);
        assert!(!controls.is_paused());
        assert!(controls.toggle_pause());
        assert!(controls.is_paused());
        assert!(!controls.toggle_pause());
        assert!(!controls.is_paused());
    }

    #[test]
    fn test_delay_is_live() {
        let controls = BroadcastControls::new(5000);
        assert_eq!(controls.current_delay(), Duration::from_secs(5));
        controls.set_current_delay_ms(250);
        assert_eq!(controls.current_delay_ms(), 250);
    }

    #[test]
    fn test_uploading_guard_clears_on_every_exit() {
        let controls = BroadcastControls::new(0);

        fn failing_upload(controls: &BroadcastControls) -> Result<(), ()> {
            let _guard = controls.begin_upload();
            assert!(controls.is_uploading());
            Err(())
        }

        assert!(failing_upload(&controls).is_err());
        assert!(!controls.is_uploading());
    }
}
