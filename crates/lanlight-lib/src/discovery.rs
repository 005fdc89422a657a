//! Light discovery with escalating timeouts.
//!
//! Attempt `i` listens for `i × unit`. Reaching the target count cancels the
//! attempt early; an attempt that times out with at least one light is
//! accepted as-is. Empty attempts sleep `i × unit` before the next one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::device::{DeviceHandle, LightError, Result};

/// Cooperative cancellation flag shared with a running scan.
///
/// Cancelling is idempotent and stays valid after the scan has finished.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A network discovery primitive.
pub trait DiscoverySource {
    /// Search for up to `window`, sending each light found on `found`.
    ///
    /// Must return promptly once `cancel` is raised or `found` is closed.
    fn scan(
        &self,
        window: Duration,
        cancel: &CancelToken,
        found: &Sender<DeviceHandle>,
    ) -> Result<()>;
}

/// Runs a [`DiscoverySource`] until enough lights answer.
pub struct DiscoveryManager<S> {
    source: S,
    unit: Duration,
}

impl<S: DiscoverySource + Sync> DiscoveryManager<S> {
    pub fn new(source: S, unit: Duration) -> Self {
        Self { source, unit }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Find up to `target_count` lights in at most `max_attempts` attempts.
    ///
    /// Returns at least one handle, or [`LightError::NotFound`].
    pub fn discover(&self, target_count: usize, max_attempts: u32) -> Result<Vec<DeviceHandle>> {
        let target = target_count.max(1);
        for attempt in 1..=max_attempts {
            let window = self.unit.saturating_mul(attempt);
            log::info!("discovery attempt {attempt}/{max_attempts} ({window:?} window)");
            let found = self.run_attempt(window, target);
            if !found.is_empty() {
                if found.len() < target {
                    log::warn!(
                        "found {}/{target} lights, continuing with those",
                        found.len()
                    );
                }
                return Ok(found);
            }
            if attempt < max_attempts {
                let pause = self.unit.saturating_mul(attempt);
                log::warn!("no light answered, retrying in {pause:?}");
                std::thread::sleep(pause);
            }
        }
        Err(LightError::NotFound {
            attempts: max_attempts,
        })
    }

    fn run_attempt(&self, window: Duration, target: usize) -> Vec<DeviceHandle> {
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let ends = Instant::now() + window;
        let source = &self.source;
        let token = &cancel;

        std::thread::scope(|s| {
            let scan = s.spawn(move || source.scan(window, token, &tx));

            let mut handles: Vec<DeviceHandle> = Vec::new();
            while handles.len() < target {
                let remaining = ends.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match rx.recv_timeout(remaining) {
                    Ok(handle) => {
                        if handles.iter().all(|h| h.target != handle.target) {
                            log::info!("found light {handle}");
                            handles.push(handle);
                        }
                    }
                    Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
                }
            }

            cancel.cancel();
            match scan.join() {
                Ok(Err(e)) => log::warn!("discovery scan failed: {e}"),
                Err(_) => log::warn!("discovery scan panicked"),
                Ok(Ok(())) => {}
            }
            handles
        })
    }
}

/// Scripted discovery source for tests.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Delivers handles at fixed offsets from the start of each scan.
    /// Scan `n` uses `script[n]`; scans past the script find nothing.
    #[derive(Default)]
    pub struct ScriptedSource {
        script: Vec<Vec<(Duration, DeviceHandle)>>,
        scans: AtomicUsize,
        /// Window passed to each scan.
        pub windows: Mutex<Vec<Duration>>,
    }

    impl ScriptedSource {
        pub fn new(script: Vec<Vec<(Duration, DeviceHandle)>>) -> Self {
            Self {
                script,
                ..Self::default()
            }
        }

        pub fn windows(&self) -> Vec<Duration> {
            self.windows.lock().map(|w| w.clone()).unwrap_or_default()
        }
    }

    /// Sleep until `at` in small slices; false if cancelled first.
    fn wait_until(at: Instant, cancel: &CancelToken) -> bool {
        while Instant::now() < at {
            if cancel.is_cancelled() {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        !cancel.is_cancelled()
    }

    impl DiscoverySource for ScriptedSource {
        fn scan(
            &self,
            window: Duration,
            cancel: &CancelToken,
            found: &Sender<DeviceHandle>,
        ) -> Result<()> {
            let start = Instant::now();
            if let Ok(mut w) = self.windows.lock() {
                w.push(window);
            }
            let n = self.scans.fetch_add(1, Ordering::SeqCst);
            for (offset, handle) in self.script.get(n).into_iter().flatten() {
                if *offset >= window || !wait_until(start + *offset, cancel) {
                    return Ok(());
                }
                if found.send(handle.clone()).is_err() {
                    return Ok(());
                }
            }
            wait_until(start + window, cancel);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedSource;
    use super::*;
    use crate::device::mock::handle;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_after_source_closed_is_noop() {
        let source = ScriptedSource::new(vec![vec![(ms(1), handle(1))]]);
        let token = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        std::thread::scope(|s| {
            let (source, token) = (&source, &token);
            s.spawn(move || {
                let found = tx;
                source.scan(ms(20), token, &found).unwrap();
            });
        });
        assert_eq!(rx.recv().unwrap(), handle(1));
        // the scan is over and its sender gone
        assert!(rx.recv().is_err());

        token.cancel();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());

        // a cancelled token stops the next scan at once
        let (tx, _rx) = mpsc::channel();
        let start = Instant::now();
        source.scan(ms(500), &token, &tx).unwrap();
        assert!(start.elapsed() < ms(250));
    }

    #[test]
    fn returns_target_count_when_all_arrive() {
        let source = ScriptedSource::new(vec![vec![(ms(5), handle(1)), (ms(10), handle(2))]]);
        let manager = DiscoveryManager::new(source, ms(400));
        let start = Instant::now();
        let found = manager.discover(2, 3).unwrap();
        assert_eq!(found, vec![handle(1), handle(2)]);
        // cancelled early instead of waiting out the window
        assert!(start.elapsed() < ms(300));
    }

    #[test]
    fn accepts_partial_result_when_window_closes() {
        let source = ScriptedSource::new(vec![vec![(ms(5), handle(1)), (ms(500), handle(2))]]);
        let manager = DiscoveryManager::new(source, ms(60));
        let found = manager.discover(2, 3).unwrap();
        assert_eq!(found, vec![handle(1)]);
        assert_eq!(manager.source.windows(), vec![ms(60)]);
    }

    #[test]
    fn duplicate_replies_are_collapsed() {
        let source = ScriptedSource::new(vec![vec![
            (ms(1), handle(1)),
            (ms(2), handle(1)),
            (ms(3), handle(2)),
        ]]);
        let manager = DiscoveryManager::new(source, ms(300));
        let found = manager.discover(2, 1).unwrap();
        assert_eq!(found, vec![handle(1), handle(2)]);
    }

    #[test]
    fn escalates_window_after_empty_attempt() {
        // first attempt hears nothing, second hears one light
        let source = ScriptedSource::new(vec![vec![], vec![(ms(5), handle(3))]]);
        let manager = DiscoveryManager::new(source, ms(20));
        let found = manager.discover(1, 4).unwrap();
        assert_eq!(found, vec![handle(3)]);
        assert_eq!(manager.source.windows(), vec![ms(20), ms(40)]);
    }

    #[test]
    fn fails_after_max_attempts_with_nothing_found() {
        let manager = DiscoveryManager::new(ScriptedSource::default(), ms(5));
        let err = manager.discover(1, 3).unwrap_err();
        assert!(matches!(err, LightError::NotFound { attempts: 3 }));
        assert!(err.is_fatal());
        assert_eq!(manager.source.windows(), vec![ms(5), ms(10), ms(15)]);
    }

    #[test]
    fn zero_target_count_means_one() {
        let source = ScriptedSource::new(vec![vec![(ms(1), handle(1)), (ms(2), handle(2))]]);
        let manager = DiscoveryManager::new(source, ms(300));
        assert_eq!(manager.discover(0, 1).unwrap(), vec![handle(1)]);
    }
}
