use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{error, info};

/// Software watchdog: the main loop must `feed` it more often than the
/// timeout, otherwise `on_expire` runs on the watchdog thread.
pub struct Watchdog {
    last_feed_ms: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    epoch: Instant,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn start(timeout: Duration) -> Self {
        Self::start_with(timeout, || {
            error!("Watchdog expired, main loop is stuck");
            std::process::abort()
        })
    }

    pub fn start_with(timeout: Duration, on_expire: impl FnOnce() + Send + 'static) -> Self {
        let epoch = Instant::now();
        let last_feed_ms = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let last_feed_ms = last_feed_ms.clone();
            let running = running.clone();
            let period = (timeout / 4).max(Duration::from_millis(1));

            thread::spawn(move || {
                while running.load(Ordering::Acquire) {
                    thread::sleep(period);

                    let now = epoch.elapsed().as_millis() as u64;
                    let fed = last_feed_ms.load(Ordering::Acquire);
                    if now.saturating_sub(fed) > timeout.as_millis() as u64 {
                        if running.load(Ordering::Acquire) {
                            on_expire();
                        }
                        return;
                    }
                }
            })
        };

        info!("Watchdog armed with {:?} timeout", timeout);

        Self {
            last_feed_ms,
            running,
            epoch,
            handle: Some(handle),
        }
    }

    pub fn feed(&self) {
        self.last_feed_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Release);
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
