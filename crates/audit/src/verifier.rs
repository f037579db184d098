use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::error;

use crate::AuditLog;

const SLEEP_GRANULARITY: Duration = Duration::from_secs(1);

/// Runs [`AuditLog::verify`] on a fixed interval until stopped. Sleeps are
/// chunked to at most 1s so `stop()` latency stays bounded
/// (`spec.md` §5 "Cancellation & timeouts").
pub struct AuditVerifier {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AuditVerifier {
    pub fn start(log: &'static AuditLog, interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let handle = std::thread::spawn(move || {
            while running_thread.load(Ordering::SeqCst) {
                sleep_chunked(interval, &running_thread);
                if !running_thread.load(Ordering::SeqCst) {
                    break;
                }
                if !log.verify() {
                    error!("audit log hash chain verification failed");
                }
            }
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AuditVerifier {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn sleep_chunked(total: Duration, running: &AtomicBool) {
    let mut remaining = total;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let step = remaining.min(SLEEP_GRANULARITY);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}
