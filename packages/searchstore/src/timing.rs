//! Slow-operation logging

use std::time::{Duration, Instant};

use tracing::warn;

/// Logs a `[PROFILED]` warning on drop when the guarded operation ran
/// longer than its threshold
#[derive(Debug)]
pub struct SlowOpGuard {
    operation: &'static str,
    detail: String,
    threshold: Duration,
    start: Instant,
}

impl SlowOpGuard {
    pub fn new(operation: &'static str, detail: impl Into<String>, threshold_ms: u64) -> Self {
        Self {
            operation,
            detail: detail.into(),
            threshold: Duration::from_millis(threshold_ms),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_slow(&self) -> bool {
        self.elapsed() > self.threshold
    }
}

impl Drop for SlowOpGuard {
    fn drop(&mut self) {
        let elapsed = self.elapsed();
        if elapsed > self.threshold {
            warn!(
                operation = self.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                "[PROFILED] {} took {:?} with {}",
                self.operation,
                elapsed,
                self.detail
            );
        }
    }
}
