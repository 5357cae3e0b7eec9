use std::fmt;

use chrono::Utc;
use tokio::time::Instant;

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in milliseconds since the unix epoch.
    fn now_ms(&self) -> u64;
}

/// Wall clock anchored once, then advanced with tokio's monotonic time.
///
/// Under a paused tokio runtime the clock only moves when tokio time does.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor_ms: u64,
    anchor: Instant,
}

impl TokioClock {
    /// Anchor a new clock at the current wall clock time.
    pub fn new() -> Self {
        let anchor_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        Self { anchor_ms, anchor: Instant::now() }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.anchor_ms.saturating_add(elapsed)
    }
}
