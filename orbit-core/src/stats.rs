use std::time::Duration;

/// Min / exponential-moving-average / max of per-block download times, kept purely
/// for diagnostics (spec §3, "Block latency stats").
#[derive(Debug, Clone, Copy)]
pub struct BlockLatencyStats {
    min_ms: Option<u32>,
    ema_ms: f64,
    max_ms: u32,
    /// Smoothing factor for the EMA; the reference implementation uses 0.2.
    alpha: f64,
}

impl BlockLatencyStats {
    pub fn new() -> Self {
        BlockLatencyStats {
            min_ms: None,
            ema_ms: 0.0,
            max_ms: 0,
            alpha: 0.2,
        }
    }

    pub fn record(&mut self, latency: Duration) {
        let ms = latency.as_millis() as u32;
        self.min_ms = Some(self.min_ms.map_or(ms, |min| min.min(ms)));
        self.max_ms = self.max_ms.max(ms);
        self.ema_ms = match self.min_ms {
            Some(min) if min == ms && self.ema_ms == 0.0 => ms as f64,
            _ => self.alpha * ms as f64 + (1.0 - self.alpha) * self.ema_ms,
        };
    }

    pub fn min_ms(&self) -> u32 {
        self.min_ms.unwrap_or(0)
    }

    pub fn ema_ms(&self) -> f64 {
        self.ema_ms
    }

    pub fn max_ms(&self) -> u32 {
        self.max_ms
    }
}

impl Default for BlockLatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
