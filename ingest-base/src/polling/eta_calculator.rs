use std::time::Duration;

use tokio::time::Instant;

/// ETA reported while the job falls further behind the head.
const MAX_ETA: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Calculates the expected time to catch up to the tip of the chain.
#[derive(Debug)]
pub(crate) struct SyncerEtaCalculator {
    last_time: Instant,
    last_block: u64,
    last_tip: u64,
    last_eta: Duration,
    /// Block processing rate less the tip progression rate, as a moving
    /// average.
    effective_rate: Option<f64>,
    /// How long (seconds) data survives in the moving average.
    time_window: f64,
}

impl SyncerEtaCalculator {
    pub fn new(last_block: u64, last_tip: u64, time_window: f64) -> Self {
        Self {
            last_time: Instant::now(),
            last_block,
            last_tip,
            last_eta: Duration::ZERO,
            effective_rate: None,
            time_window,
        }
    }

    /// Calculate the expected time to catch up to the tip of the chain.
    pub fn calculate(&mut self, current_block: u64, current_tip: u64) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_time).as_secs_f64();
        if elapsed <= 0. {
            return self.last_eta;
        }
        self.last_time = now;

        let blocks_processed = current_block.saturating_sub(self.last_block) as f64;
        let tip_progression = current_tip.saturating_sub(self.last_tip) as f64;
        self.last_block = current_block;
        self.last_tip = current_tip;
        let new_rate = (blocks_processed - tip_progression) / elapsed;

        // Only remember a rate once something moved, otherwise the average
        // takes long to normalize.
        let effective_rate = if let Some(old_rate) = self.effective_rate {
            let new_coeff = f64::min(elapsed / self.time_window, 0.9);
            let old_coeff = 1. - new_coeff;

            let er = (new_rate * new_coeff) + (old_rate * old_coeff);
            self.effective_rate = Some(er);
            er
        } else {
            if new_rate != 0. {
                self.effective_rate = Some(new_rate);
            }
            new_rate
        };

        let remaining = current_tip.saturating_sub(current_block);
        self.last_eta = if remaining == 0 {
            Duration::ZERO
        } else if effective_rate <= 0. {
            MAX_ETA
        } else {
            Duration::from_secs_f64(remaining as f64 / effective_rate).min(MAX_ETA)
        };

        self.last_eta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn eta_follows_processing_rate() {
        let mut eta = SyncerEtaCalculator::new(0, 1_000, 60.);
        tokio::time::advance(Duration::from_secs(1)).await;
        // 100 blocks/s against a static tip: 900 remaining
        assert_eq!(eta.calculate(100, 1_000), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn falling_behind_maxes_out() {
        let mut eta = SyncerEtaCalculator::new(0, 100, 60.);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(eta.calculate(10, 200), MAX_ETA);
    }

    #[tokio::test(start_paused = true)]
    async fn caught_up_is_zero() {
        let mut eta = SyncerEtaCalculator::new(0, 10, 60.);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(eta.calculate(10, 10), Duration::ZERO);
    }
}
