use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

/// Number of latency samples kept per provider.
pub const LATENCY_SAMPLES: usize = 20;

/// Rolling health data of one provider, updated by every call.
#[derive(Debug, Default)]
pub struct ProviderHealth {
    latency_samples: Mutex<VecDeque<Duration>>,
    offline_since: Mutex<Option<SystemTime>>,
    last_reported_height: Mutex<Option<u64>>,
}

impl ProviderHealth {
    /// Push a latency sample, evicting the oldest one when full.
    pub fn record_latency(&self, latency: Duration) {
        let mut samples = self.latency_samples.lock();
        if samples.len() == LATENCY_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(latency);
    }

    /// Mean of the recorded samples
    pub fn latency(&self) -> Option<Duration> {
        let samples = self.latency_samples.lock();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<Duration>() / samples.len() as u32)
    }

    /// Number of samples currently held
    pub fn sample_count(&self) -> usize {
        self.latency_samples.lock().len()
    }

    /// When the provider was marked offline. Returns `true` if it was online
    /// before.
    pub fn set_offline(&self) -> bool {
        let mut offline = self.offline_since.lock();
        if offline.is_none() {
            *offline = Some(SystemTime::now());
            true
        } else {
            false
        }
    }

    /// Clear the offline marker. Returns `true` if it was set.
    pub fn set_online(&self) -> bool {
        self.offline_since.lock().take().is_some()
    }

    /// When the provider went offline, if it is offline
    pub fn offline_since(&self) -> Option<SystemTime> {
        *self.offline_since.lock()
    }

    /// Remember the latest height the provider reported
    pub fn record_height(&self, height: u64) {
        *self.last_reported_height.lock() = Some(height);
    }

    /// Latest height the provider reported
    pub fn last_reported_height(&self) -> Option<u64> {
        *self.last_reported_height.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_history_is_bounded() {
        let health = ProviderHealth::default();
        for ms in 0..(LATENCY_SAMPLES as u64 * 3) {
            health.record_latency(Duration::from_millis(ms));
        }
        assert_eq!(health.sample_count(), LATENCY_SAMPLES);
        // only the last 20 samples (40..60) remain
        assert_eq!(health.latency(), Some(Duration::from_micros(49_500)));
    }

    #[test]
    fn offline_marker_is_cleared_by_success() {
        let health = ProviderHealth::default();
        assert!(health.offline_since().is_none());
        assert!(health.set_offline());
        assert!(!health.set_offline());
        assert!(health.offline_since().is_some());
        assert!(health.set_online());
        assert!(health.offline_since().is_none());
    }
}
