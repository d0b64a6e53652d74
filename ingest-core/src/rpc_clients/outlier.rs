use std::time::Duration;

use itertools::Itertools;

/// Default maximum distance, in blocks, between a provider's reported height
/// and the mean of all reported heights.
pub const DEFAULT_OUTLIER_THRESHOLD: u64 = 5;

/// Result of probing one provider.
#[derive(Clone, Debug, PartialEq)]
pub struct HealthReport {
    /// Url of the probed provider
    pub url: String,
    /// Height reported by the provider, if the probe succeeded
    pub height: Option<u64>,
    /// How long the probe took
    pub latency: Option<Duration>,
    /// Whether the probe succeeded
    pub healthy: bool,
}

impl HealthReport {
    pub fn healthy(url: impl Into<String>, height: u64, latency: Duration) -> Self {
        Self {
            url: url.into(),
            height: Some(height),
            latency: Some(latency),
            healthy: true,
        }
    }

    pub fn unhealthy(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            height: None,
            latency: None,
            healthy: false,
        }
    }
}

/// Drop reports whose height is too far from the group mean.
///
/// Reports are sorted by height, highest first. While the report furthest
/// from the mean deviates by more than `threshold`, it is removed and the
/// mean recomputed over the remaining reports; on equal distance the lower
/// height goes first. Reports without a height never survive.
pub fn filter_outliers(reports: &[HealthReport], threshold: u64) -> Vec<&HealthReport> {
    let mut candidates = reports
        .iter()
        .filter(|r| r.height.is_some())
        .sorted_by(|a, b| b.height.cmp(&a.height))
        .collect::<Vec<_>>();

    while candidates.len() > 1 {
        let n = candidates.len() as i128;
        let sum: i128 = candidates.iter().map(|r| height_of(r) as i128).sum();
        // |h - sum/n| > threshold  <=>  |h*n - sum| > threshold*n
        let Some((idx, deviation)) = candidates
            .iter()
            .map(|r| (height_of(r) as i128 * n - sum).abs())
            .enumerate()
            .max_by(|(_, a), (_, b)| a.cmp(b))
        else {
            break;
        };
        if deviation <= threshold as i128 * n {
            break;
        }
        candidates.remove(idx);
    }

    candidates
}

fn height_of(report: &HealthReport) -> u64 {
    report.height.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reports(heights: &[u64]) -> Vec<HealthReport> {
        heights
            .iter()
            .enumerate()
            .map(|(i, h)| {
                HealthReport::healthy(format!("http://rpc{i}"), *h, Duration::from_millis(10))
            })
            .collect()
    }

    fn heights(reports: &[&HealthReport]) -> Vec<u64> {
        reports.iter().map(|r| r.height.unwrap()).collect()
    }

    #[test]
    fn drops_lagging_provider() {
        let reports = reports(&[100, 101, 100, 50]);
        let survivors = filter_outliers(&reports, DEFAULT_OUTLIER_THRESHOLD);
        assert_eq!(heights(&survivors), vec![101, 100, 100]);
        assert!(survivors.iter().all(|r| r.url != "http://rpc3"));
    }

    #[test]
    fn keeps_everyone_within_threshold() {
        let reports = reports(&[100, 104, 99]);
        let survivors = filter_outliers(&reports, DEFAULT_OUTLIER_THRESHOLD);
        assert_eq!(heights(&survivors), vec![104, 100, 99]);
    }

    #[test]
    fn prefers_higher_provider_when_two_disagree() {
        let reports = reports(&[50, 100]);
        let survivors = filter_outliers(&reports, DEFAULT_OUTLIER_THRESHOLD);
        assert_eq!(heights(&survivors), vec![100]);
    }

    #[test]
    fn ignores_reports_without_height() {
        let mut reports = reports(&[100, 101]);
        reports.push(HealthReport::unhealthy("http://down"));
        let survivors = filter_outliers(&reports, DEFAULT_OUTLIER_THRESHOLD);
        assert_eq!(survivors.len(), 2);
    }

    #[test]
    fn drops_forked_provider_ahead_of_the_group() {
        let reports = reports(&[1_000, 100, 101, 102]);
        let survivors = filter_outliers(&reports, DEFAULT_OUTLIER_THRESHOLD);
        assert_eq!(heights(&survivors), vec![102, 101, 100]);
    }
}
