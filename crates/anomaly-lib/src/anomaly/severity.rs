//! Severity tiers for fired anomalies

use crate::models::Severity;

/// `fused / threshold` at or above which a fired anomaly is medium
pub const MEDIUM_RATIO: f64 = 1.3;

/// `fused / threshold` at or above which a fired anomaly is high
pub const HIGH_RATIO: f64 = 1.8;

/// Maps a fired score to a severity tier
#[derive(Debug, Clone, Copy, Default)]
pub struct SeverityClassifier;

impl SeverityClassifier {
    /// Classify `fused` relative to a positive `threshold`
    pub fn classify(fused: f64, threshold: f64) -> Severity {
        let ratio = fused / threshold;
        if ratio >= HIGH_RATIO {
            Severity::High
        } else if ratio >= MEDIUM_RATIO {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(SeverityClassifier::classify(0.55, 0.55), Severity::Low);
        assert_eq!(SeverityClassifier::classify(0.65, 0.5), Severity::Medium);
        assert_eq!(SeverityClassifier::classify(0.89, 0.5), Severity::Medium);
        assert_eq!(SeverityClassifier::classify(0.9, 0.5), Severity::High);
        assert_eq!(SeverityClassifier::classify(1.0, 0.55), Severity::High);
    }

    #[test]
    fn test_monotonic_in_fused() {
        for threshold in [0.35, 0.45, 0.55, 0.65, 0.75] {
            let mut prev = Severity::Low;
            for step in 0..=1000 {
                let fused = step as f64 / 1000.0;
                let tier = SeverityClassifier::classify(fused, threshold);
                assert!(tier >= prev, "tier dropped at fused={fused} threshold={threshold}");
                prev = tier;
            }
        }
    }
}
