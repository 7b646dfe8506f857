//! Threshold decision: what gets written to the cache for a classification.

use crate::classifier::Classification;
use crate::error::ClassifyError;

/// Sentinel written when the top prediction is not confident enough.
pub const BELOW_THRESHOLD: &str = "prediction below threshold";

/// Sentinel written when classification failed.
pub const PREDICTION_ERROR: &str = "prediction error";

/// Value stored in the cache for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// The classifier's label, confidence above the threshold.
    Label(String),
    /// Confidence at or below the threshold.
    BelowThreshold,
    /// The classifier failed.
    PredictionError,
}

impl CacheValue {
    /// Decides the cache value for a classification outcome.
    ///
    /// A label is kept only when `confidence > min_probability`; equality
    /// falls below the threshold.
    pub fn decide(result: &Result<Classification, ClassifyError>, min_probability: f64) -> Self {
        match result {
            Ok(classification) if classification.confidence > min_probability => {
                Self::Label(classification.label.clone())
            }
            Ok(_) => Self::BelowThreshold,
            Err(_) => Self::PredictionError,
        }
    }

    /// The string written to the cache.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Label(label) => label,
            Self::BelowThreshold => BELOW_THRESHOLD,
            Self::PredictionError => PREDICTION_ERROR,
        }
    }

    /// Short outcome name used for metrics labels.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Label(_) => "label",
            Self::BelowThreshold => "below_threshold",
            Self::PredictionError => "prediction_error",
        }
    }
}

impl std::fmt::Display for CacheValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(label: &str, confidence: f64) -> Result<Classification, ClassifyError> {
        Ok(Classification {
            label: label.to_string(),
            confidence,
        })
    }

    #[test]
    fn test_confident_label_is_kept() {
        let value = CacheValue::decide(&classified("cat", 0.92), 0.5);
        assert_eq!(value, CacheValue::Label("cat".to_string()));
        assert_eq!(value.as_str(), "cat");
    }

    #[test]
    fn test_low_confidence_is_sentinel() {
        let value = CacheValue::decide(&classified("cat", 0.30), 0.5);
        assert_eq!(value, CacheValue::BelowThreshold);
        assert_eq!(value.as_str(), "prediction below threshold");
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let value = CacheValue::decide(&classified("cat", 0.5), 0.5);
        assert_eq!(value, CacheValue::BelowThreshold);
    }

    #[test]
    fn test_error_is_sentinel() {
        let value = CacheValue::decide(&Err(ClassifyError::NoPrediction), 0.5);
        assert_eq!(value, CacheValue::PredictionError);
        assert_eq!(value.to_string(), "prediction error");
    }

    #[test]
    fn test_decision_grid() {
        for threshold in [0.0, 0.25, 0.5, 0.75, 0.99] {
            for step in 0..=100 {
                let confidence = step as f64 / 100.0;
                let value = CacheValue::decide(&classified("x", confidence), threshold);
                if confidence > threshold {
                    assert_eq!(value, CacheValue::Label("x".to_string()));
                } else {
                    assert_eq!(value, CacheValue::BelowThreshold);
                }
            }
        }
    }

    #[test]
    fn test_outcome_names() {
        assert_eq!(CacheValue::Label("a".into()).outcome(), "label");
        assert_eq!(CacheValue::BelowThreshold.outcome(), "below_threshold");
        assert_eq!(CacheValue::PredictionError.outcome(), "prediction_error");
    }
}
