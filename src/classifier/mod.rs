//! Classifier adapter.
//!
//! The classification model is an external collaborator. Workers build one
//! [`Classifier`] when they connect and call it for every message for the
//! rest of their lifetime, so implementations must tolerate repeated calls
//! on a single instance.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;

pub use http::HttpClassifier;

/// A single prediction: a label and the model's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Predicted label.
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

impl Classification {
    /// Creates a classification, rejecting confidences outside [0, 1].
    pub fn new(label: impl Into<String>, confidence: f64) -> Result<Self, ClassifyError> {
        let label = label.into();
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ClassifyError::InvalidConfidence { label, confidence });
        }
        Ok(Self { label, confidence })
    }
}

/// Maps a payload to a label and confidence.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classifies one payload.
    async fn classify(&self, payload: &[u8]) -> Result<Classification, ClassifyError>;
}
