//! Pluggable object detection capability.
//!
//! The intake pipeline treats detection as a black box: any type that
//! implements [`Detector`] and returns `{label, confidence, bbox}` records
//! in pixel units can be plugged into the server. The built-in providers
//! are deliberately trivial; a real model would live behind the same trait.
//!
//! # Providers
//!
//! | Provider | Behaviour |
//! |----------|-----------|
//! | `stub` | Returns the configured fake detection for every frame |
//! | `none` | Returns no detections |
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use anyhow::Result;
//! use std::path::Path;
//! use garage_inventory::detector::Detector;
//! use garage_inventory::models::{BBox, RawDetection};
//!
//! pub struct ShelfDetector;
//!
//! #[async_trait]
//! impl Detector for ShelfDetector {
//!     fn name(&self) -> &str { "shelf" }
//!
//!     async fn detect(&self, _frame: &Path) -> Result<Vec<RawDetection>> {
//!         Ok(vec![RawDetection {
//!             label: "shelf".to_string(),
//!             confidence: 0.5,
//!             bbox: BBox::new(0.0, 0.0, 1.0, 1.0),
//!             barcode: None,
//!         }])
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::DetectorConfig;
use crate::models::{BBox, RawDetection};

/// An object detector invoked once per ingested frame.
///
/// Implementations must be `Send + Sync`; the server shares one instance
/// across all requests. Confidence values are expected in `[0, 1]` and
/// bounding boxes as `(x, y, w, h)` in pixels of the stored frame.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Provider name, used in logs.
    fn name(&self) -> &str;

    /// Run detection over the frame stored at `frame`.
    async fn detect(&self, frame: &Path) -> Result<Vec<RawDetection>>;
}

/// Returns the same fake detection for every frame.
pub struct StubDetector {
    detection: RawDetection,
}

impl StubDetector {
    pub fn new(detection: RawDetection) -> Self {
        Self { detection }
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new(RawDetection {
            label: "object".to_string(),
            confidence: 0.9,
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            barcode: None,
        })
    }
}

#[async_trait]
impl Detector for StubDetector {
    fn name(&self) -> &str {
        "stub"
    }

    async fn detect(&self, _frame: &Path) -> Result<Vec<RawDetection>> {
        Ok(vec![self.detection.clone()])
    }
}

/// Never detects anything.
pub struct NullDetector;

#[async_trait]
impl Detector for NullDetector {
    fn name(&self) -> &str {
        "none"
    }

    async fn detect(&self, _frame: &Path) -> Result<Vec<RawDetection>> {
        Ok(Vec::new())
    }
}

/// Builds the detector selected by `[detector].provider`.
///
/// The provider name is checked by config validation, so an unknown name
/// here falls back to the stub.
pub fn build_detector(config: &DetectorConfig) -> Arc<dyn Detector> {
    match config.provider.as_str() {
        "none" => Arc::new(NullDetector),
        _ => Arc::new(StubDetector::new(RawDetection {
            label: config.label.clone(),
            confidence: config.confidence,
            bbox: BBox::from(config.bbox),
            barcode: config.barcode.clone(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_returns_single_fake_detection() {
        let detector = StubDetector::default();
        let found = detector.detect(Path::new("missing.jpg")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label, "object");
        assert_eq!(found[0].confidence, 0.9);
        assert_eq!(found[0].bbox, BBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[tokio::test]
    async fn test_build_detector_uses_configured_label() {
        let config = DetectorConfig {
            label: "wrench".to_string(),
            barcode: Some("0123".to_string()),
            ..DetectorConfig::default()
        };
        let detector = build_detector(&config);
        assert_eq!(detector.name(), "stub");
        let found = detector.detect(Path::new("frame.jpg")).await.unwrap();
        assert_eq!(found[0].label, "wrench");
        assert_eq!(found[0].barcode.as_deref(), Some("0123"));
    }

    #[tokio::test]
    async fn test_none_provider_detects_nothing() {
        let config = DetectorConfig {
            provider: "none".to_string(),
            ..DetectorConfig::default()
        };
        let detector = build_detector(&config);
        assert!(detector.detect(Path::new("frame.jpg")).await.unwrap().is_empty());
    }
}
