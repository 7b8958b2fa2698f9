use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// The two-valued classification outcome. Nothing else is ever persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum Verdict {
    Real,
    Fake,
}

impl Verdict {
    /// Map a raw classifier label to a verdict.
    ///
    /// This is the only path from classifier output into a draft record;
    /// anything outside {Real, Fake} is rejected here, before any write.
    pub fn from_label(label: &str) -> Result<Self, StoreError> {
        match label.trim() {
            "Real" => Ok(Verdict::Real),
            "Fake" => Ok(Verdict::Fake),
            other => Err(StoreError::InvalidVerdict(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Real => "Real",
            Verdict::Fake => "Fake",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-populated draft record, ready to persist.
///
/// The store assigns `id` and `created_at` at save time; `byte_size` is
/// derived from the payload so it can never disagree with the stored blob.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    /// Internal name assigned to the upload (UUID-based).
    pub stored_name: String,
    /// User-supplied filename, unvalidated free text.
    pub original_name: String,
    /// Declared MIME type of the payload.
    pub content_type: String,
    /// Raw image payload; owned by the record once written.
    pub image_bytes: Vec<u8>,
    /// Classification verdict, already mapped from the classifier label.
    pub verdict: Verdict,
    /// Classifier confidence in [0.0, 1.0].
    pub confidence: f64,
    /// Wall-clock duration of the classification call in milliseconds.
    pub processing_time_ms: i64,
    /// Network origin of the request, if known.
    pub source_address: Option<String>,
}

impl NewAnalysis {
    pub fn byte_size(&self) -> i64 {
        self.image_bytes.len() as i64
    }
}

/// One row of the analysis history. Never carries the image payload;
/// `image_url` points at the blob endpoint instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub id: i64,
    pub stored_name: String,
    pub original_name: String,
    pub byte_size: i64,
    pub content_type: String,
    pub verdict: Verdict,
    pub confidence: f64,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
    /// Reference for fetching the blob separately.
    pub image_url: String,
}

/// Raw blob payload for a single record.
#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub original_name: String,
}

/// Aggregate statistics over all persisted records.
///
/// An empty store yields all-zero counts and means, never NaN, so display
/// code downstream stays total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AnalysisStats {
    pub total_analyses: i64,
    pub real_count: i64,
    pub fake_count: i64,
    pub avg_confidence: f64,
    pub avg_processing_time_ms: f64,
}

impl AnalysisStats {
    pub fn empty() -> Self {
        Self {
            total_analyses: 0,
            real_count: 0,
            fake_count: 0,
            avg_confidence: 0.0,
            avg_processing_time_ms: 0.0,
        }
    }
}

/// Build the blob reference embedded in listings.
pub fn image_url(id: i64) -> String {
    format!("/api/image/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_from_valid_labels() {
        assert_eq!(Verdict::from_label("Real").unwrap(), Verdict::Real);
        assert_eq!(Verdict::from_label("Fake").unwrap(), Verdict::Fake);
        assert_eq!(Verdict::from_label("  Fake \n").unwrap(), Verdict::Fake);
    }

    #[test]
    fn test_verdict_rejects_anything_else() {
        for label in ["real", "FAKE", "Maybe", "", "Real,0.9"] {
            match Verdict::from_label(label) {
                Err(StoreError::InvalidVerdict(_)) => {}
                other => panic!("expected InvalidVerdict for {label:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_verdict_serializes_as_label() {
        assert_eq!(serde_json::to_string(&Verdict::Real).unwrap(), "\"Real\"");
        assert_eq!(serde_json::to_string(&Verdict::Fake).unwrap(), "\"Fake\"");
    }

    #[test]
    fn test_byte_size_tracks_payload() {
        let draft = NewAnalysis {
            stored_name: "abc.png".to_string(),
            original_name: "cat.png".to_string(),
            content_type: "image/png".to_string(),
            image_bytes: vec![0u8; 1234],
            verdict: Verdict::Real,
            confidence: 0.9,
            processing_time_ms: 10,
            source_address: None,
        };
        assert_eq!(draft.byte_size(), 1234);
    }

    #[test]
    fn test_image_url_shape() {
        assert_eq!(image_url(42), "/api/image/42");
    }
}
