//! Denormalized prediction summary stored on a content item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The latest successful prediction for a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastPrediction {
    /// Predicted virality score.
    pub score: f64,
    /// Suggested posting hours (UTC).
    #[serde(default)]
    pub best_hours_utc: Vec<u32>,
    /// Suggested hashtags.
    #[serde(default)]
    pub hashtags: Vec<String>,
    /// When the summary was produced.
    pub generated_at: DateTime<Utc>,
    /// The full executor result.
    pub raw: Value,
}

impl LastPrediction {
    /// Extract a summary from an executor result.
    ///
    /// Returns `None` unless `score` is present and numeric. Malformed
    /// optional fields are skipped rather than rejected.
    pub fn from_result(result: &Value, generated_at: DateTime<Utc>) -> Option<Self> {
        let score = result.get("score")?.as_f64()?;

        let best_hours_utc = result
            .get("best_hours_utc")
            .and_then(Value::as_array)
            .map(|hours| {
                hours
                    .iter()
                    .filter_map(Value::as_u64)
                    .filter_map(|h| u32::try_from(h).ok())
                    .collect()
            })
            .unwrap_or_default();

        let hashtags = result
            .get("hashtags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            score,
            best_hours_utc,
            hashtags,
            generated_at,
            raw: result.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_full_summary() {
        let result = json!({
            "score": 0.82,
            "best_hours_utc": [14, 18],
            "hashtags": ["#rust", "#async"],
        });
        let summary = LastPrediction::from_result(&result, Utc::now()).expect("summary");
        assert_eq!(summary.score, 0.82);
        assert_eq!(summary.best_hours_utc, vec![14, 18]);
        assert_eq!(summary.hashtags, vec!["#rust", "#async"]);
        assert_eq!(summary.raw, result);
    }

    #[test]
    fn test_requires_numeric_score() {
        assert!(LastPrediction::from_result(&json!({"raw": "text"}), Utc::now()).is_none());
        assert!(LastPrediction::from_result(&json!({"score": "high"}), Utc::now()).is_none());
    }

    #[test]
    fn test_integer_score_is_numeric() {
        let summary = LastPrediction::from_result(&json!({"score": 1}), Utc::now()).expect("summary");
        assert_eq!(summary.score, 1.0);
        assert!(summary.hashtags.is_empty());
    }
}
