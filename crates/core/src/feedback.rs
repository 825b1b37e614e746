use crate::error::SynthesisError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured coaching feedback returned by the generative model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub performance_summary: String,
    pub teaching_style: TeachingStyle,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub content_metadata: ContentMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub factual_accuracy_audit: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multilingual_feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub titles: Vec<String>,
    pub hashtags: Vec<String>,
}

/// Models answer either with a classified style or with a plain sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TeachingStyle {
    Classified {
        style: String,
        #[serde(default)]
        explanation: String,
    },
    Freeform(String),
}

impl fmt::Display for TeachingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeachingStyle::Classified { style, explanation } if explanation.trim().is_empty() => {
                f.write_str(style)
            }
            TeachingStyle::Classified { style, explanation } => write!(f, "{style}: {explanation}"),
            TeachingStyle::Freeform(text) => f.write_str(text),
        }
    }
}

/// Removes one surrounding markdown code fence.
///
/// Supported forms are a leading "```json" or "```" and a trailing "```".
/// Anything else around the JSON is left alone and will fail to parse.
pub fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    text.trim()
}

/// Parses a model response into a [`FeedbackRecord`]. The raw text is kept
/// on failure so it can be surfaced in diagnostics.
pub fn parse_feedback(raw: &str) -> Result<FeedbackRecord, SynthesisError> {
    serde_json::from_str(strip_code_fence(raw)).map_err(|e| SynthesisError::Parse {
        reason: e.to_string(),
        raw: raw.to_string(),
    })
}
