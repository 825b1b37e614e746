use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Topic label used when the caller does not supply one.
pub const DEFAULT_TOPIC: &str = "General";

/// One of the three signal modalities of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Audio,
    Video,
    Text,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Audio, Domain::Video, Domain::Text];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Audio => "audio",
            Domain::Video => "video",
            Domain::Text => "text",
        }
    }

    /// The metrics every score record carries for this domain. A domain whose
    /// scorer failed still reports these names, each with a value of zero.
    pub fn metric_names(self) -> &'static [&'static str] {
        match self {
            Domain::Audio => &["clarity_score", "confidence_score", "speech_ratio"],
            Domain::Video => &["engagement_score", "gesture_index"],
            Domain::Text => &["technical_depth", "interaction_index", "topic_relevance"],
        }
    }

    /// Title-cased name used in rendered reports and prompts.
    pub fn title(self) -> &'static str {
        match self {
            Domain::Audio => "Audio",
            Domain::Video => "Video",
            Domain::Text => "Text",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to analyze one recorded teaching session.
///
/// Built once and never mutated afterwards; the `with_*` methods consume the
/// value and return a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInput {
    recording: PathBuf,
    topic: Option<String>,
    language: Option<String>,
    transcript: Option<PathBuf>,
}

impl SessionInput {
    pub fn new(recording: impl Into<PathBuf>) -> Self {
        Self {
            recording: recording.into(),
            ..Default::default()
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        self.topic = (!topic.trim().is_empty()).then_some(topic);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        let language = language.into();
        self.language = (!language.trim().is_empty()).then_some(language);
        self
    }

    /// Use an explicit transcript file instead of looking for a sidecar.
    pub fn with_transcript(mut self, transcript: impl Into<PathBuf>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    pub fn recording(&self) -> &Path {
        &self.recording
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// The topic label handed to scorers and the synthesizer.
    pub fn topic_label(&self) -> &str {
        self.topic.as_deref().unwrap_or(DEFAULT_TOPIC)
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn transcript(&self) -> Option<&Path> {
        self.transcript.as_deref()
    }
}
