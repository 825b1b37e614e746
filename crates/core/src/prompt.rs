use crate::aggregator::AggregatedScores;
use crate::session::Domain;
use std::fmt::Write;

pub const DEFAULT_EXCERPT_CHARS: usize = 12_000;
const TRUNCATION_MARKER: &str = "\n[transcript truncated]";
const NO_TRANSCRIPT: &str = "(no transcript available)";

const PLACEHOLDERS: [&str; 4] = ["topic", "language", "scores", "transcript"];
const REQUIRED: [&str; 2] = ["transcript", "scores"];

pub const DEFAULT_TEMPLATE: &str = r#"You are an expert pedagogical coach and technical reviewer.
Evaluate the teacher of this recorded session using the transcript and the computed scores.

Session details:
- Topic: {topic}
- Language: {language}
- Scores (0-100):
{scores}

Transcript:
"""
{transcript}
"""

Produce a JSON report with these fields:
1. performance_summary: a 2-3 sentence summary of the session, addressed to the teacher.
2. teaching_style: classify the style (for example Authoritative, Facilitator, Demonstrator, Hybrid) with a one-sentence explanation.
3. strengths: 3 key strengths grounded in the scores and transcript.
4. weaknesses: 3 areas for improvement grounded in the scores and transcript.
5. factual_accuracy_audit: corrections for technical errors relative to the topic, or ["No errors found"].
6. content_metadata.titles: 3 catchy titles for this lesson.
7. content_metadata.hashtags: 5 relevant hashtags.
8. multilingual_feedback: if the language is not English, the performance_summary translated into it; otherwise null.

Be constructive and specific. Scores marked unavailable could not be measured; do not treat them as zero.

Return ONLY the raw JSON object, with no markdown and no commentary:
{
  "performance_summary": "...",
  "teaching_style": { "style": "...", "explanation": "..." },
  "strengths": ["...", "...", "..."],
  "weaknesses": ["...", "...", "..."],
  "factual_accuracy_audit": ["..."],
  "content_metadata": { "titles": ["..."], "hashtags": ["..."] },
  "multilingual_feedback": null
}
"#;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("feedback prompt is missing the {{{0}}} placeholder")]
    MissingPlaceholder(&'static str),
}

/// Values substituted into a [`PromptTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub topic: &'a str,
    pub language: &'a str,
    pub scores: &'a str,
    pub transcript: &'a str,
}

/// A feedback prompt with `{topic}`, `{language}`, `{scores}` and
/// `{transcript}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn parse(text: impl Into<String>) -> Result<Self, PromptError> {
        let text = text.into();
        for name in REQUIRED {
            if !text.contains(&format!("{{{name}}}")) {
                return Err(PromptError::MissingPlaceholder(name));
            }
        }
        Ok(Self { text })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Substitutes every placeholder in one left-to-right pass. Text coming
    /// from the context is never scanned again, so a transcript that happens
    /// to contain `{scores}` stays as spoken.
    pub fn render(&self, ctx: &PromptContext<'_>) -> String {
        let mut out =
            String::with_capacity(self.text.len() + ctx.transcript.len() + ctx.scores.len());
        let mut rest = self.text.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let matched = PLACEHOLDERS.iter().find(|name| {
                after
                    .strip_prefix(**name)
                    .is_some_and(|tail| tail.starts_with('}'))
            });
            match matched {
                Some(name) => {
                    out.push_str(match *name {
                        "topic" => ctx.topic,
                        "language" => ctx.language,
                        "scores" => ctx.scores,
                        _ => ctx.transcript,
                    });
                    rest = &after[name.len() + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Caps a transcript at `max_chars` characters, marking the cut.
pub fn transcript_excerpt(transcript: Option<&str>, max_chars: usize) -> String {
    let Some(text) = transcript.map(str::trim).filter(|t| !t.is_empty()) else {
        return NO_TRANSCRIPT.to_string();
    };
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// One line per domain. Failed domains read as unavailable so the model does
/// not mistake missing data for a zero score.
pub fn score_summary(scores: &AggregatedScores) -> String {
    let mut out = String::new();
    for domain in Domain::ALL {
        let _ = write!(out, "- {}: ", domain.title());
        if scores.is_failed(domain) {
            out.push_str("unavailable\n");
            continue;
        }
        let metrics = scores
            .record
            .domain(domain)
            .map(|metrics| {
                metrics
                    .iter()
                    .map(|(name, value)| format!("{name} {value:.1}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        let _ = writeln!(out, "{metrics}");
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::error::ScorerError;
    use std::collections::BTreeMap;

    fn ctx<'a>(transcript: &'a str) -> PromptContext<'a> {
        PromptContext {
            topic: "Fractions",
            language: "English",
            scores: "- Audio: clarity_score 72.0",
            transcript,
        }
    }

    #[test]
    fn default_template_is_valid() {
        let parsed = PromptTemplate::parse(DEFAULT_TEMPLATE).unwrap();
        assert_eq!(parsed, PromptTemplate::default());
    }

    #[test]
    fn template_without_transcript_is_rejected() {
        assert_eq!(
            PromptTemplate::parse("Scores: {scores}"),
            Err(PromptError::MissingPlaceholder("transcript"))
        );
        assert_eq!(
            PromptTemplate::parse("Transcript: {transcript}"),
            Err(PromptError::MissingPlaceholder("scores"))
        );
    }

    #[test]
    fn renders_all_placeholders() {
        let template =
            PromptTemplate::parse("{topic}|{language}|{scores}|{transcript}|{unknown}").unwrap();
        let rendered = template.render(&ctx("hello class"));
        assert_eq!(
            rendered,
            "Fractions|English|- Audio: clarity_score 72.0|hello class|{unknown}"
        );
    }

    #[test]
    fn transcript_placeholders_are_not_expanded_again() {
        let template = PromptTemplate::parse("T: {transcript} S: {scores}").unwrap();
        let rendered = template.render(&ctx("write {scores} on the board {"));
        assert_eq!(
            rendered,
            "T: write {scores} on the board { S: - Audio: clarity_score 72.0"
        );
    }

    #[test]
    fn json_braces_in_template_survive() {
        let rendered = PromptTemplate::default().render(&ctx("hi"));
        assert!(rendered.contains(r#""teaching_style": { "style": "...", "explanation": "..." }"#));
        assert!(rendered.contains("- Topic: Fractions"));
    }

    #[test]
    fn excerpt_is_cut_on_char_boundary() {
        let text = "é".repeat(10);
        let excerpt = transcript_excerpt(Some(&text), 4);
        assert_eq!(excerpt, format!("éééé{TRUNCATION_MARKER}"));

        assert_eq!(transcript_excerpt(Some("short"), 100), "short");
        assert_eq!(transcript_excerpt(None, 100), NO_TRANSCRIPT);
        assert_eq!(transcript_excerpt(Some("   "), 100), NO_TRANSCRIPT);
    }

    #[test]
    fn failed_domains_read_as_unavailable() {
        let scores = aggregate(BTreeMap::from([
            (
                Domain::Audio,
                Ok(BTreeMap::from([("clarity_score".to_string(), 72.0)])),
            ),
            (
                Domain::Video,
                Err(ScorerError::StreamUnavailable(Domain::Video)),
            ),
        ]));

        let summary = score_summary(&scores);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(
            lines,
            vec![
                "- Audio: clarity_score 72.0, confidence_score 0.0, speech_ratio 0.0",
                "- Video: unavailable",
                "- Text: unavailable",
            ]
        );
    }
}
