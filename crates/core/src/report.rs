use crate::aggregator::ScoreRecord;
use crate::error::{ErrorKind, SynthesisError};
use crate::feedback::{FeedbackRecord, TeachingStyle};
use crate::scorers::TopicCoverage;
use crate::session::Domain;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::path::PathBuf;
use uuid::Uuid;

/// What was found in the recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub duration_secs: Option<f64>,
    pub has_audio: bool,
    pub has_video: bool,
    pub transcript_source: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl From<&SynthesisError> for SynthesisFailure {
    fn from(err: &SynthesisError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            raw_output: err.raw_output().map(str::to_string),
        }
    }
}

/// Everything that went wrong without stopping the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub scorer_failures: BTreeMap<Domain, String>,
    pub synthesis: Option<SynthesisFailure>,
    /// Topic terms the transcript did and did not mention.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_coverage: Option<TopicCoverage>,
}

/// Identity of a run, fixed by the pipeline before assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMeta {
    pub session_id: Uuid,
    pub topic: String,
    pub language: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub recording: RecordingSummary,
}

/// The final artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub topic: String,
    pub language: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub recording: RecordingSummary,
    pub scores: ScoreRecord,
    pub feedback: Option<FeedbackRecord>,
    pub diagnostics: Diagnostics,
}

/// Combines the run's outputs into a report. Pure and infallible.
pub fn assemble(
    meta: SessionMeta,
    scores: ScoreRecord,
    feedback: Option<FeedbackRecord>,
    diagnostics: Diagnostics,
) -> SessionReport {
    SessionReport {
        session_id: meta.session_id,
        topic: meta.topic,
        language: meta.language,
        generated_at: meta.generated_at,
        recording: meta.recording,
        scores,
        feedback,
        diagnostics,
    }
}

impl SessionReport {
    pub fn is_domain_failed(&self, domain: Domain) -> bool {
        self.diagnostics.scorer_failures.contains_key(&domain)
    }

    pub fn view(&self) -> ReportView {
        ReportView::from(self)
    }
}

/// Markdown rendering of a report, in three sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportView {
    pub summary: String,
    pub scores: String,
    pub feedback: String,
}

impl From<&SessionReport> for ReportView {
    fn from(report: &SessionReport) -> Self {
        Self {
            summary: render_summary(report),
            scores: render_scores(report),
            feedback: render_feedback(report),
        }
    }
}

impl fmt::Display for ReportView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\n{}\n\n{}", self.summary, self.scores, self.feedback)
    }
}

fn unavailable_reason(report: &SessionReport) -> String {
    match &report.diagnostics.synthesis {
        Some(failure) => {
            format!("_Coach feedback unavailable ({}): {}_", failure.kind, failure.message)
        }
        None => "_Coach feedback unavailable._".to_string(),
    }
}

fn render_summary(report: &SessionReport) -> String {
    let mut out = String::from("## Performance Summary\n");
    let _ = writeln!(out, "**Topic:** {}", report.topic);
    if let Some(duration) = report.recording.duration_secs {
        let _ = writeln!(out, "**Duration:** {:.0}s", duration);
    }
    out.push('\n');

    match &report.feedback {
        Some(feedback) => {
            let _ = writeln!(out, "{}\n", feedback.performance_summary.trim());
            match &feedback.teaching_style {
                TeachingStyle::Classified { style, explanation } => {
                    let _ = write!(out, "### Teaching Style: {style}\n{explanation}");
                }
                TeachingStyle::Freeform(text) => {
                    let _ = write!(out, "### Teaching Style\n{text}");
                }
            }
        }
        None => out.push_str(&unavailable_reason(report)),
    }
    out.trim_end().to_string()
}

fn render_scores(report: &SessionReport) -> String {
    let mut out = String::from("## Detailed Scores\n| Domain | Metric | Score |\n|---|---|---|\n");
    for domain in Domain::ALL {
        let failed = report.is_domain_failed(domain);
        let Some(metrics) = report.scores.domain(domain) else {
            continue;
        };
        for (name, value) in metrics {
            let cell = if failed {
                "unavailable".to_string()
            } else {
                format!("{value:.1}")
            };
            let _ = writeln!(out, "| {} | {} | {cell} |", domain.title(), metric_label(name));
        }
    }
    for (domain, reason) in &report.diagnostics.scorer_failures {
        let _ = writeln!(out, "\n_{} unavailable: {reason}_", domain.title());
    }
    if let Some(coverage) = &report.diagnostics.topic_coverage {
        let _ = writeln!(
            out,
            "\n**Topic terms mentioned:** {}",
            term_list(&coverage.matched)
        );
        let _ = writeln!(out, "**Topic terms not mentioned:** {}", term_list(&coverage.missed));
    }
    out.trim_end().to_string()
}

fn term_list(terms: &[String]) -> String {
    if terms.is_empty() {
        "(none)".to_string()
    } else {
        terms.join(", ")
    }
}

fn render_feedback(report: &SessionReport) -> String {
    let mut out = String::from("## Coach Feedback\n");
    let Some(feedback) = &report.feedback else {
        out.push_str(&unavailable_reason(report));
        return out;
    };

    push_list(&mut out, "### Strengths", &feedback.strengths);
    push_list(&mut out, "### Areas for Improvement", &feedback.weaknesses);
    if !feedback.factual_accuracy_audit.is_empty() {
        push_list(&mut out, "### Factual Accuracy", &feedback.factual_accuracy_audit);
    }
    push_list(&mut out, "### Titles", &feedback.content_metadata.titles);
    let _ = writeln!(
        out,
        "**Hashtags:** {}\n",
        feedback.content_metadata.hashtags.join(" ")
    );
    if let Some(translated) = &feedback.multilingual_feedback {
        let language = report.language.as_deref().unwrap_or("Translated");
        let _ = writeln!(out, "### {language} Summary\n{translated}");
    }
    out.trim_end().to_string()
}

fn push_list(out: &mut String, heading: &str, items: &[String]) {
    let _ = writeln!(out, "{heading}");
    if items.is_empty() {
        out.push_str("- (none)\n");
    }
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
    out.push('\n');
}

/// `clarity_score` reads as "Clarity Score".
fn metric_label(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
