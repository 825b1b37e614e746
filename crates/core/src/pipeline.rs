//! Drives one session from recording to report and streams progress.
//!
//! Each call to [`SessionPipeline::run_session`] spawns a task that owns the
//! whole run. The caller observes it through a [`SessionRun`], a finite
//! stream of [`PipelineState`] values ending in `Complete` or `Failed`.

use crate::aggregator::aggregate;
use crate::error::{ErrorKind, ScorerError};
use crate::ingest::{Ingestor, StreamsBundle};
use crate::media::MediaDecoder;
use crate::report::{
    Diagnostics, RecordingSummary, SessionMeta, SessionReport, SynthesisFailure, assemble,
};
use crate::scorers::{MetricsMap, Scorer, TextScorer, default_scorers};
use crate::session::{Domain, SessionInput};
use crate::synthesizer::FeedbackSynthesizer;
use chrono::Utc;
use futures::Stream;
use futures::stream::{FusedStream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;
use uuid::Uuid;

/// Room for every state a run can publish, so the task never waits on the
/// caller.
const STATE_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Validating,
    Analyzing,
    Synthesizing,
    Complete(Box<SessionReport>),
    Failed { kind: ErrorKind, message: String },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Complete(_) | PipelineState::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Validating => "validating",
            PipelineState::Analyzing => "analyzing",
            PipelineState::Synthesizing => "synthesizing",
            PipelineState::Complete(_) => "complete",
            PipelineState::Failed { .. } => "failed",
        }
    }

    pub fn progress_percent(&self) -> u8 {
        match self {
            PipelineState::Idle => 0,
            PipelineState::Validating => 10,
            PipelineState::Analyzing => 40,
            PipelineState::Synthesizing => 80,
            PipelineState::Complete(_) => 100,
            PipelineState::Failed { .. } => 0,
        }
    }
}

/// A run that ended in `Failed`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RunFailed {
    pub kind: ErrorKind,
    pub message: String,
}

/// Long-lived pipeline configuration. Holds no per-run state, so any number
/// of runs may be in flight at once.
#[derive(Clone)]
pub struct SessionPipeline {
    ingestor: Arc<Ingestor>,
    scorers: Vec<Arc<dyn Scorer>>,
    synthesizer: Arc<FeedbackSynthesizer>,
    topics: Arc<TextScorer>,
}

impl SessionPipeline {
    /// A pipeline with the built-in audio, video and text scorers.
    pub fn new(decoder: Arc<dyn MediaDecoder>, synthesizer: FeedbackSynthesizer) -> Self {
        Self {
            ingestor: Arc::new(Ingestor::new(decoder)),
            scorers: default_scorers(),
            synthesizer: Arc::new(synthesizer),
            topics: Arc::new(TextScorer::default()),
        }
    }

    pub fn with_scorers(mut self, scorers: Vec<Arc<dyn Scorer>>) -> Self {
        self.scorers = scorers;
        self
    }

    /// Starts a run on the current tokio runtime.
    pub fn run_session(&self, input: SessionInput) -> SessionRun {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(STATE_CHANNEL_CAPACITY);
        // The channel is empty and sized for a whole run.
        let _ = tx.try_send(PipelineState::Idle);

        let span = tracing::info_span!("session", id = %session_id, topic = input.topic_label());
        let task = tokio::spawn(
            drive(self.clone(), input, session_id, Publisher { tx }).instrument(span),
        );

        SessionRun {
            session_id,
            rx,
            task,
            finished: false,
        }
    }
}

/// The caller dropped its [`SessionRun`].
struct Abandoned;

struct Publisher {
    tx: mpsc::Sender<PipelineState>,
}

impl Publisher {
    async fn publish(&self, state: PipelineState) -> Result<(), Abandoned> {
        match &state {
            PipelineState::Failed { kind, message } => {
                tracing::error!("Pipeline failed ({kind}): {message}");
            }
            other => tracing::info!("Pipeline state: {}", other.label()),
        }
        self.tx.send(state).await.map_err(|_| {
            tracing::info!("Progress receiver dropped, stopping run");
            Abandoned
        })
    }
}

async fn drive(
    pipeline: SessionPipeline,
    input: SessionInput,
    session_id: Uuid,
    publisher: Publisher,
) -> Result<(), Abandoned> {
    // --- 1. Validate and ingest ---
    publisher.publish(PipelineState::Validating).await?;
    let bundle = match pipeline.ingestor.ingest(&input).await {
        Ok(bundle) => bundle,
        Err(e) => {
            return publisher
                .publish(PipelineState::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                })
                .await;
        }
    };

    // --- 2. Score every domain ---
    publisher.publish(PipelineState::Analyzing).await?;
    let results = score_all(&pipeline.scorers, &bundle, input.topic_label()).await;
    let scores = aggregate(results);

    let recording = RecordingSummary {
        path: bundle.recording.clone(),
        duration_secs: bundle.info.duration_secs,
        has_audio: bundle.audio.is_some(),
        has_video: bundle.video.is_some(),
        transcript_source: bundle.transcript.as_ref().map(|t| t.source.clone()),
    };
    let transcript = bundle.transcript.clone();
    let topic_coverage = transcript
        .as_deref()
        .and_then(|t| pipeline.topics.topic_coverage(&t.text, input.topic_label()));
    // Decoded media is not needed past scoring.
    drop(bundle);

    // --- 3. Synthesize feedback ---
    publisher.publish(PipelineState::Synthesizing).await?;
    let synthesis = pipeline
        .synthesizer
        .synthesize(
            transcript.as_deref().map(|t| t.text.as_str()),
            &scores,
            input.topic_label(),
            input.language(),
        )
        .await;
    let (feedback, synthesis_failure) = match synthesis {
        Ok(feedback) => (Some(feedback), None),
        Err(e) => {
            tracing::warn!("Continuing without feedback: {e}");
            (None, Some(SynthesisFailure::from(&e)))
        }
    };

    // --- 4. Assemble the report ---
    let meta = SessionMeta {
        session_id,
        topic: input.topic_label().to_string(),
        language: input.language().map(str::to_string),
        generated_at: Utc::now(),
        recording,
    };
    let diagnostics = Diagnostics {
        scorer_failures: scores.failures,
        synthesis: synthesis_failure,
        topic_coverage,
    };
    let report = assemble(meta, scores.record, feedback, diagnostics);
    publisher
        .publish(PipelineState::Complete(Box::new(report)))
        .await
}

/// Runs every scorer on the blocking pool. A scorer whose stream is missing,
/// that errors or that panics yields an error for its domain only.
async fn score_all(
    scorers: &[Arc<dyn Scorer>],
    bundle: &StreamsBundle,
    topic: &str,
) -> BTreeMap<Domain, Result<MetricsMap, ScorerError>> {
    let mut results = BTreeMap::new();
    let mut tasks = JoinSet::new();

    for scorer in scorers {
        let domain = scorer.domain();
        let Some(stream) = bundle.stream(domain) else {
            results.insert(domain, Err(ScorerError::StreamUnavailable(domain)));
            continue;
        };
        let scorer = Arc::clone(scorer);
        let topic = topic.to_string();
        tasks.spawn_blocking(move || {
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| scorer.score(&stream, &topic)));
            let result = outcome.unwrap_or_else(|panic| {
                Err(ScorerError::Panicked {
                    domain,
                    detail: panic_message(panic.as_ref()),
                })
            });
            (domain, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((domain, result)) => {
                if let Ok(metrics) = &result {
                    tracing::debug!("{domain} scored: {metrics:?}");
                }
                results.insert(domain, result);
            }
            Err(e) => tracing::error!("Scorer task did not finish: {e}"),
        }
    }
    results
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Progress of one run.
///
/// Yields each state once, in order, and ends after the first terminal
/// state. Dropping it aborts the run.
pub struct SessionRun {
    session_id: Uuid,
    rx: mpsc::Receiver<PipelineState>,
    task: JoinHandle<Result<(), Abandoned>>,
    finished: bool,
}

impl SessionRun {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub async fn next_state(&mut self) -> Option<PipelineState> {
        self.next().await
    }

    /// Drains the run and returns its report.
    pub async fn into_report(mut self) -> Result<SessionReport, RunFailed> {
        while let Some(state) = self.next().await {
            match state {
                PipelineState::Complete(report) => return Ok(*report),
                PipelineState::Failed { kind, message } => return Err(RunFailed { kind, message }),
                _ => {}
            }
        }
        Err(RunFailed {
            kind: ErrorKind::Internal,
            message: "run already finished".to_string(),
        })
    }
}

impl Stream for SessionRun {
    type Item = PipelineState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(state)) => {
                self.finished = state.is_terminal();
                Poll::Ready(Some(state))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(PipelineState::Failed {
                    kind: ErrorKind::Internal,
                    message: "pipeline task ended without a result".to_string(),
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedStream for SessionRun {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

impl Drop for SessionRun {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, SynthesisError};
    use crate::feedback::TeachingStyle;
    use crate::ingest::SessionStream;
    use crate::media::{AudioStream, MediaInfo, MockMediaDecoder, VideoStream};
    use crate::synthesizer::{FeedbackModel, MockFeedbackModel};
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    const FIXTURE: &str = r##"{"performance_summary":"Good pacing","strengths":["clear examples"],"weaknesses":["low engagement"],"teaching_style":{"style":"Socratic","explanation":"frequent questions"},"content_metadata":{"titles":["Intro to X"],"hashtags":["#teaching"]}}"##;

    /// Reports fixed metrics, or a fixed error.
    struct FixtureScorer {
        domain: Domain,
        result: Result<MetricsMap, ScorerError>,
    }

    impl FixtureScorer {
        fn ok(domain: Domain, metrics: &[(&str, f64)]) -> Arc<dyn Scorer> {
            Arc::new(Self {
                domain,
                result: Ok(metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect()),
            })
        }
    }

    impl Scorer for FixtureScorer {
        fn domain(&self) -> Domain {
            self.domain
        }

        fn score(&self, _stream: &SessionStream, _topic: &str) -> Result<MetricsMap, ScorerError> {
            self.result.clone()
        }
    }

    struct PanickingScorer;

    impl Scorer for PanickingScorer {
        fn domain(&self) -> Domain {
            Domain::Video
        }

        fn score(&self, _stream: &SessionStream, _topic: &str) -> Result<MetricsMap, ScorerError> {
            panic!("frame buffer exploded")
        }
    }

    fn audio_scorer() -> Arc<dyn Scorer> {
        FixtureScorer::ok(
            Domain::Audio,
            &[("clarity_score", 72.0), ("confidence_score", 68.0), ("speech_ratio", 55.0)],
        )
    }

    fn video_scorer() -> Arc<dyn Scorer> {
        FixtureScorer::ok(Domain::Video, &[("engagement_score", 61.0), ("gesture_index", 42.0)])
    }

    fn text_scorer() -> Arc<dyn Scorer> {
        FixtureScorer::ok(
            Domain::Text,
            &[("technical_depth", 80.0), ("interaction_index", 47.0), ("topic_relevance", 90.0)],
        )
    }

    /// A two-minute recording with a sidecar transcript.
    fn recording() -> (TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lesson.mp4");
        fs::write(&path, b"not really a video").unwrap();
        fs::write(
            dir.path().join("lesson.txt"),
            "Today we look at fractions. What is one half plus one half?",
        )
        .unwrap();
        (dir, path)
    }

    fn decoder() -> Arc<dyn MediaDecoder> {
        let mut decoder = MockMediaDecoder::new();
        decoder.expect_probe().returning(|_: &Path| {
            Ok(MediaInfo {
                duration_secs: Some(120.0),
                has_audio: true,
                has_video: true,
                width: Some(1280),
                height: Some(720),
            })
        });
        decoder.expect_decode_audio().returning(|_: &Path| {
            Ok(AudioStream {
                samples: vec![0.0; 16_000],
                sample_rate: 16_000,
            })
        });
        decoder.expect_decode_video().returning(|_: &Path| {
            Ok(VideoStream {
                frames: vec![vec![0; 4]; 3],
                width: 2,
                height: 2,
                frame_rate: 2.0,
            })
        });
        Arc::new(decoder)
    }

    fn model_answering(answer: &'static str) -> Arc<dyn FeedbackModel> {
        let mut model = MockFeedbackModel::new();
        model.expect_is_configured().return_const(true);
        model
            .expect_generate()
            .times(1)
            .returning(move |_| Ok(answer.to_string()));
        Arc::new(model)
    }

    fn pipeline(model: Arc<dyn FeedbackModel>) -> SessionPipeline {
        SessionPipeline::new(decoder(), FeedbackSynthesizer::new(model))
            .with_scorers(vec![audio_scorer(), video_scorer(), text_scorer()])
    }

    async fn collect(run: SessionRun) -> Vec<PipelineState> {
        run.collect().await
    }

    fn labels(states: &[PipelineState]) -> Vec<&'static str> {
        states.iter().map(PipelineState::label).collect()
    }

    fn complete_report(states: &[PipelineState]) -> &SessionReport {
        match states.last() {
            Some(PipelineState::Complete(report)) => report.as_ref(),
            other => panic!("run did not complete: {other:?}"),
        }
    }

    #[tokio::test]
    async fn end_to_end_fixture_session() {
        let (_dir, path) = recording();
        let run = pipeline(model_answering(FIXTURE))
            .run_session(SessionInput::new(&path).with_topic("Fractions"));
        let states = collect(run).await;

        assert_eq!(
            labels(&states),
            vec!["idle", "validating", "analyzing", "synthesizing", "complete"]
        );
        let percents: Vec<u8> = states.iter().map(PipelineState::progress_percent).collect();
        assert_eq!(percents, vec![0, 10, 40, 80, 100]);

        let report = complete_report(&states);
        assert_eq!(report.scores.metric(Domain::Audio, "clarity_score"), 72.0);
        assert_eq!(report.scores.metric(Domain::Video, "engagement_score"), 61.0);
        assert_eq!(report.scores.metric(Domain::Text, "technical_depth"), 80.0);
        assert!(report.diagnostics.scorer_failures.is_empty());
        assert!(report.diagnostics.synthesis.is_none());
        let coverage = report.diagnostics.topic_coverage.as_ref().unwrap();
        assert_eq!(coverage.matched, vec!["fractions".to_string()]);
        assert!(coverage.missed.is_empty());
        assert_eq!(report.recording.duration_secs, Some(120.0));
        assert!(report.recording.transcript_source.is_some());

        let feedback = report.feedback.as_ref().unwrap();
        assert_eq!(feedback.performance_summary, "Good pacing");
        assert_eq!(feedback.strengths, vec!["clear examples"]);
        assert_eq!(feedback.weaknesses, vec!["low engagement"]);
        assert_eq!(
            feedback.teaching_style,
            TeachingStyle::Classified {
                style: "Socratic".into(),
                explanation: "frequent questions".into()
            }
        );
        assert_eq!(feedback.content_metadata.titles, vec!["Intro to X"]);
        assert_eq!(feedback.content_metadata.hashtags, vec!["#teaching"]);
    }

    #[tokio::test]
    async fn one_failing_scorer_degrades_only_its_domain() {
        let (_dir, path) = recording();
        let failing: Arc<dyn Scorer> = Arc::new(FixtureScorer {
            domain: Domain::Video,
            result: Err(ScorerError::insufficient(Domain::Video, "1 usable frame(s)")),
        });
        let pipeline = SessionPipeline::new(
            decoder(),
            FeedbackSynthesizer::new(model_answering(FIXTURE)),
        )
        .with_scorers(vec![audio_scorer(), failing, text_scorer()]);

        let states = collect(pipeline.run_session(SessionInput::new(&path))).await;
        let report = complete_report(&states);

        for name in Domain::Video.metric_names() {
            assert_eq!(report.scores.metric(Domain::Video, name), 0.0);
        }
        assert!(report.is_domain_failed(Domain::Video));
        assert_eq!(report.scores.metric(Domain::Audio, "clarity_score"), 72.0);
        assert_eq!(report.scores.metric(Domain::Text, "technical_depth"), 80.0);
        assert!(report.feedback.is_some());
    }

    #[tokio::test]
    async fn panicking_scorer_is_contained() {
        let (_dir, path) = recording();
        let pipeline = pipeline(model_answering(FIXTURE))
            .with_scorers(vec![audio_scorer(), Arc::new(PanickingScorer), text_scorer()]);

        let report = pipeline.run_session(SessionInput::new(&path)).into_report().await.unwrap();
        let reason = &report.diagnostics.scorer_failures[&Domain::Video];
        assert!(reason.contains("frame buffer exploded"), "{reason}");
    }

    #[tokio::test]
    async fn empty_reference_fails_before_analysis() {
        let mut model = MockFeedbackModel::new();
        model.expect_is_configured().never();
        model.expect_generate().never();
        let pipeline = pipeline(Arc::new(model));

        let states = collect(pipeline.run_session(SessionInput::new(""))).await;

        assert_eq!(labels(&states), vec!["idle", "validating", "failed"]);
        assert!(matches!(
            states.last(),
            Some(PipelineState::Failed { kind: ErrorKind::InvalidInput, .. })
        ));
    }

    #[tokio::test]
    async fn undecodable_recording_fails() {
        let (_dir, path) = recording();
        let mut decoder = MockMediaDecoder::new();
        decoder
            .expect_probe()
            .returning(|_: &Path| Err(DecodeError::Malformed("no streams".into())));
        let pipeline = SessionPipeline::new(
            Arc::new(decoder),
            FeedbackSynthesizer::new(Arc::new(MockFeedbackModel::new())),
        );

        let err = pipeline.run_session(SessionInput::new(&path)).into_report().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn missing_credential_still_completes() {
        let (_dir, path) = recording();
        let mut model = MockFeedbackModel::new();
        model.expect_is_configured().return_const(false);
        model.expect_generate().never();

        let report = pipeline(Arc::new(model))
            .run_session(SessionInput::new(&path))
            .into_report()
            .await
            .unwrap();

        assert!(report.feedback.is_none());
        assert_eq!(
            report.diagnostics.synthesis.as_ref().map(|s| s.kind),
            Some(ErrorKind::ModelUnavailable)
        );
        assert_eq!(report.scores.metric(Domain::Audio, "clarity_score"), 72.0);
        assert!(report.view().feedback.contains("unavailable"));
    }

    #[tokio::test]
    async fn malformed_model_output_keeps_raw_text() {
        let (_dir, path) = recording();
        let truncated = &FIXTURE[..60];
        let report = pipeline(model_answering(truncated))
            .run_session(SessionInput::new(&path))
            .into_report()
            .await
            .unwrap();

        assert!(report.feedback.is_none());
        let failure = report.diagnostics.synthesis.as_ref().unwrap();
        assert_eq!(failure.kind, ErrorKind::SynthesisParse);
        assert_eq!(failure.raw_output.as_deref(), Some(truncated));
        assert_eq!(report.scores.metric(Domain::Video, "engagement_score"), 61.0);
    }

    struct SlowModel;

    #[async_trait]
    impl FeedbackModel for SlowModel {
        fn is_configured(&self) -> bool {
            true
        }

        async fn generate(&self, _prompt: &str) -> Result<String, SynthesisError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(FIXTURE.to_string())
        }
    }

    #[tokio::test]
    async fn model_timeout_still_completes() {
        let (_dir, path) = recording();
        let pipeline = SessionPipeline::new(
            decoder(),
            FeedbackSynthesizer::new(Arc::new(SlowModel)).with_timeout(Duration::from_millis(100)),
        )
        .with_scorers(vec![audio_scorer(), video_scorer(), text_scorer()]);

        let report = pipeline.run_session(SessionInput::new(&path)).into_report().await.unwrap();
        assert_eq!(
            report.diagnostics.synthesis.as_ref().map(|s| s.kind),
            Some(ErrorKind::ServiceTimeout)
        );
    }

    struct PanickingModel;

    #[async_trait]
    impl FeedbackModel for PanickingModel {
        fn is_configured(&self) -> bool {
            true
        }

        async fn generate(&self, _prompt: &str) -> Result<String, SynthesisError> {
            panic!("model client bug")
        }
    }

    #[tokio::test]
    async fn dead_task_ends_in_internal_failure() {
        let (_dir, path) = recording();
        let mut run = pipeline(Arc::new(PanickingModel)).run_session(SessionInput::new(&path));

        let mut states = Vec::new();
        while let Some(state) = run.next_state().await {
            states.push(state);
        }
        assert!(matches!(
            states.last(),
            Some(PipelineState::Failed { kind: ErrorKind::Internal, .. })
        ));
        assert_eq!(states.iter().filter(|s| s.is_terminal()).count(), 1);
        assert!(run.is_terminated());
        assert_eq!(run.next_state().await, None);
    }

    #[tokio::test]
    async fn dropping_one_run_leaves_others_alone() {
        let (_dir, path) = recording();
        let pipeline = SessionPipeline::new(
            decoder(),
            FeedbackSynthesizer::new(Arc::new(SlowModel)).with_timeout(Duration::from_millis(100)),
        )
        .with_scorers(vec![audio_scorer(), video_scorer(), text_scorer()]);

        let mut abandoned = pipeline.run_session(SessionInput::new(&path));
        let kept = pipeline.run_session(SessionInput::new(&path));
        assert_ne!(abandoned.session_id(), kept.session_id());

        assert_eq!(abandoned.next_state().await, Some(PipelineState::Idle));
        drop(abandoned);

        let report = kept.into_report().await.unwrap();
        assert_eq!(report.scores.metric(Domain::Audio, "clarity_score"), 72.0);
    }

    #[test]
    fn states_serialize_with_a_tag() {
        let json = serde_json::to_value(PipelineState::Analyzing).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "analyzing" }));

        let json = serde_json::to_value(PipelineState::Failed {
            kind: ErrorKind::InvalidInput,
            message: "recording not found".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "state": "failed",
                "kind": "invalid_input",
                "message": "recording not found"
            })
        );
    }
}
