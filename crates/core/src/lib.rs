pub mod aggregator;
pub mod error;
pub mod feedback;
pub mod ingest;
pub mod media;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod scorers;
pub mod session;
pub mod synthesizer;
pub mod transcript;

pub use aggregator::{AggregatedScores, ScoreRecord, aggregate};
pub use error::{DecodeError, ErrorKind, InvalidInputError, ScorerError, SynthesisError};
pub use feedback::{
    ContentMetadata, FeedbackRecord, TeachingStyle, parse_feedback, strip_code_fence,
};
pub use media::{FfmpegConfig, FfmpegDecoder, MediaDecoder};
pub use pipeline::{PipelineState, RunFailed, SessionPipeline, SessionRun};
pub use prompt::{PromptError, PromptTemplate};
pub use report::{Diagnostics, ReportView, SessionReport, assemble};
pub use session::{DEFAULT_TOPIC, Domain, SessionInput};
pub use synthesizer::{ChatCompletionsModel, FeedbackModel, FeedbackSynthesizer, ModelConfig};
