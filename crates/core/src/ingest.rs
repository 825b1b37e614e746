use crate::error::InvalidInputError;
use crate::media::{AudioStream, MediaDecoder, MediaInfo, VideoStream};
use crate::session::{Domain, SessionInput};
use crate::transcript::{self, Transcript};
use std::path::PathBuf;
use std::sync::Arc;

/// One stream handed to a scorer. Cloning only bumps a reference count.
#[derive(Debug, Clone)]
pub enum SessionStream {
    Audio(Arc<AudioStream>),
    Video(Arc<VideoStream>),
    Transcript(Arc<Transcript>),
}

impl SessionStream {
    pub fn domain(&self) -> Domain {
        match self {
            SessionStream::Audio(_) => Domain::Audio,
            SessionStream::Video(_) => Domain::Video,
            SessionStream::Transcript(_) => Domain::Text,
        }
    }
}

/// Everything the ingestor extracted from one recording. Owned by a single
/// run and released when the run drops it.
#[derive(Debug, Clone)]
pub struct StreamsBundle {
    pub recording: PathBuf,
    pub info: MediaInfo,
    pub audio: Option<Arc<AudioStream>>,
    pub video: Option<Arc<VideoStream>>,
    pub transcript: Option<Arc<Transcript>>,
}

impl StreamsBundle {
    pub fn stream(&self, domain: Domain) -> Option<SessionStream> {
        match domain {
            Domain::Audio => self.audio.clone().map(SessionStream::Audio),
            Domain::Video => self.video.clone().map(SessionStream::Video),
            Domain::Text => self.transcript.clone().map(SessionStream::Transcript),
        }
    }

    pub fn transcript_text(&self) -> Option<&str> {
        self.transcript.as_deref().map(|t| t.text.as_str())
    }
}

/// Validates a [`SessionInput`] and turns it into addressable streams.
pub struct Ingestor {
    decoder: Arc<dyn MediaDecoder>,
}

impl Ingestor {
    pub fn new(decoder: Arc<dyn MediaDecoder>) -> Self {
        Self { decoder }
    }

    /// Fails only when the recording as a whole is unusable. A stream that
    /// cannot be decoded is left out of the bundle and its scorer fails alone.
    pub async fn ingest(&self, input: &SessionInput) -> Result<StreamsBundle, InvalidInputError> {
        let path = input.recording();
        if path.as_os_str().is_empty() {
            return Err(InvalidInputError::EmptyReference);
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(InvalidInputError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(InvalidInputError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if !metadata.is_file() {
            return Err(InvalidInputError::NotAFile(path.to_path_buf()));
        }
        if metadata.len() == 0 {
            return Err(InvalidInputError::EmptyFile(path.to_path_buf()));
        }

        let info = self
            .decoder
            .probe(path)
            .await
            .map_err(|e| InvalidInputError::Undecodable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !info.has_audio && !info.has_video {
            return Err(InvalidInputError::Undecodable {
                path: path.to_path_buf(),
                reason: "no audio or video stream".to_string(),
            });
        }
        tracing::info!(
            "Probed {}: audio={} video={} duration={:?}",
            path.display(),
            info.has_audio,
            info.has_video,
            info.duration_secs
        );

        let transcript = self.load_transcript(input).await?;

        let (audio, video) = tokio::join!(
            async {
                if !info.has_audio {
                    return None;
                }
                match self.decoder.decode_audio(path).await {
                    Ok(stream) => Some(Arc::new(stream)),
                    Err(e) => {
                        let path = path.display();
                        tracing::warn!("Audio stream of {path} could not be decoded: {e}");
                        None
                    }
                }
            },
            async {
                if !info.has_video {
                    return None;
                }
                match self.decoder.decode_video(path).await {
                    Ok(stream) => Some(Arc::new(stream)),
                    Err(e) => {
                        let path = path.display();
                        tracing::warn!("Video stream of {path} could not be decoded: {e}");
                        None
                    }
                }
            }
        );

        Ok(StreamsBundle {
            recording: path.to_path_buf(),
            info,
            audio,
            video,
            transcript: transcript.map(Arc::new),
        })
    }

    async fn load_transcript(
        &self,
        input: &SessionInput,
    ) -> Result<Option<Transcript>, InvalidInputError> {
        if let Some(explicit) = input.transcript() {
            return transcript::load_transcript(explicit)
                .await
                .map_err(|source| InvalidInputError::Unreadable {
                    path: explicit.to_path_buf(),
                    source,
                });
        }

        let found = transcript::load_sidecar(input.recording()).await;
        if found.is_none() {
            tracing::info!("No transcript found for {}", input.recording().display());
        }
        Ok(found)
    }
}
