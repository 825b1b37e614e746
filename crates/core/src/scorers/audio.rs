use super::{MetricsMap, Scorer, to_score, unit, wrong_stream};
use crate::error::ScorerError;
use crate::ingest::SessionStream;
use crate::media::AudioStream;
use crate::session::Domain;

const FRAME_SECS: f64 = 0.025;
const MIN_DURATION_SECS: f64 = 1.0;
const SILENCE_DB: f64 = -120.0;
const CLIP_LEVEL: f32 = 0.99;

/// Scores delivery from frame loudness: how far speech sits above the room
/// noise, how steady it is, and how much of the session is spoken.
#[derive(Debug, Clone)]
pub struct AudioScorer {
    /// Margin above the noise floor for a frame to count as speech.
    pub voice_margin_db: f64,
    /// SNR at which clarity saturates.
    pub full_clarity_snr_db: f64,
}

impl Default for AudioScorer {
    fn default() -> Self {
        Self {
            voice_margin_db: 6.0,
            full_clarity_snr_db: 30.0,
        }
    }
}

impl Scorer for AudioScorer {
    fn domain(&self) -> Domain {
        Domain::Audio
    }

    fn score(&self, stream: &SessionStream, _topic: &str) -> Result<MetricsMap, ScorerError> {
        let SessionStream::Audio(audio) = stream else {
            return Err(wrong_stream(Domain::Audio, stream));
        };
        self.score_audio(audio)
    }
}

impl AudioScorer {
    pub fn score_audio(&self, audio: &AudioStream) -> Result<MetricsMap, ScorerError> {
        let duration = audio.duration_secs();
        if duration < MIN_DURATION_SECS {
            return Err(ScorerError::insufficient(
                Domain::Audio,
                format!("{duration:.2}s of audio"),
            ));
        }

        let frame_len = ((audio.sample_rate as f64 * FRAME_SECS) as usize).max(1);
        let levels: Vec<f64> = audio.samples.chunks(frame_len).map(frame_db).collect();

        let mut sorted = levels.clone();
        sorted.sort_by(f64::total_cmp);
        let noise_floor = percentile(&sorted, 0.10);
        let threshold = (noise_floor + self.voice_margin_db).max(-60.0);

        let voiced: Vec<f64> = levels.iter().copied().filter(|db| *db > threshold).collect();
        let speech_ratio = voiced.len() as f64 / levels.len() as f64;

        let clipped = audio.samples.iter().filter(|s| s.abs() >= CLIP_LEVEL).count();
        let clip_ratio = clipped as f64 / audio.samples.len() as f64;

        let (clarity, confidence) = if voiced.is_empty() {
            (0.0, 0.0)
        } else {
            let mut voiced_sorted = voiced.clone();
            voiced_sorted.sort_by(f64::total_cmp);
            let snr = percentile(&voiced_sorted, 0.5) - noise_floor;
            let clarity = unit(snr, self.full_clarity_snr_db) * (1.0 - unit(clip_ratio, 0.05));

            let mean = voiced.iter().sum::<f64>() / voiced.len() as f64;
            let variance =
                voiced.iter().map(|db| (db - mean).powi(2)).sum::<f64>() / voiced.len() as f64;
            // -40 dBFS reads as hesitant, -12 dBFS as projected.
            let loudness = unit(mean + 40.0, 28.0);
            let steadiness = 1.0 - unit(variance.sqrt(), 12.0);
            let fluency = unit(speech_ratio, 0.6);
            (clarity, 0.5 * loudness + 0.3 * steadiness + 0.2 * fluency)
        };

        tracing::debug!(
            "Audio: {} frames, noise floor {noise_floor:.1} dB, {:.0}% voiced",
            levels.len(),
            speech_ratio * 100.0
        );

        Ok(MetricsMap::from([
            ("clarity_score".to_string(), to_score(clarity)),
            ("confidence_score".to_string(), to_score(confidence)),
            ("speech_ratio".to_string(), to_score(speech_ratio)),
        ]))
    }
}

fn frame_db(frame: &[f32]) -> f64 {
    if frame.is_empty() {
        return SILENCE_DB;
    }
    let mean_square = frame.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / frame.len() as f64;
    let rms = mean_square.sqrt();
    if rms <= 1e-6 {
        SILENCE_DB
    } else {
        20.0 * rms.log10()
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return SILENCE_DB;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
