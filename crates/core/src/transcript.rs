use std::path::{Path, PathBuf};

/// Sidecar extensions checked next to a recording, in priority order.
pub const SIDECAR_EXTENSIONS: [&str; 3] = ["txt", "srt", "vtt"];

/// Plain transcript text derived for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub source: PathBuf,
}

impl Transcript {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Existing `<stem>.txt`, `<stem>.srt` or `<stem>.vtt` files beside the
/// recording, in priority order.
pub fn sidecar_candidates(recording: &Path) -> Vec<PathBuf> {
    SIDECAR_EXTENSIONS
        .iter()
        .map(|ext| recording.with_extension(ext))
        .filter(|candidate| candidate != recording && candidate.is_file())
        .collect()
}

/// The first sidecar that holds any words. Blank or unreadable sidecars fall
/// through to the next candidate.
pub async fn load_sidecar(recording: &Path) -> Option<Transcript> {
    for candidate in sidecar_candidates(recording) {
        match load_transcript(&candidate).await {
            Ok(Some(transcript)) => return Some(transcript),
            Ok(None) => tracing::info!("Skipping blank transcript {}", candidate.display()),
            Err(e) => tracing::warn!("Ignoring unreadable transcript {}: {e}", candidate.display()),
        }
    }
    None
}

/// Reads a transcript file. Subtitle formats are flattened to their cue text.
/// Returns `Ok(None)` when the file holds no words.
pub async fn load_transcript(path: &Path) -> std::io::Result<Option<Transcript>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let is_subtitle = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("srt") || ext.eq_ignore_ascii_case("vtt"));

    let text = if is_subtitle {
        strip_subtitle_markup(&raw)
    } else {
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    };

    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(Transcript {
        text,
        source: path.to_path_buf(),
    }))
}

/// Keeps only the cue text of SRT/VTT content. Cue identifiers and timing
/// lines are dropped, as are the header, `NOTE`, `STYLE` and `REGION` blocks
/// of WebVTT input.
pub fn strip_subtitle_markup(raw: &str) -> String {
    let raw = raw.trim_start_matches('\u{feff}');
    let is_vtt = raw.trim_start().starts_with("WEBVTT");

    let mut text = Vec::new();
    let mut block = Vec::new();
    for line in raw.lines().map(str::trim).chain(std::iter::once("")) {
        if line.is_empty() {
            push_cue_text(&block, is_vtt, &mut text);
            block.clear();
        } else {
            block.push(line);
        }
    }
    text.join(" ")
}

fn push_cue_text<'a>(block: &[&'a str], is_vtt: bool, text: &mut Vec<&'a str>) {
    let Some(first) = block.first() else {
        return;
    };
    let keyword = first.split_whitespace().next().unwrap_or_default();
    if is_vtt && matches!(keyword, "WEBVTT" | "NOTE" | "STYLE" | "REGION") {
        return;
    }
    match block.iter().position(|line| line.contains("-->")) {
        // The line right before the timing is the cue identifier.
        Some(timing) => {
            text.extend(&block[..timing.saturating_sub(1)]);
            text.extend(&block[timing + 1..]);
        }
        None => text.extend(block),
    }
}
