use anyhow::{Context, Result};
use coach_core::prompt::PromptTemplate;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// File stem of the feedback prompt override.
pub const FEEDBACK_PROMPT: &str = "feedback";

pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// The feedback prompt from `<dir>/feedback.md`, or the built-in one when the
/// directory or the file does not exist.
pub fn load_feedback_template(dir_path: &Path) -> Result<PromptTemplate> {
    if !dir_path.exists() {
        tracing::info!(
            "No prompts directory at {}, using the built-in feedback prompt.",
            dir_path.display()
        );
        return Ok(PromptTemplate::default());
    }

    let mut prompts = load_prompts(dir_path)?;
    match prompts.remove(FEEDBACK_PROMPT) {
        Some(text) => {
            let template = PromptTemplate::parse(text).with_context(|| {
                format!("Invalid feedback prompt in {}", dir_path.display())
            })?;
            tracing::info!("Loaded feedback prompt from {}.", dir_path.display());
            Ok(template)
        }
        None => {
            tracing::info!(
                "No {FEEDBACK_PROMPT}.md in {}, using the built-in feedback prompt.",
                dir_path.display()
            );
            Ok(PromptTemplate::default())
        }
    }
}
