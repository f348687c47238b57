//! System prompt loading
//!
//! Prompt files hold several named prompts, each introduced by a `[NAME]`
//! header line:
//!
//! ```text
//! [MEDICAL_ASSISTANT]
//! You are an expert medical AI assistant...
//!
//! [GENERAL_ASSISTANT]
//! You are a helpful assistant.
//! ```

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, ToolError};

/// Section used when none is configured
pub const DEFAULT_PROMPT_NAME: &str = "MEDICAL_ASSISTANT";

/// Built-in prompt used when no prompt file is configured
pub const DEFAULT_MEDICAL_ASSISTANT_PROMPT: &str = r"You are an expert medical AI assistant who can answer any medical questions and analyze medical images similar to a doctor.
Solve using your own vision and reasoning and use tools to complement your reasoning.
Make multiple tool calls in parallel or sequence as needed for comprehensive answers.
Critically think about and criticize the tool outputs.
If you need to look up some information before asking a follow up question, you are allowed to do that.
When an image is provided, its path is given as 'image_path: <path>'; pass that path to the tools.

Available tools:
- chest_xray_classifier: pathology probabilities
- chest_xray_segmentation: anatomical structures and their measurements
- chest_xray_report_generator: structured FINDINGS / IMPRESSION report
- chest_xray_expert: answers detailed questions about the image
- xray_phrase_grounding: locates a described finding and draws it

Never present a tool output as a diagnosis; recommend review by a qualified clinician.";

/// Parse `[NAME]`-sectioned prompt text
pub fn parse_prompts(text: &str) -> HashMap<String, String> {
    let mut prompts = HashMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        let header = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .filter(|s| !s.is_empty() && !s.contains(char::is_whitespace));

        if let Some(name) = header {
            if let Some((name, lines)) = current.take() {
                prompts.insert(name, lines.join("\n").trim().to_string());
            }
            current = Some((name.to_string(), Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some((name, lines)) = current {
        prompts.insert(name, lines.join("\n").trim().to_string());
    }

    prompts
}

/// Read every prompt from a file
pub fn load_prompts(path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_prompts(&text))
}

/// One named prompt from a file
pub fn load_prompt(path: impl AsRef<Path>, name: &str) -> Result<String> {
    load_prompts(path)?
        .remove(name)
        .ok_or_else(|| ToolError::PromptNotFound(name.to_string()))
}
