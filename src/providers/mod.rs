//! Batch translation through an LLM provider. Every call sends the whole
//! ordered batch of strings read from one page and expects exactly one
//! translation back per string.

use anyhow::{Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};

mod openai;
mod retry;

pub use openai::OpenAiTranslator;
pub use retry::RetryPolicy;

pub(crate) const TRANSLATION_TOOL: &str = "deliver_translations";

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub(crate) fn translation_tool() -> ToolSpec {
    ToolSpec {
        name: TRANSLATION_TOOL.to_string(),
        description: "Return the translations, one per input string, in input order."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "translations": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Translated strings in the same order as the input"
                }
            },
            "required": ["translations"]
        }),
    }
}

pub(crate) fn system_prompt(source_language: &str, target_language: &str) -> String {
    format!(
        "You translate text that OCR read from comic and manga pages.\n\
         Translate every input string from {source} to {target}.\n\
         The input is a JSON array. Return exactly one translation per element, in the same order.\n\
         The text may contain OCR noise; translate what is readable and return an empty string for an element with nothing readable.\n\
         Do not merge, split, explain or annotate elements.",
        source = source_language,
        target = target_language
    )
}

#[derive(Debug, Deserialize)]
struct TranslationArgs {
    translations: Vec<String>,
}

/// Validates tool-call arguments against the batch that was sent.
pub(crate) fn parse_translations(args: Value, expected: usize) -> Result<Vec<String>> {
    let parsed: TranslationArgs = serde_json::from_value(args)
        .map_err(|err| anyhow!("invalid translation tool arguments: {}", err))?;
    if parsed.translations.len() != expected {
        return Err(anyhow!(
            "translation count mismatch: sent {}, received {}",
            expected,
            parsed.translations.len()
        ));
    }
    Ok(parsed.translations)
}
