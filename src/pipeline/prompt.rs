//! Prompt construction
//!
//! Renders a generation request into the exact prompt text sent to the
//! engine. Deterministic string substitution; the mode is an explicit enum,
//! never inferred from the text.

use serde::{Deserialize, Serialize};

/// Token budget for one generated document
pub const MAX_TOKENS: u32 = 1024;

/// Substituted whenever the agent text is blank; the sanitizer shows the
/// same sentence for empty output.
pub const FALLBACK_AGENT_TEXT: &str = "No agent output provided.";

const AGENT_TEXT_PLACEHOLDER: &str = "{{agent_text}}";

const FULL_PROMPT_TEMPLATE: &str = r#"TASK: Turn the agent output into a production-quality, mobile-first GUI for a WebView.

# runtime_config
{
  "pattern_hint": "auto",
  "interaction_style": "tap",
  "javascript": "minimal",
  "theme": { "mode": "light", "brand_color": "#0EA5E9" },
  "i18n_locale": "en-IN",
  "host_actions": ["open_link","call_contact","pay_bill","navigate","retry"]
}

# agent_text
{{agent_text}}

# constraints
- Output only ONE ```html code block.
- Use only inline CSS/SVG; no external assets.
- Put data-action and, when helpful, data-payload JSON on all interactive elements."#;

const MINIMAL_PROMPT_TEMPLATE: &str = r#"Produce a mobile-friendly HTML UI inside a single ```html code block.

# agent_text
{{agent_text}}"#;

/// How much instruction wraps the agent text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// Full instructional template with the runtime configuration block
    Full,
    /// Short wrapping instruction only
    Minimal,
}

/// Build the prompt for one request. Blank agent text is replaced by the
/// fixed fallback sentence before substitution.
pub fn build_prompt(agent_text: &str, mode: PromptMode) -> String {
    let text = if agent_text.trim().is_empty() {
        FALLBACK_AGENT_TEXT
    } else {
        agent_text
    };

    let template = match mode {
        PromptMode::Full => FULL_PROMPT_TEMPLATE,
        PromptMode::Minimal => MINIMAL_PROMPT_TEMPLATE,
    };
    template.replace(AGENT_TEXT_PLACEHOLDER, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_prompt_embeds_agent_text() {
        let prompt = build_prompt("Pay the electricity bill", PromptMode::Full);
        assert!(prompt.contains("Pay the electricity bill"));
        assert!(prompt.contains("# runtime_config"));
        assert!(prompt.contains("\"host_actions\""));
        assert!(prompt.contains("Output only ONE ```html code block."));
        assert!(!prompt.contains(AGENT_TEXT_PLACEHOLDER));
    }

    #[test]
    fn test_blank_text_substitutes_fallback() {
        let prompt = build_prompt("   \n", PromptMode::Full);
        assert!(prompt.contains(FALLBACK_AGENT_TEXT));
        assert!(!prompt.contains(AGENT_TEXT_PLACEHOLDER));
    }

    #[test]
    fn test_minimal_prompt_is_short_wrapper() {
        let prompt = build_prompt("show a receipt", PromptMode::Minimal);
        assert!(prompt.contains("show a receipt"));
        assert!(prompt.contains("single ```html code block"));
        assert!(!prompt.contains("# runtime_config"));
    }

    #[test]
    fn test_minimal_blank_also_falls_back() {
        let prompt = build_prompt("", PromptMode::Minimal);
        assert!(prompt.contains(FALLBACK_AGENT_TEXT));
    }
}
