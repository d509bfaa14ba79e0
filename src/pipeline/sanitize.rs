//! Output sanitization
//!
//! Converts raw engine output into a complete, self-contained HTML document
//! the preview surface can always load. Total: every input, including empty
//! or malformed output, produces a document. The sanitizer never evaluates
//! its input.

use crate::pipeline::prompt::FALLBACK_AGENT_TEXT;

/// Sanitize raw model output into a renderable document.
///
/// `treat_missing_html_as_plaintext` controls what happens to output that is
/// not already a full document: `true` escapes it into preformatted text,
/// `false` trusts it as a markup fragment and wraps it unescaped.
pub fn sanitize_html(raw: &str, treat_missing_html_as_plaintext: bool) -> String {
    let cleaned = strip_code_fence(raw).trim();

    // A complete document passes through untouched.
    if contains_html_document(cleaned) {
        return cleaned.to_string();
    }

    if cleaned.is_empty() {
        return wrap_preformatted(&escape_html(FALLBACK_AGENT_TEXT));
    }

    if treat_missing_html_as_plaintext {
        wrap_preformatted(&escape_html(cleaned))
    } else {
        wrap_fragment(cleaned)
    }
}

/// Strip a single surrounding fence pair: an opening marker on its own
/// leading line (optionally with a language tag) and a trailing closing
/// marker. Fences embedded in the body stay.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();

    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = after_open.strip_suffix("```") else {
        return trimmed;
    };
    // The rest of the opening line is the language tag; the body starts on
    // the next line. No newline means this was never a block.
    match body.find('\n') {
        Some(newline) => &body[newline + 1..],
        None => trimmed,
    }
}

fn contains_html_document(cleaned: &str) -> bool {
    let lower = cleaned.to_lowercase();
    lower.contains("<html") || lower.starts_with("<!doctype")
}

/// Escape `&`, `<` and `>` only — exactly what the preview needs
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn wrap_preformatted(escaped: &str) -> String {
    format!(
        "<html>\n\
         <head>\n\
         \x20   <meta charset=\"utf-8\" />\n\
         \x20   <style>\n\
         \x20       body {{ font-family: sans-serif; padding: 16px; background-color: #FAFAFA; }}\n\
         \x20       pre {{ white-space: pre-wrap; word-break: break-word; }}\n\
         \x20   </style>\n\
         </head>\n\
         <body>\n\
         \x20   <pre>{escaped}</pre>\n\
         </body>\n\
         </html>"
    )
}

/// Trusted-fragment wrap: same document shell, no escaping, no `<pre>`
fn wrap_fragment(fragment: &str) -> String {
    format!(
        "<html>\n\
         <head>\n\
         \x20   <meta charset=\"utf-8\" />\n\
         \x20   <style>\n\
         \x20       body {{ font-family: sans-serif; padding: 16px; background-color: #FAFAFA; }}\n\
         \x20   </style>\n\
         </head>\n\
         <body>\n\
         {fragment}\n\
         </body>\n\
         </html>"
    )
}
