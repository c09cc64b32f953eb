//! Tolerant JSON validation for reasoning-service output.
//!
//! Models wrap JSON in Markdown fences, prepend commentary, and occasionally
//! truncate a closing brace. This module is the single point where that
//! unreliability is absorbed: it extracts the outermost `{...}` span, repairs
//! unbalanced braces, parses, and enforces a required-key contract. Anything
//! it cannot repair becomes a typed [`ValidationError::InvalidModelResponse`]
//! for the stage retry loop; the pipeline never guesses a default in place
//! of a failed parse.
//!
//! A parseable response with all required keys passes through unaltered.

use serde_json::Value;
use thiserror::Error;

/// How much of the raw response to keep in error context.
const SNIPPET_LEN: usize = 240;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid model response: {reason} (snippet: {snippet:?})")]
    InvalidModelResponse { reason: String, snippet: String },
}

impl ValidationError {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        let mut snippet: String = raw.chars().take(SNIPPET_LEN).collect();
        if raw.chars().count() > SNIPPET_LEN {
            snippet.push('…');
        }
        Self::InvalidModelResponse {
            reason: reason.into(),
            snippet,
        }
    }
}

/// Strip a Markdown code-fence wrapper if present.
///
/// Handles ```json / ``` / ~~~ variants and a missing trailing fence.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    for fence in ["```", "~~~"] {
        if let Some(rest) = trimmed.strip_prefix(fence) {
            // Drop the info string ("json", "JSON", …) up to the first newline.
            let body = match rest.split_once('\n') {
                Some((_, body)) => body,
                None => rest,
            };
            return match body.rfind(fence) {
                Some(pos) => &body[..pos],
                None => body,
            };
        }
    }
    trimmed
}

/// Trim to the outermost `{...}` span, repairing unbalanced braces.
///
/// Cutting at the last `}` is only safe when the braces in that span balance;
/// a response truncated before its outer closing brace has its last `}`
/// nested inside, and trimming there would also drop trailing `]`s that the
/// repair needs. In that case the span runs to the end of the text instead.
fn extract_object_text(raw: &str) -> Result<String, ValidationError> {
    let text = strip_code_fences(raw).trim();

    let start = text.find('{');
    let end = text.rfind('}');

    let mut span = match (start, end) {
        (Some(s), Some(e)) if e >= s => {
            let inner = &text[s..=e];
            if inner.matches('{').count() == inner.matches('}').count() {
                inner.to_string()
            } else {
                text[s..].to_string()
            }
        }
        (Some(s), _) => text[s..].to_string(),
        (None, Some(e)) => text[..=e].to_string(),
        (None, None) => return Err(ValidationError::new("no JSON object found", raw)),
    };

    // Brace counting ignores string contents; models rarely emit literal
    // braces inside values, and a false repair still fails the parse below.
    let opens = span.matches('{').count();
    let closes = span.matches('}').count();
    if opens > closes {
        span.extend(std::iter::repeat('}').take(opens - closes));
    } else if closes > opens {
        let mut padded = "{".repeat(closes - opens);
        padded.push_str(&span);
        span = padded;
    }

    Ok(span)
}

/// Extract, repair, parse, and enforce the required-key contract.
pub fn validate_model_json(raw: &str, required: &[&str]) -> Result<Value, ValidationError> {
    let span = extract_object_text(raw)?;

    let value: Value = serde_json::from_str(&span)
        .map_err(|e| ValidationError::new(format!("JSON parse failed: {e}"), raw))?;

    let obj = value
        .as_object()
        .ok_or_else(|| ValidationError::new("top-level value is not an object", raw))?;

    for key in required {
        if !obj.contains_key(*key) {
            return Err(ValidationError::new(format!("missing required key {key:?}"), raw));
        }
    }

    Ok(value)
}
