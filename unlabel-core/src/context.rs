//! Conversation context sent with each request
//!
//! The window is rebuilt from the transcript right before every request and
//! is never cached. Its size is bounded by turn count only; the transport
//! decides whether the resulting string is too long.

use crate::types::{Author, ConversationTurn, TurnPayload};

/// Number of trailing turns rendered into the context window
pub const CONTEXT_TURNS: usize = 3;

/// Placeholder used for user turns that uploaded an image
pub const IMAGE_PLACEHOLDER: &str = "Analyzed an image";

/// Render the last [`CONTEXT_TURNS`] turns as newline-separated lines.
///
/// Returns `None` when the history is empty.
pub fn build_context(history: &[ConversationTurn]) -> Option<String> {
    let start = history.len().saturating_sub(CONTEXT_TURNS);
    let lines: Vec<String> = history[start..].iter().map(render_turn).collect();

    let context = lines.join("\n");
    if context.is_empty() {
        None
    } else {
        Some(context)
    }
}

fn render_turn(turn: &ConversationTurn) -> String {
    match turn.author {
        Author::User => {
            let text = match &turn.payload {
                TurnPayload::Text { text } if !text.is_empty() => text.as_str(),
                _ => IMAGE_PLACEHOLDER,
            };
            format!("User: {}", text)
        }
        Author::Assistant => match &turn.payload {
            TurnPayload::Result { result } => {
                format!("AI: Analyzed product - {}", result.headline())
            }
            TurnPayload::Text { text } => format!("AI: {}", text),
            TurnPayload::Error { message, .. } => format!("AI: {}", message),
            TurnPayload::Image { .. } => "AI: ".to_string(),
        },
    }
}
