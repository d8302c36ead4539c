use tracing::debug;

use crate::format::openai::ChatMessage;

/// Messages at the tail of the conversation that are never dropped.
const KEEP_TAIL: usize = 4;

/// Rough token estimate: four characters per token.
fn estimate_tokens(msg: &ChatMessage) -> u32 {
    let mut chars = msg
        .content
        .as_ref()
        .map(|c| c.to_text().len())
        .unwrap_or(0);
    if let Some(tool_calls) = &msg.tool_calls {
        for tc in tool_calls {
            chars += tc.function.name.len() + tc.function.arguments.len();
        }
    }
    (chars / 4) as u32
}

pub fn estimate_total_tokens(messages: &[ChatMessage]) -> u32 {
    messages.iter().map(estimate_tokens).sum()
}

/// Drop the oldest non-system messages until the estimated prompt plus the
/// output reserve fits the context window. The last four messages and all
/// system messages survive unconditionally; relative order never changes.
pub fn auto_truncate(
    messages: &mut Vec<ChatMessage>,
    context_window: u32,
    reserve_output_tokens: u32,
    request_id: &str,
) {
    let budget = context_window.saturating_sub(reserve_output_tokens);
    let before = messages.len();

    while estimate_total_tokens(messages) > budget {
        let tail_start = messages.len().saturating_sub(KEEP_TAIL);
        let droppable = messages
            .iter()
            .enumerate()
            .take(tail_start)
            .find(|(_, m)| m.role != "system")
            .map(|(i, _)| i);

        match droppable {
            Some(i) => {
                messages.remove(i);
            }
            None => break,
        }
    }

    if messages.len() < before {
        debug!(
            request_id = %request_id,
            dropped = before - messages.len(),
            remaining = messages.len(),
            "Auto-truncated conversation"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::openai::ChatContent;

    fn msg(role: &str, text: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: Some(ChatContent::Text(text.to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn texts(messages: &[ChatMessage]) -> Vec<String> {
        messages
            .iter()
            .map(|m| m.content.as_ref().unwrap().to_text())
            .collect()
    }

    #[test]
    fn test_no_truncation_when_under_budget() {
        let mut messages = vec![msg("user", "short")];
        auto_truncate(&mut messages, 1000, 100, "req");
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_drops_oldest_first() {
        // Each message is ~25 tokens; budget allows only the tail.
        let mut messages: Vec<ChatMessage> = (0..8)
            .map(|i| msg("user", &format!("{i}{}", "x".repeat(99))))
            .collect();
        auto_truncate(&mut messages, 150, 25, "req");

        // Order preserved, oldest removed, last 4 untouched.
        let remaining = texts(&messages);
        assert!(remaining.len() >= KEEP_TAIL);
        for pair in remaining.windows(2) {
            assert!(pair[0].chars().next() < pair[1].chars().next());
        }
        assert!(remaining.last().unwrap().starts_with('7'));
    }

    #[test]
    fn test_last_four_never_dropped() {
        let mut messages: Vec<ChatMessage> = (0..5)
            .map(|i| msg("user", &format!("{i}{}", "x".repeat(999))))
            .collect();
        // Budget of zero: everything droppable goes, the tail stays.
        auto_truncate(&mut messages, 10, 10, "req");
        assert_eq!(messages.len(), KEEP_TAIL);
        assert_eq!(
            texts(&messages)
                .iter()
                .map(|t| t.chars().next().unwrap())
                .collect::<Vec<_>>(),
            vec!['1', '2', '3', '4']
        );
    }

    #[test]
    fn test_system_messages_survive() {
        let mut messages = vec![
            msg("system", &"s".repeat(400)),
            msg("user", &"a".repeat(400)),
            msg("user", &"b".repeat(400)),
            msg("user", "1"),
            msg("user", "2"),
            msg("user", "3"),
            msg("user", "4"),
        ];
        auto_truncate(&mut messages, 120, 20, "req");
        assert_eq!(messages[0].role, "system");
        // Both droppable user messages went; the tail of 4 stayed.
        assert_eq!(messages.len(), 5);
    }

    #[test]
    fn test_order_never_changes() {
        let mut messages: Vec<ChatMessage> = (0..10)
            .map(|i| msg("user", &format!("{i}{}", "y".repeat(59))))
            .collect();
        auto_truncate(&mut messages, 120, 30, "req");
        let remaining = texts(&messages);
        let mut sorted = remaining.clone();
        sorted.sort();
        assert_eq!(remaining, sorted);
    }
}
