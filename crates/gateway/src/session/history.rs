//! Prompt assembly and history pruning.
//!
//! The prompt is system + tool schemas + a history window + the user
//! final. History is pruned oldest-first to fit the token budget, but
//! the system prompt and the most recent exchanges always survive.

use invorto_domain::config::AgentConfig;
use invorto_domain::tool::{Message, ToolDefinition};

/// Cheap token estimate: ~4 characters per token, floor 1.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4 + 1
}

fn message_tokens(msg: &Message) -> usize {
    estimate_tokens(&msg.content.extract_all_text()) + 4
}

fn tool_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| {
            estimate_tokens(&t.name)
                + estimate_tokens(&t.description)
                + estimate_tokens(&t.parameters.to_string())
        })
        .sum()
}

/// Build the message list for one completion: system prompt, then the
/// pruned history window, then the user final.
pub fn assemble_prompt(
    system_prompt: &str,
    tools: &[ToolDefinition],
    history: &[Message],
    user_text: &str,
    cfg: &AgentConfig,
) -> Vec<Message> {
    let fixed = estimate_tokens(system_prompt) + tool_tokens(tools) + estimate_tokens(user_text);
    let budget = cfg.max_context_tokens.saturating_sub(fixed);

    // The most recent exchanges are always preserved (one exchange ≈
    // a user/assistant pair).
    let keep_floor = history.len().saturating_sub(cfg.keep_recent_exchanges * 2);

    let mut total: usize = history.iter().map(message_tokens).sum();
    let mut start = 0usize;
    while total > budget && start < keep_floor {
        total -= message_tokens(&history[start]);
        start += 1;
    }
    if start > 0 {
        tracing::debug!(dropped = start, "pruned history to fit context budget");
    }

    let mut messages = Vec::with_capacity(history.len() - start + 2);
    messages.push(Message::system(system_prompt));
    messages.extend(history[start..].iter().cloned());
    messages.push(Message::user(user_text));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use invorto_domain::tool::Role;

    fn cfg(max_tokens: usize, keep: usize) -> AgentConfig {
        AgentConfig {
            max_context_tokens: max_tokens,
            keep_recent_exchanges: keep,
            ..AgentConfig::default()
        }
    }

    fn exchange(i: usize) -> [Message; 2] {
        [
            Message::user(format!("user message number {i} with some padding text")),
            Message::assistant(format!("assistant reply number {i} with some padding text")),
        ]
    }

    #[test]
    fn small_history_passes_through() {
        let history: Vec<Message> = exchange(1).into_iter().chain(exchange(2)).collect();
        let messages = assemble_prompt("system", &[], &history, "hello", &cfg(6_000, 4));
        assert_eq!(messages.len(), history.len() + 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages.last().unwrap().role, Role::User);
    }

    #[test]
    fn oversized_history_prunes_oldest_first() {
        let mut history = Vec::new();
        for i in 0..50 {
            history.extend(exchange(i));
        }
        let messages = assemble_prompt("system", &[], &history, "hello", &cfg(300, 2));
        // System and user endpoints survive.
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages.last().unwrap().role, Role::User);
        // Pruning dropped from the front, so the earliest retained
        // history message is late in the original sequence.
        let first_kept = messages[1].content.extract_all_text();
        assert!(
            !first_kept.contains("number 0"),
            "oldest exchange should be pruned, kept: {first_kept}"
        );
        // The most recent exchange is always present.
        let texts: Vec<String> = messages
            .iter()
            .map(|m| m.content.extract_all_text())
            .collect();
        assert!(texts.iter().any(|t| t.contains("number 49")));
    }

    #[test]
    fn keep_floor_preserves_recent_exchanges_even_over_budget() {
        let mut history = Vec::new();
        for i in 0..10 {
            history.extend(exchange(i));
        }
        // Budget of nearly nothing: only the keep floor survives.
        let messages = assemble_prompt("system", &[], &history, "hi", &cfg(1, 3));
        // 3 exchanges * 2 messages + system + user = 8.
        assert_eq!(messages.len(), 8);
    }

    #[test]
    fn token_estimate_floor() {
        assert_eq!(estimate_tokens(""), 1);
        assert!(estimate_tokens("a longer piece of text") > 1);
    }
}
