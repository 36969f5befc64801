//! Built-in console command rewriting.
//!
//! `say <msg>` is re-encoded as a `tellraw @a` announce carrying the sender's
//! display tag. Every other command is forwarded as typed.

use serde_json::json;

/// Color of the sender prefix in announce messages.
const ANNOUNCE_COLOR: &str = "light_purple";

/// Rewrite `command` for the agent on behalf of `tag`.
pub fn rewrite_command(command: &str, tag: &str) -> String {
    let trimmed = command.trim();
    let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let (verb, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
    let message = rest.trim_start();

    if verb.eq_ignore_ascii_case("say") && !message.is_empty() {
        return announce(tag, message);
    }
    trimmed.to_owned()
}

fn announce(tag: &str, message: &str) -> String {
    // serde_json escapes quotes and backslashes in both fields.
    let components = json!([
        "",
        { "text": format!("[{tag}] "), "color": ANNOUNCE_COLOR },
        { "text": message },
    ]);
    format!("tellraw @a {components}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn components(rewritten: &str) -> Value {
        let json = rewritten.strip_prefix("tellraw @a ").unwrap();
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn say_becomes_announce_with_sender_tag() {
        let out = rewrite_command("say hello world", "Steve#0001");
        let parsed = components(&out);
        assert_eq!(parsed[1]["text"], "[Steve#0001] ");
        assert_eq!(parsed[2]["text"], "hello world");
    }

    #[test]
    fn embedded_quotes_and_backslashes_are_escaped() {
        let out = rewrite_command(r#"say she said "hi" \o/"#, "Alex");
        assert!(out.contains(r#"she said \"hi\" \\o/"#));
        assert_eq!(components(&out)[2]["text"], r#"she said "hi" \o/"#);
    }

    #[test]
    fn tag_is_escaped_too() {
        let out = rewrite_command("say x", r#"Bad"Tag"#);
        assert_eq!(components(&out)[1]["text"], "[Bad\"Tag] ");
    }

    #[test]
    fn slash_prefix_and_case_are_tolerated() {
        assert!(rewrite_command("/SAY hi", "a").starts_with("tellraw @a "));
    }

    #[test]
    fn other_commands_pass_through() {
        assert_eq!(rewrite_command("  time set day ", "a"), "time set day");
        assert_eq!(rewrite_command("sayhello", "a"), "sayhello");
    }

    #[test]
    fn empty_say_is_left_alone() {
        assert_eq!(rewrite_command("say", "a"), "say");
        assert_eq!(rewrite_command("say   ", "a"), "say");
    }
}
