//! `[key='value' ...] <prompt>` command text, shared by slash commands and
//! app mentions.

use super::SlackError;
use crate::shared::RepoName;

const KNOWN_KEYS: &str = "repo, tool, branch, model, autopr, commit_msg";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlackCommand {
    pub repo: String,
    pub tool: Option<String>,
    pub branch: Option<String>,
    pub model: Option<String>,
    pub prompt: String,
    pub auto_pr: bool,
    pub commit_msg: Option<String>,
}

/// Removes every `<@USERID>` mention and trims the result.
pub fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        out.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn closing_quote(open: char) -> Option<char> {
    match open {
        '\'' => Some('\''),
        '"' => Some('"'),
        '‘' => Some('’'),
        '“' => Some('”'),
        _ => None,
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SlackError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(SlackError::Command(format!(
            "option `{key}` expects true or false, got `{other}`"
        ))),
    }
}

/// Splits `key='v' key2=v2` into pairs; values may be single, double or
/// typographic quoted.
fn parse_pairs(raw: &str) -> Result<Vec<(String, String)>, SlackError> {
    let mut pairs = Vec::new();
    let mut chars = raw.chars().peekable();
    loop {
        while chars.next_if(|ch| ch.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(ch) = chars.next_if(|ch| *ch != '=' && !ch.is_whitespace()) {
            key.push(ch);
        }
        if chars.next() != Some('=') || key.is_empty() {
            return Err(SlackError::Command(format!(
                "malformed option near `{key}`; expected key='value'"
            )));
        }

        let mut value = String::new();
        match chars.peek().copied().and_then(closing_quote) {
            Some(close) => {
                chars.next();
                let mut closed = false;
                for ch in chars.by_ref() {
                    if ch == close {
                        closed = true;
                        break;
                    }
                    value.push(ch);
                }
                if !closed {
                    return Err(SlackError::Command(format!(
                        "unterminated quote in option `{key}`"
                    )));
                }
            }
            None => {
                while let Some(ch) = chars.next_if(|ch| !ch.is_whitespace()) {
                    value.push(ch);
                }
            }
        }
        pairs.push((key.to_ascii_lowercase(), value));
    }
    Ok(pairs)
}

/// Byte offset of the `]` closing the option block. Brackets inside quoted
/// values are part of the value.
fn option_block_end(rest: &str) -> Result<usize, SlackError> {
    let mut open_quote = None;
    let mut prev = None;
    for (index, ch) in rest.char_indices() {
        match open_quote {
            Some(close) => {
                if ch == close {
                    open_quote = None;
                }
            }
            None if ch == ']' => return Ok(index),
            None if prev == Some('=') => open_quote = closing_quote(ch),
            None => {}
        }
        prev = Some(ch);
    }
    let message = if open_quote.is_some() {
        "unterminated quote in options"
    } else {
        "missing `]` after options"
    };
    Err(SlackError::Command(message.to_string()))
}

pub fn parse_command(text: &str) -> Result<SlackCommand, SlackError> {
    let text = unescape(text.trim());
    let (options, prompt) = if let Some(rest) = text.strip_prefix('[') {
        let end = option_block_end(rest)?;
        (&rest[..end], rest[end + 1..].trim())
    } else {
        ("", text.as_str())
    };

    let mut command = SlackCommand {
        prompt: prompt.to_string(),
        ..SlackCommand::default()
    };
    let mut repo = None;
    for (key, value) in parse_pairs(options)? {
        let value = value.trim().to_string();
        match key.as_str() {
            "repo" => repo = Some(value),
            "tool" => command.tool = Some(value).filter(|v| !v.is_empty()),
            "branch" => command.branch = Some(value).filter(|v| !v.is_empty()),
            "model" => command.model = Some(value).filter(|v| !v.is_empty()),
            "autopr" => command.auto_pr = parse_bool(&key, &value)?,
            "commit_msg" => command.commit_msg = Some(value).filter(|v| !v.is_empty()),
            other => {
                return Err(SlackError::Command(format!(
                    "unknown option `{other}`; expected one of {KNOWN_KEYS}"
                )))
            }
        }
    }

    let Some(repo) = repo else {
        return Err(SlackError::Command(
            "repo is required: [repo='owner/name'] <prompt>".to_string(),
        ));
    };
    command.repo = RepoName::parse(&repo)
        .map_err(SlackError::Command)?
        .full_name();
    if command.prompt.is_empty() {
        return Err(SlackError::Command("prompt is required".to_string()));
    }
    Ok(command)
}

/// Thread follow-ups are plain prompts; options belong to the first message.
pub fn parse_follow_up(text: &str) -> Result<String, SlackError> {
    let prompt = unescape(text.trim());
    if prompt.starts_with('[') {
        return Err(SlackError::FollowUpOptions);
    }
    if prompt.is_empty() {
        return Err(SlackError::Command("prompt is required".to_string()));
    }
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_options_and_prompt() {
        let command =
            parse_command("[repo='acme/api' tool='claude' autopr=true commit_msg=\"fix: login\"] Add login")
                .expect("parse");
        assert_eq!(command.repo, "acme/api");
        assert_eq!(command.tool.as_deref(), Some("claude"));
        assert!(command.auto_pr);
        assert_eq!(command.commit_msg.as_deref(), Some("fix: login"));
        assert_eq!(command.prompt, "Add login");
        assert_eq!(command.branch, None);
    }

    #[test]
    fn accepts_typographic_quotes_and_escaped_text() {
        let command = parse_command("[repo=‘acme/api’ branch=“fog/otp”] Use &lt;Otp&gt; &amp; test")
            .expect("parse");
        assert_eq!(command.repo, "acme/api");
        assert_eq!(command.branch.as_deref(), Some("fog/otp"));
        assert_eq!(command.prompt, "Use <Otp> & test");
    }

    #[test]
    fn rejects_missing_repo_unknown_keys_and_empty_prompt() {
        for (text, needle) in [
            ("Add login", "repo is required"),
            ("[tool='claude'] Add login", "repo is required"),
            ("[repo='acme/api' colour='red'] Add", "unknown option `colour`"),
            ("[repo='acme/api']", "prompt is required"),
            ("[repo='acme' ] Add", "owner/name"),
            ("[repo='acme/api' Add", "missing `]`"),
            ("[repo='acme/api] Add", "unterminated quote"),
            ("[repo='acme/api' autopr=maybe] Add", "expects true or false"),
        ] {
            let err = parse_command(text).expect_err(text);
            assert!(err.to_string().contains(needle), "{text}: {err}");
        }
    }

    #[test]
    fn brackets_inside_quoted_values_do_not_end_the_options() {
        let command = parse_command(
            "[repo='acme/api' commit_msg=\"fix: handle [x] items\" branch=‘fog/[wip]’] Tidy [docs]",
        )
        .expect("parse");
        assert_eq!(command.commit_msg.as_deref(), Some("fix: handle [x] items"));
        assert_eq!(command.branch.as_deref(), Some("fog/[wip]"));
        assert_eq!(command.prompt, "Tidy [docs]");
    }

    #[test]
    fn strip_mentions_removes_every_user_reference() {
        assert_eq!(
            strip_mentions("<@U123> fix <@U456|bob>  error handling"),
            "fix error handling"
        );
        assert_eq!(strip_mentions("no mentions"), "no mentions");
        assert_eq!(strip_mentions("broken <@U1"), "broken <@U1");
    }

    #[test]
    fn follow_ups_must_be_plain_prompts() {
        assert_eq!(
            parse_follow_up(" fix error handling ").expect("plain"),
            "fix error handling"
        );
        let err = parse_follow_up("[repo='acme/api'] again").expect_err("options");
        assert_eq!(err.to_string(), "options are only allowed for the initial task");
        assert!(parse_follow_up("  ").is_err());
    }
}
