//! Slash commands for interactive mode

use std::path::PathBuf;

/// Result of parsing a slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Start a new conversation
    New,
    /// List conversations
    List,
    /// Open a conversation by id
    Open(String),
    /// Delete a conversation by id
    Delete(String),
    /// Pin or unpin a conversation
    Pin { id: String, pinned: bool },
    /// Attach a file to the next message
    Attach(PathBuf),
    /// Drop the pending attachment
    Detach,
    /// Show a message to the user (not sent to the backend)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command. Returns `None` for ordinary chat input.
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "new" | "n" => CommandResult::New,

        "list" | "ls" | "l" => CommandResult::List,

        "open" | "o" => with_arg(args, "open", |id| CommandResult::Open(id.to_string())),

        "delete" | "rm" => with_arg(args, "delete", |id| CommandResult::Delete(id.to_string())),

        "pin" => with_arg(args, "pin", |id| CommandResult::Pin {
            id: id.to_string(),
            pinned: true,
        }),

        "unpin" => with_arg(args, "unpin", |id| CommandResult::Pin {
            id: id.to_string(),
            pinned: false,
        }),

        "attach" | "a" => with_arg(args, "attach", |path| CommandResult::Attach(PathBuf::from(path))),

        "detach" => CommandResult::Detach,

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn with_arg(args: &str, command: &str, f: impl FnOnce(&str) -> CommandResult) -> CommandResult {
    if args.is_empty() {
        CommandResult::Message(format!("Usage: /{} <{}>", command, arg_name(command)))
    } else {
        f(args)
    }
}

fn arg_name(command: &str) -> &'static str {
    match command {
        "attach" => "path",
        _ => "id",
    }
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /new, /n             Start a new conversation
  /list, /ls           List conversations
  /open, /o <id>       Open a conversation
  /delete, /rm <id>    Delete a conversation
  /pin <id>            Pin a conversation
  /unpin <id>          Unpin a conversation
  /attach, /a <path>   Attach a file to the next message
  /detach              Drop the pending attachment
  /quit, /exit, /q     Exit chatline

Press Ctrl-C while a reply is streaming to stop it."#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_input_is_not_a_command() {
        assert_eq!(execute_command("hello there"), None);
        assert_eq!(execute_command(""), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(execute_command("/new"), Some(CommandResult::New));
        assert_eq!(execute_command("  /LIST  "), Some(CommandResult::List));
        assert_eq!(
            execute_command("/open abc-123"),
            Some(CommandResult::Open("abc-123".into()))
        );
        assert_eq!(
            execute_command("/rm abc"),
            Some(CommandResult::Delete("abc".into()))
        );
        assert_eq!(
            execute_command("/unpin abc"),
            Some(CommandResult::Pin {
                id: "abc".into(),
                pinned: false
            })
        );
        assert_eq!(
            execute_command("/attach ./my notes.txt"),
            Some(CommandResult::Attach(PathBuf::from("./my notes.txt")))
        );
        assert_eq!(execute_command("/q"), Some(CommandResult::Exit));
    }

    #[test]
    fn test_missing_argument_shows_usage() {
        assert_eq!(
            execute_command("/open"),
            Some(CommandResult::Message("Usage: /open <id>".into()))
        );
        assert_eq!(
            execute_command("/attach   "),
            Some(CommandResult::Message("Usage: /attach <path>".into()))
        );
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            execute_command("/frobnicate now"),
            Some(CommandResult::Unknown("frobnicate".into()))
        );
    }

    #[test]
    fn test_help_lists_commands() {
        let Some(CommandResult::Message(help)) = execute_command("/help") else {
            panic!("expected help text");
        };
        assert!(help.contains("/open"));
        assert!(help.contains("/attach"));
    }
}
