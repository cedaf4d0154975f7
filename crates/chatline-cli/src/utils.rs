//! Shared utilities

use chatline_client::{HttpBackend, Message};
use chrono::Local;

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// One-line preview of a conversation for listings
pub fn preview_line(preview: &str) -> String {
    let flat = preview.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.is_empty() {
        "(empty)".to_string()
    } else {
        truncate_chars(&flat, 60)
    }
}

/// Render a stored message for the transcript view.
/// Uploaded attachments get a download link.
pub fn format_message(message: &Message, backend: &HttpBackend) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    let mut line = format!("[{}] {}: {}", time, message.sender.as_str(), message.text);
    if let Some(attachment) = &message.attachment {
        line.push_str(&format!(" [file: {} ({} bytes)", attachment.name, attachment.size));
        if let Some(server_path) = &attachment.server_path {
            line.push_str(&format!(" {}", backend.attachment_url(server_path)));
        }
        line.push(']');
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_preview_line_flattens_whitespace() {
        assert_eq!(preview_line("line one\n  line two"), "line one line two");
        assert_eq!(preview_line("   "), "(empty)");
    }

    fn backend() -> HttpBackend {
        HttpBackend::new(chatline_client::ClientConfig::new("http://localhost:5000/api")).unwrap()
    }

    fn attached(server_path: Option<&str>) -> Message {
        Message::user(
            "see attached",
            Some(chatline_client::Attachment {
                name: "a.txt".into(),
                size: 3,
                mime_type: "text/plain".into(),
                server_path: server_path.map(str::to_string),
            }),
        )
    }

    #[test]
    fn test_format_message_includes_attachment() {
        let line = format_message(&attached(None), &backend());
        assert!(line.contains("user: see attached"));
        assert!(line.ends_with("[file: a.txt (3 bytes)]"));
    }

    #[test]
    fn test_format_message_links_uploaded_attachment() {
        let line = format_message(&attached(Some("1717500000_a.txt")), &backend());
        assert!(line.ends_with(
            "[file: a.txt (3 bytes) http://localhost:5000/api/uploads/1717500000_a.txt]"
        ));
    }
}
