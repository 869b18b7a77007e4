// ABOUTME: Structured requests forwarded to the agent backend and their response shapes.
// ABOUTME: Prompt parts, caller attachments, and text extraction from message responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// A request the connection manager forwards to the backend.
///
/// `directory` scopes the request to a project working directory.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendRequest {
    /// Resolve the backend's view of the project rooted at `directory`.
    CurrentProject { directory: PathBuf },
    ListSessions { directory: Option<PathBuf> },
    GetSession {
        directory: Option<PathBuf>,
        session_id: String,
    },
    CreateSession {
        directory: PathBuf,
        title: Option<String>,
    },
    SendPrompt {
        directory: Option<PathBuf>,
        session_id: String,
        parts: Vec<PromptPart>,
    },
    AbortSession {
        directory: Option<PathBuf>,
        session_id: String,
    },
    DeleteSession {
        directory: Option<PathBuf>,
        session_id: String,
    },
}

impl BackendRequest {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            BackendRequest::CurrentProject { .. } => "current_project",
            BackendRequest::ListSessions { .. } => "list_sessions",
            BackendRequest::GetSession { .. } => "get_session",
            BackendRequest::CreateSession { .. } => "create_session",
            BackendRequest::SendPrompt { .. } => "send_prompt",
            BackendRequest::AbortSession { .. } => "abort_session",
            BackendRequest::DeleteSession { .. } => "delete_session",
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        match self {
            BackendRequest::CurrentProject { directory }
            | BackendRequest::CreateSession { directory, .. } => Some(directory),
            BackendRequest::ListSessions { directory }
            | BackendRequest::GetSession { directory, .. }
            | BackendRequest::SendPrompt { directory, .. }
            | BackendRequest::AbortSession { directory, .. }
            | BackendRequest::DeleteSession { directory, .. } => directory.as_deref(),
        }
    }
}

/// One part of an outgoing prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptPart {
    Text {
        text: String,
    },
    File {
        mime: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        PromptPart::Text { text: text.into() }
    }

    /// Opaque file part for an attachment resolved by the caller.
    pub fn from_attachment(attachment: &Attachment) -> Self {
        let url = url::Url::from_file_path(&attachment.path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("file://{}", attachment.path.display()));
        PromptPart::File {
            mime: attachment
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            url,
            filename: attachment
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        }
    }
}

/// A file the caller attached to a prompt, already resolved on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub mime_type: Option<String>,
}

impl Attachment {
    pub fn new(path: impl Into<PathBuf>, mime_type: Option<String>) -> Self {
        Self {
            path: path.into(),
            mime_type,
        }
    }
}

/// Build the parts for a prompt: text first, then attachments in caller order.
pub fn prompt_parts(text: &str, attachments: &[Attachment]) -> Vec<PromptPart> {
    std::iter::once(PromptPart::text(text))
        .chain(attachments.iter().map(PromptPart::from_attachment))
        .collect()
}

/// Session as reported by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub time: SessionTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionTime {
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub created: Option<i64>,
}

/// Project as reported by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    #[serde(default)]
    pub worktree: Option<String>,
    #[serde(default)]
    pub vcs: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Concatenate the text parts of a message response, in order.
///
/// Accepts `{ "parts": [...] }` or a bare parts array. Non-text parts
/// (tool calls, reasoning, files, step markers) are skipped.
pub fn collect_text(response: &Value) -> String {
    let parts: &[Value] = match response {
        Value::Array(parts) => parts.as_slice(),
        Value::Object(map) => match map.get("parts") {
            Some(Value::Array(parts)) => parts.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    parts
        .iter()
        .filter_map(|part| serde_json::from_value::<ResponsePart>(part.clone()).ok())
        .filter(|part| part.kind == "text")
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_text_keeps_order_and_skips_other_parts() {
        let response = json!({
            "info": { "id": "msg_1", "role": "assistant" },
            "parts": [
                { "type": "step-start" },
                { "type": "text", "text": "first" },
                { "type": "tool", "tool": "bash", "state": { "status": "completed" } },
                { "type": "reasoning", "text": "thinking out loud" },
                { "type": "text", "text": "second" },
                { "type": "file", "url": "file:///tmp/x.png" }
            ]
        });
        assert_eq!(collect_text(&response), "first\nsecond");
    }

    #[test]
    fn test_collect_text_bare_array_and_empty() {
        let response = json!([{ "type": "text", "text": "only" }]);
        assert_eq!(collect_text(&response), "only");
        assert_eq!(collect_text(&json!({ "parts": [] })), "");
        assert_eq!(collect_text(&json!(true)), "");
    }

    #[test]
    fn test_prompt_parts_text_first_then_attachments() {
        let parts = prompt_parts(
            "look at these",
            &[
                Attachment::new("/tmp/b.png", Some("image/png".to_string())),
                Attachment::new("/tmp/a.txt", None),
            ],
        );
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], PromptPart::text("look at these"));
        assert_eq!(
            parts[1],
            PromptPart::File {
                mime: "image/png".to_string(),
                url: "file:///tmp/b.png".to_string(),
                filename: Some("b.png".to_string()),
            }
        );
        match &parts[2] {
            PromptPart::File { mime, filename, .. } => {
                assert_eq!(mime, "application/octet-stream");
                assert_eq!(filename.as_deref(), Some("a.txt"));
            }
            other => panic!("expected file part, got {:?}", other),
        }
    }

    #[test]
    fn test_prompt_part_serialization() {
        let value = serde_json::to_value(PromptPart::text("hi")).unwrap();
        assert_eq!(value, json!({ "type": "text", "text": "hi" }));
    }

    #[test]
    fn test_request_directory() {
        let request = BackendRequest::SendPrompt {
            directory: None,
            session_id: "ses_1".to_string(),
            parts: vec![],
        };
        assert!(request.directory().is_none());
        assert_eq!(request.name(), "send_prompt");

        let request = BackendRequest::CreateSession {
            directory: PathBuf::from("/work/a"),
            title: None,
        };
        assert_eq!(request.directory(), Some(Path::new("/work/a")));
    }
}
