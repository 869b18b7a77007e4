// ABOUTME: HTTP transport for an OpenCode-style agent backend.
// ABOUTME: Maps BackendRequest variants onto REST routes scoped by a directory query parameter.

use super::request::BackendRequest;
use super::{AgentTransport, ProbeFailure};
use crate::error::{ConductorError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::time::Duration;

/// Route used for the liveness probe.
const PROBE_PATH: &str = "/config";

/// reqwest-backed transport.
pub struct HttpTransport {
    client: Client,
    probe_timeout: Duration,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration, probe_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConductorError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            probe_timeout,
        })
    }

    fn url(address: &str, path: &str, directory: Option<&std::path::Path>) -> Result<url::Url> {
        let mut url = url::Url::parse(&format!("{}{}", address, path))
            .map_err(|e| ConductorError::backend(format!("invalid backend URL: {}", e)))?;
        if let Some(directory) = directory {
            url.query_pairs_mut()
                .append_pair("directory", &directory.to_string_lossy());
        }
        Ok(url)
    }
}

/// Method, path, and body for a request.
fn route(request: &BackendRequest) -> (Method, String, Option<Value>) {
    match request {
        BackendRequest::CurrentProject { .. } => (Method::GET, "/project/current".into(), None),
        BackendRequest::ListSessions { .. } => (Method::GET, "/session".into(), None),
        BackendRequest::GetSession { session_id, .. } => {
            (Method::GET, format!("/session/{}", segment(session_id)), None)
        }
        BackendRequest::CreateSession { title, .. } => {
            let body = match title {
                Some(title) => json!({ "title": title }),
                None => json!({}),
            };
            (Method::POST, "/session".into(), Some(body))
        }
        BackendRequest::SendPrompt {
            session_id, parts, ..
        } => (
            Method::POST,
            format!("/session/{}/message", segment(session_id)),
            Some(json!({ "parts": parts })),
        ),
        BackendRequest::AbortSession { session_id, .. } => (
            Method::POST,
            format!("/session/{}/abort", segment(session_id)),
            None,
        ),
        BackendRequest::DeleteSession { session_id, .. } => (
            Method::DELETE,
            format!("/session/{}", segment(session_id)),
            None,
        ),
    }
}

/// Percent-encode an id so it stays a single path segment.
fn segment(id: &str) -> String {
    url::form_urlencoded::byte_serialize(id.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn probe(&self, address: &str) -> std::result::Result<(), ProbeFailure> {
        let url = Self::url(address, PROBE_PATH, None)
            .map_err(|e| ProbeFailure::Unreachable(e.to_string()))?;

        let resp = self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| ProbeFailure::Unreachable(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ProbeFailure::Rejected(format!("HTTP {}", resp.status())))
        }
    }

    async fn send(&self, address: &str, request: &BackendRequest) -> Result<Value> {
        let (method, path, body) = route(request);
        let url = Self::url(address, &path, request.directory())?;

        let mut req = self.client.request(method, url);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ConductorError::backend(format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ConductorError::backend(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(ConductorError::Backend {
                status: Some(status.as_u16()),
                message: format!("HTTP {} from backend: {}", status, text.trim()),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ConductorError::backend(format!("Failed to parse response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::request::PromptPart;
    use super::*;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_url_with_directory() {
        let url = HttpTransport::url(
            "http://127.0.0.1:4096",
            "/session",
            Some(Path::new("/work/my project")),
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:4096/session?directory=%2Fwork%2Fmy+project"
        );
    }

    #[test]
    fn test_url_without_directory() {
        let url = HttpTransport::url("http://127.0.0.1:4096", "/config", None).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:4096/config");
    }

    #[test]
    fn test_invalid_address() {
        let err = HttpTransport::url("not a url", "/config", None).unwrap_err();
        assert!(matches!(err, ConductorError::Backend { .. }));
    }

    #[test]
    fn test_routes() {
        let (method, path, body) = route(&BackendRequest::CreateSession {
            directory: PathBuf::from("/w"),
            title: Some("fix the build".to_string()),
        });
        assert_eq!(method, Method::POST);
        assert_eq!(path, "/session");
        assert_eq!(body, Some(json!({ "title": "fix the build" })));

        let (method, path, body) = route(&BackendRequest::SendPrompt {
            directory: None,
            session_id: "ses_1".to_string(),
            parts: vec![PromptPart::text("hello")],
        });
        assert_eq!(method, Method::POST);
        assert_eq!(path, "/session/ses_1/message");
        assert_eq!(
            body,
            Some(json!({ "parts": [{ "type": "text", "text": "hello" }] }))
        );

        let (method, path, _) = route(&BackendRequest::DeleteSession {
            directory: None,
            session_id: "ses_1".to_string(),
        });
        assert_eq!(method, Method::DELETE);
        assert_eq!(path, "/session/ses_1");

        let (method, path, _) = route(&BackendRequest::CurrentProject {
            directory: PathBuf::from("/w"),
        });
        assert_eq!(method, Method::GET);
        assert_eq!(path, "/project/current");
    }

    #[test]
    fn test_session_id_stays_one_segment() {
        let (_, path, _) = route(&BackendRequest::AbortSession {
            directory: None,
            session_id: "../a b".to_string(),
        });
        assert_eq!(path, "/session/..%2Fa%20b/abort");
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let transport =
            HttpTransport::new(Duration::from_secs(1), Duration::from_millis(500)).unwrap();
        // Port 1 on loopback is not expected to be listening.
        let result = transport.probe("http://127.0.0.1:1").await;
        assert!(matches!(result, Err(ProbeFailure::Unreachable(_))));
    }
}
