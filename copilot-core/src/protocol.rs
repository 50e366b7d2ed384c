//! Request/response envelope shared by the HTTP layer and its dispatcher.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CopilotRequest {
    Ping,
    Health,
    Chat {
        /// Generated when absent.
        #[serde(default)]
        thread_id: Option<String>,
        message: String,
    },
    Reset {
        thread_id: String,
    },
    Stats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl CopilotResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_uses_action_tag() {
        let req: CopilotRequest =
            serde_json::from_str(r#"{"action": "chat", "message": "hi"}"#).unwrap();
        assert_eq!(req, CopilotRequest::Chat { thread_id: None, message: "hi".into() });
    }

    #[test]
    fn error_response_has_no_data() {
        let resp = CopilotResponse::err("boom");
        assert!(!resp.is_ok());
        assert!(resp.data.is_none());
        assert_eq!(resp.error.as_deref(), Some("boom"));
    }
}
