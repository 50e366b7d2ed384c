//! Intent routing: ask the model whether a message is a database operation or
//! something to answer directly, and extract the operation's parameters.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::llm::{ChatMessage, LlmClient, LlmError};
use crate::memory::{Turn, TurnRole};
use crate::models::{ColumnKind, EntityType};
use crate::operation::OperationDescriptor;

const FALLBACK_REPLY: &str = "Sorry, I couldn't come up with an answer to that. Could you rephrase?";

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Direct(String),
    DatabaseOp(OperationDescriptor),
}

/// The JSON shape the model is asked to produce.
#[derive(Debug, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
enum RouterReply {
    Direct {
        response: String,
    },
    #[serde(alias = "database_op", alias = "db")]
    Database {
        operation: OperationDescriptor,
    },
}

pub struct IntentRouter {
    llm: Arc<dyn LlmClient>,
}

impl IntentRouter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Classify `message` given recent `history`.
    ///
    /// Malformed model output gets one corrective retry and then degrades to a
    /// direct reply. Only transport failures are returned as errors.
    pub async fn route(&self, message: &str, history: &[Turn]) -> Result<Intent, LlmError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt(Utc::now())));
        messages.extend(history.iter().map(|turn| match turn.role {
            TurnRole::User => ChatMessage::user(turn.text.clone()),
            TurnRole::Assistant => ChatMessage::assistant(turn.text.clone()),
        }));
        messages.push(ChatMessage::user(message));

        let raw = self.llm.complete(&messages).await?;
        let problem = match parse_reply(&raw) {
            Ok(intent) => return Ok(intent),
            Err(problem) => problem,
        };

        tracing::warn!(model = self.llm.name(), error = %problem, "Unparseable routing reply, retrying once");
        messages.push(ChatMessage::assistant(raw.clone()));
        messages.push(ChatMessage::user(format!(
            "Your previous reply could not be used ({}). Reply again with only one JSON object \
             in the format described in the instructions, and nothing else.",
            problem
        )));

        let retried = self.llm.complete(&messages).await?;
        match parse_reply(&retried) {
            Ok(intent) => Ok(intent),
            Err(problem) => {
                tracing::warn!(error = %problem, "Routing reply still unparseable, answering directly");
                let text = if retried.trim().is_empty() { raw } else { retried };
                Ok(Intent::Direct(direct_text(&text)))
            }
        }
    }
}

fn direct_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        FALLBACK_REPLY.to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_reply(raw: &str) -> Result<Intent, String> {
    let json = extract_json_object(raw).ok_or_else(|| "no JSON object found".to_string())?;
    let reply: RouterReply = serde_json::from_str(json).map_err(|e| e.to_string())?;
    Ok(match reply {
        RouterReply::Direct { response } => Intent::Direct(direct_text(&response)),
        RouterReply::Database { operation } => Intent::DatabaseOp(operation),
    })
}

/// First balanced `{...}` in `s`, skipping braces inside string literals.
pub(crate) fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Instructions for the routing model, including the schema and the clock.
pub fn system_prompt(now: DateTime<Utc>) -> String {
    let mut entities = String::new();
    for entity in EntityType::ALL {
        entities.push_str(&format!("- {} (table {}):\n", entity, entity.table()));
        for column in entity.columns() {
            let mut line = format!("    {}", column.name);
            match column.kind {
                ColumnKind::Id => line.push_str(" (id, read-only)"),
                ColumnKind::Timestamp if !column.writable => line.push_str(" (set automatically)"),
                ColumnKind::Timestamp => line.push_str(" (date, YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)"),
                ColumnKind::Reference => line.push_str(" (id of the related record)"),
                ColumnKind::Choice { values, .. } => {
                    line.push_str(&format!(" (one of: {})", values.join(" | ")))
                }
                ColumnKind::Text if !column.nullable => line.push_str(" (required)"),
                ColumnKind::Text => {}
            }
            entities.push_str(&line);
            entities.push('\n');
        }
    }

    format!(
        r#"You are a personal assistant that manages projects, tasks and clients stored in a database.

Current date and time: {now} ({weekday}, UTC).

For every user message decide whether it needs the database or can be answered directly
(greetings, general questions, date and time, advice). Reply with exactly one JSON object and no other text.

Direct answer:
{{"intent": "direct", "response": "<your answer>"}}

Database operation:
{{"intent": "database", "operation": {{
  "entity_type": "project" | "task" | "client",
  "action": "create" | "read" | "update" | "delete",
  "fields": {{ "<field>": <value> }},
  "filters": {{ "<field>": <value> | {{"op": "eq" | "ne" | "contains" | "similar" | "lt" | "lte" | "gt" | "gte", "value": <value>}} }}
}}}}

Rules:
- create: put the new record's values in "fields"; "name" is required; leave "filters" empty.
- read: put search conditions in "filters"; use {{"op": "contains"}} for partial name matches and {{"op": "similar"}} when the user may have misspelled a name.
- update: "filters" must identify exactly one record (prefer "id" when the user gives one); "fields" holds the new values.
- delete: "filters" must identify exactly one record.
- Use only the fields listed below and the exact spellings of enumerated values.
- Resolve relative dates ("tomorrow", "next Friday") against the current date.
- When the user refers to a record from earlier in the conversation, reuse its id.

Entities:
{entities}"#,
        now = now.format("%Y-%m-%d %H:%M:%S"),
        weekday = now.format("%A"),
        entities = entities,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Action, FilterOp};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned model outputs and records every transcript it receives.
    struct Scripted {
        replies: Mutex<Vec<Result<String, LlmError>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies), calls: Mutex::new(Vec::new()) })
        }

        fn calls(&self) -> Vec<Vec<ChatMessage>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for Scripted {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            self.replies.lock().unwrap().remove(0)
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn ok(s: &str) -> Result<String, LlmError> {
        Ok(s.to_string())
    }

    #[test]
    fn extract_skips_braces_in_strings() {
        let raw = r#"Sure! ```json
{"intent": "direct", "response": "use {curly} braces"}
``` hope that helps"#;
        assert_eq!(
            extract_json_object(raw),
            Some(r#"{"intent": "direct", "response": "use {curly} braces"}"#)
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{\"unterminated\": 1"), None);
    }

    #[test]
    fn prompt_lists_enums_and_clock() {
        let now = DateTime::parse_from_rfc3339("2025-03-14T09:30:00Z").unwrap().with_timezone(&Utc);
        let prompt = system_prompt(now);
        assert!(prompt.contains("2025-03-14 09:30:00 (Friday"));
        assert!(prompt.contains("P1 | P2 | P3"));
        assert!(prompt.contains("Waiting for Feedback"));
        assert!(prompt.contains(r#"{"op": "similar"}"#));
        assert!(prompt.contains("client_id (id of the related record)"));
    }

    #[tokio::test]
    async fn routes_database_operation() {
        let llm = Scripted::new(vec![ok(r#"{"intent": "database", "operation": {
            "entity_type": "project", "action": "create",
            "fields": {"name": "Q1 Planning", "priority": "high"}, "filters": {}}}"#)]);
        let router = IntentRouter::new(llm.clone());

        let intent = router
            .route("Create a project called 'Q1 Planning' with high priority", &[])
            .await
            .unwrap();
        match intent {
            Intent::DatabaseOp(op) => {
                assert_eq!(op.entity_type, EntityType::Project);
                assert_eq!(op.action, Action::Create);
                assert_eq!(op.fields["name"], "Q1 Planning");
                assert_eq!(op.fields["priority"], "high");
            }
            other => panic!("expected database op, got {:?}", other),
        }
        assert_eq!(llm.calls().len(), 1);
    }

    #[tokio::test]
    async fn history_is_passed_in_order() {
        let llm = Scripted::new(vec![ok(r#"{"intent": "direct", "response": "Hi again"}"#)]);
        let router = IntentRouter::new(llm.clone());
        let history = vec![Turn::user("hello"), Turn::assistant("Hi! How can I help?")];

        let intent = router.route("hello again", &history).await.unwrap();
        assert_eq!(intent, Intent::Direct("Hi again".into()));

        let sent = &llm.calls()[0];
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].role, crate::llm::Role::System);
        assert_eq!(sent[1].content, "hello");
        assert_eq!(sent[2].role, crate::llm::Role::Assistant);
        assert_eq!(sent[3].content, "hello again");
    }

    #[tokio::test]
    async fn malformed_reply_is_retried_once_with_correction() {
        let llm = Scripted::new(vec![
            ok("I think you want a task"),
            ok(r#"{"intent": "database", "operation": {"entity_type": "tasks", "action": "read",
                "filters": {"name": {"op": "contains", "value": "deck"}}}}"#),
        ]);
        let router = IntentRouter::new(llm.clone());

        let intent = router.route("find the deck task", &[]).await.unwrap();
        let Intent::DatabaseOp(op) = intent else { panic!("expected database op") };
        assert_eq!(op.filters["name"].op, FilterOp::Contains);

        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        let correction = calls[1].last().unwrap();
        assert!(correction.content.contains("only one JSON object"));
    }

    #[tokio::test]
    async fn second_failure_falls_back_to_direct_text() {
        let llm = Scripted::new(vec![ok("It is sunny."), ok("Still sunny, no JSON.")]);
        let router = IntentRouter::new(llm.clone());

        let intent = router.route("weather?", &[]).await.unwrap();
        assert_eq!(intent, Intent::Direct("Still sunny, no JSON.".into()));
        assert_eq!(llm.calls().len(), 2);
    }

    #[tokio::test]
    async fn unknown_action_counts_as_malformed() {
        let llm = Scripted::new(vec![
            ok(r#"{"intent": "database", "operation": {"entity_type": "project", "action": "archive"}}"#),
            ok(r#"{"intent": "direct", "response": "I can create, read, update or delete."}"#),
        ]);
        let router = IntentRouter::new(llm);
        let intent = router.route("archive everything", &[]).await.unwrap();
        assert_eq!(intent, Intent::Direct("I can create, read, update or delete.".into()));
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let llm = Scripted::new(vec![Err(LlmError::RetryExhausted { attempts: 4 })]);
        let router = IntentRouter::new(llm);
        assert!(matches!(
            router.route("hi", &[]).await,
            Err(LlmError::RetryExhausted { attempts: 4 })
        ));
    }

    #[tokio::test]
    async fn empty_direct_response_gets_fallback_text() {
        let llm = Scripted::new(vec![ok(r#"{"intent": "direct", "response": "  "}"#)]);
        let router = IntentRouter::new(llm);
        assert_eq!(router.route("?", &[]).await.unwrap(), Intent::Direct(FALLBACK_REPLY.into()));
    }
}
