//! One conversational turn: route, gate, execute, remember.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::CopilotConfig;
use crate::error::CopilotError;
use crate::executor::{did_you_mean, ExecutionOutcome, OperationExecutor};
use crate::gate::{classify_reply, ConfirmationGate, Reply};
use crate::intent::{Intent, IntentRouter};
use crate::llm::LlmClient;
use crate::memory::{Session, Turn};
use crate::models::EntityType;
use crate::operation::{PendingOperation, ValidatedOperation};
use crate::store::{EntityStore, StoreError};

const EMPTY_MESSAGE_REPLY: &str = "Please type a message.";
const RESET_REPLY: &str = "Conversation cleared. What would you like to do next?";
const DECLINED_REPLY: &str = "Okay, cancelled. Nothing was changed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    /// Answered by the model without touching the store.
    Direct,
    /// A mutating operation is waiting for yes/no.
    AwaitingConfirmation,
    /// A store operation ran.
    Executed,
    /// The store or validation rejected the operation.
    Rejected,
    Declined,
    Reset,
    EmptyMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReply {
    pub text: String,
    pub kind: ReplyKind,
    pub awaiting_confirmation: bool,
}

impl TurnReply {
    fn new(text: impl Into<String>, kind: ReplyKind) -> Self {
        Self {
            text: text.into(),
            awaiting_confirmation: kind == ReplyKind::AwaitingConfirmation,
            kind,
        }
    }
}

pub fn is_reset_command(message: &str) -> bool {
    matches!(message.trim().to_lowercase().as_str(), "/reset" | "/clear" | "reset")
}

pub struct Copilot {
    router: IntentRouter,
    executor: OperationExecutor,
    history_window: usize,
}

impl Copilot {
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<dyn EntityStore>, read_limit: u32, history_window: usize) -> Self {
        Self {
            router: IntentRouter::new(llm),
            executor: OperationExecutor::new(store, read_limit),
            history_window,
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, store: Arc<dyn EntityStore>, config: &CopilotConfig) -> Self {
        Self::new(llm, store, config.store.read_limit, config.memory.history_window)
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        self.executor.store()
    }

    /// Process one user message.
    ///
    /// The session is only modified when the turn succeeds. On error the
    /// memory, the pending operation, and the store are as they were.
    pub async fn handle_turn(&self, session: &mut Session, message: &str) -> Result<TurnReply, CopilotError> {
        let message = message.trim();
        if message.is_empty() {
            return Ok(TurnReply::new(EMPTY_MESSAGE_REPLY, ReplyKind::EmptyMessage));
        }
        if is_reset_command(message) {
            session.reset();
            tracing::info!(session = %session.key, "Session reset");
            return Ok(TurnReply::new(RESET_REPLY, ReplyKind::Reset));
        }

        let mut gate = session.gate.clone();
        let history = session.memory.recent(self.history_window);

        let reply = match gate.take() {
            Some(pending) => match classify_reply(message) {
                Reply::Affirmative => {
                    tracing::info!(session = %session.key, action = %pending.descriptor.action, "Operation confirmed");
                    self.run_confirmed(&pending).await?
                }
                Reply::Negative => {
                    tracing::info!(session = %session.key, "Operation declined");
                    TurnReply::new(DECLINED_REPLY, ReplyKind::Declined)
                }
                Reply::Other => {
                    tracing::info!(session = %session.key, "Pending operation discarded by new request");
                    self.route_and_respond(&mut gate, history, message).await?
                }
            },
            None => self.route_and_respond(&mut gate, history, message).await?,
        };

        session.gate = gate;
        session.memory.append(Turn::user(message));
        session.memory.append(Turn::assistant(reply.text.clone()));
        tracing::debug!(session = %session.key, kind = ?reply.kind, turns = session.memory.len(), "Turn complete");
        Ok(reply)
    }

    async fn route_and_respond(
        &self,
        gate: &mut ConfirmationGate,
        history: &[Turn],
        message: &str,
    ) -> Result<TurnReply, CopilotError> {
        let descriptor = match self.router.route(message, history).await? {
            Intent::Direct(text) => return Ok(TurnReply::new(text, ReplyKind::Direct)),
            Intent::DatabaseOp(descriptor) => descriptor,
        };

        let validated = match self.executor.prepare(&descriptor) {
            Ok(v) => v,
            Err(e) => {
                tracing::info!(entity = %descriptor.entity_type, action = %descriptor.action, error = %e, "Operation rejected");
                return Ok(TurnReply::new(OperationExecutor::explain(&e), ReplyKind::Rejected));
            }
        };

        if descriptor.action.is_mutating() {
            let prompt = gate.propose(PendingOperation::new(descriptor, message), &validated);
            Ok(TurnReply::new(prompt, ReplyKind::AwaitingConfirmation))
        } else {
            self.execute(&validated).await
        }
    }

    async fn run_confirmed(&self, pending: &PendingOperation) -> Result<TurnReply, CopilotError> {
        match self.executor.prepare(&pending.descriptor) {
            Ok(validated) => self.execute(&validated).await,
            Err(e) => Ok(TurnReply::new(OperationExecutor::explain(&e), ReplyKind::Rejected)),
        }
    }

    async fn execute(&self, op: &ValidatedOperation) -> Result<TurnReply, CopilotError> {
        match self.executor.execute(op).await {
            Ok(outcome) => {
                let mut text = self.executor.summarize(op, &outcome);
                if matches!(&outcome, ExecutionOutcome::Found(records) if records.is_empty()) {
                    self.append_suggestions(op, &mut text).await;
                }
                Ok(TurnReply::new(text, ReplyKind::Executed))
            }
            Err(e) if e.is_domain() => {
                tracing::info!(entity = %op.entity_type, action = %op.action, error = %e, "Operation failed");
                let mut text = OperationExecutor::explain(&e);
                if matches!(e, StoreError::NotFound(_)) {
                    self.append_suggestions(op, &mut text).await;
                }
                Ok(TurnReply::new(text, ReplyKind::Rejected))
            }
            Err(e) => Err(CopilotError::from_store(e)),
        }
    }

    /// After a miss on a name, offer similar names. A failed lookup only loses the hint.
    async fn append_suggestions(&self, op: &ValidatedOperation, text: &mut String) {
        match self.executor.suggest_names(op).await {
            Ok(names) => {
                if let Some(hint) = did_you_mean(&names) {
                    text.push('\n');
                    text.push_str(&hint);
                }
            }
            Err(e) => tracing::warn!(entity = %op.entity_type, error = %e, "Name suggestion lookup failed"),
        }
    }

    /// Record counts keyed by table name.
    pub async fn stats(&self) -> Result<BTreeMap<&'static str, i64>, CopilotError> {
        let mut counts = BTreeMap::new();
        for entity in EntityType::ALL {
            let n = self.store().count(entity).await.map_err(CopilotError::from_store)?;
            counts.insert(entity.table(), n);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_commands() {
        assert!(is_reset_command("/reset"));
        assert!(is_reset_command(" /CLEAR "));
        assert!(is_reset_command("reset"));
        assert!(!is_reset_command("reset the project status"));
    }

    #[test]
    fn only_confirmation_replies_are_awaiting() {
        assert!(TurnReply::new("x", ReplyKind::AwaitingConfirmation).awaiting_confirmation);
        assert!(!TurnReply::new("x", ReplyKind::Executed).awaiting_confirmation);
    }
}
