pub mod config;
pub mod copilot;
pub mod db;
pub mod error;
pub mod executor;
pub mod gate;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod models;
pub mod operation;
pub mod protocol;
pub mod similarity;
pub mod store;

pub use config::CopilotConfig;
pub use copilot::{Copilot, ReplyKind, TurnReply};
pub use error::CopilotError;
pub use executor::{ExecutionOutcome, OperationExecutor};
pub use gate::{classify_reply, ConfirmationGate, Reply};
pub use intent::{Intent, IntentRouter};
pub use llm::{ChatMessage, LlmClient, LlmError, OpenAiChatClient, Role};
pub use memory::{ConversationMemory, Session, Turn, TurnRole};
pub use models::{EntityType, Record};
pub use operation::{Action, FilterOp, OperationDescriptor, PendingOperation, Predicate};
pub use store::{EntityStore, InMemoryStore, PgEntityStore, StoreError};
