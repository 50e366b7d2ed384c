use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use copilot_core::config::StoreBackend;
use copilot_core::{db, Copilot, CopilotConfig, EntityStore, InMemoryStore, LlmClient, OpenAiChatClient, PgEntityStore};

use crate::sessions::SessionRegistry;

/// Everything a request handler needs.
pub struct AppContext {
    pub copilot: Copilot,
    pub sessions: SessionRegistry,
}

impl AppContext {
    pub fn new(copilot: Copilot) -> Self {
        Self::with_sessions(copilot, SessionRegistry::new())
    }

    pub fn with_sessions(copilot: Copilot, sessions: SessionRegistry) -> Self {
        Self { copilot, sessions }
    }

    /// Connect the configured store and model client.
    pub async fn from_config(config: &CopilotConfig) -> Result<Self> {
        let store = connect_store(config).await?;
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiChatClient::new(config.llm.clone())?);
        tracing::info!(store = store.name(), model = llm.name(), "Copilot ready");

        let sessions = SessionRegistry::with_idle_ttl(Duration::from_secs(config.memory.session_idle_secs));
        Ok(Self::with_sessions(Copilot::from_config(llm, store, config), sessions))
    }
}

/// Open the configured record store, creating the schema when it is missing.
pub async fn connect_store(config: &CopilotConfig) -> Result<Arc<dyn EntityStore>> {
    let store: Arc<dyn EntityStore> = match config.store.backend {
        StoreBackend::Postgres => {
            let pool = db::create_pool(&config.database).await?;
            db::ensure_schema(&pool).await?;
            Arc::new(PgEntityStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; records are lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };
    Ok(store)
}
