use copilot_core::protocol::{CopilotRequest, CopilotResponse};
use uuid::Uuid;

use crate::context::AppContext;

pub async fn handle_request(request: CopilotRequest, ctx: &AppContext) -> CopilotResponse {
    match request {
        CopilotRequest::Ping => CopilotResponse::pong(),
        CopilotRequest::Health => match ctx.copilot.store().health().await {
            Ok(backend) => CopilotResponse::ok(serde_json::json!({
                "status": "healthy",
                "store": ctx.copilot.store().name(),
                "backend": backend,
            })),
            Err(e) => CopilotResponse::err(format!("Store health check failed: {}", e)),
        },
        CopilotRequest::Chat { thread_id, message } => {
            let thread_id = thread_id
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let handle = ctx.sessions.get_or_create(&thread_id).await;
            let mut session = handle.lock().await;

            match ctx.copilot.handle_turn(&mut session, &message).await {
                Ok(reply) => CopilotResponse::ok(serde_json::json!({
                    "response": reply.text,
                    "thread_id": thread_id,
                    "awaiting_confirmation": reply.awaiting_confirmation,
                    "kind": reply.kind,
                })),
                Err(e) => {
                    tracing::error!(session = %thread_id, error = %e, "Turn failed");
                    CopilotResponse::err(e.to_string())
                }
            }
        }
        CopilotRequest::Reset { thread_id } => {
            let existed = ctx.sessions.reset(&thread_id).await;
            CopilotResponse::ok(serde_json::json!({
                "reset": true,
                "thread_id": thread_id,
                "existed": existed,
            }))
        }
        CopilotRequest::Stats => match ctx.copilot.stats().await {
            Ok(counts) => CopilotResponse::ok(serde_json::json!({
                "counts": counts,
                "sessions": ctx.sessions.len().await,
            })),
            Err(e) => CopilotResponse::err(e.to_string()),
        },
    }
}
