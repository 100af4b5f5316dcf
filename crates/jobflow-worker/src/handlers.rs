use std::time::Duration;

use jobflow_core::{HandlerError, HandlerRegistry, JobContext};
use serde::Deserialize;

/// Handlers shipped with this binary. A real deployment would register its
/// own `job_type`s here; these exist to give the worker something to run
/// out of the box and to exercise every path through the state machine.
pub fn build_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register(
        "echo",
        std::sync::Arc::new(|ctx: JobContext, payload: serde_json::Value| {
            Box::pin(async move {
                tracing::info!(job_id = %ctx.job_id, tenant_id = %ctx.tenant_id, payload = %payload, "echo");
                Ok(())
            })
        }),
    );

    registry.register(
        "always_fail",
        std::sync::Arc::new(|ctx: JobContext, _payload: serde_json::Value| {
            Box::pin(async move {
                Err(HandlerError::handler_failure(format!(
                    "job {} deliberately fails",
                    ctx.job_id
                )))
            })
        }),
    );

    registry.register_with_timeout(
        "email_send",
        std::sync::Arc::new(|ctx: JobContext, payload: serde_json::Value| {
            Box::pin(async move {
                let request: EmailSendPayload = serde_json::from_value(payload)
                    .map_err(|e| HandlerError { code: "BAD_PAYLOAD".to_string(), message: e.to_string() })?;
                tracing::info!(job_id = %ctx.job_id, user_id = %request.user_id, template = %request.template, "sending email");
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
        }),
        Duration::from_secs(10),
    );

    registry
}

#[derive(Debug, Deserialize)]
struct EmailSendPayload {
    user_id: String,
    template: String,
}
