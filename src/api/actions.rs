//! Built-in actions served next to whatever the embedding application routes.

use chrono::Utc;
use serde_json::json;

use crate::crypto::keys::fingerprint;
use crate::pipeline::handler::{handler_fn, ActionRouter, HandlerContext, HandlerReply};

/// `ping`, `whoami` and `echo`.
pub fn builtin_actions() -> ActionRouter {
    ActionRouter::new()
        .route("ping", handler_fn(ping))
        .route("whoami", handler_fn(whoami))
        .route("echo", handler_fn(echo))
}

/// Liveness through the full pipeline. Meant to be configured as public.
async fn ping(_ctx: HandlerContext) -> anyhow::Result<HandlerReply> {
    Ok(HandlerReply::ok(json!({
        "pong": true,
        "time": Utc::now().timestamp(),
    })))
}

/// Describes the calling token, including the public key clients encrypt with.
async fn whoami(ctx: HandlerContext) -> anyhow::Result<HandlerReply> {
    let token = ctx
        .token
        .ok_or_else(|| anyhow::anyhow!("whoami requires an authenticated token"))?;
    let key_fingerprint = fingerprint(&token.public_key)?;

    Ok(HandlerReply::ok(json!({
        "id": token.id,
        "userId": token.user_id,
        "type": token.token_type.as_str(),
        "limit": token.api_limit,
        "windowSeconds": token.window_seconds,
        "publicKey": token.public_key,
        "fingerprint": key_fingerprint,
    })))
}

/// Returns the (decrypted) payload, signed with the caller's key.
async fn echo(ctx: HandlerContext) -> anyhow::Result<HandlerReply> {
    Ok(HandlerReply::ok(json!({
        "action": ctx.action,
        "payload": ctx.payload,
    }))
    .signed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::handler::ActionHandler;
    use axum::http::{Method, StatusCode};
    use serde_json::Value;
    use std::collections::HashMap;

    fn ctx(action: &str, payload: Value) -> HandlerContext {
        HandlerContext {
            action: action.to_string(),
            method: Method::POST,
            token: None,
            payload,
            query: HashMap::new(),
            remote_addr: None,
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let reply = builtin_actions().handle(ctx("ping", Value::Null)).await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["pong"], true);
        assert!(!reply.sign);
    }

    #[tokio::test]
    async fn test_echo_requests_signature() {
        let reply = builtin_actions()
            .handle(ctx("echo", json!({"x": 1})))
            .await
            .unwrap();
        assert!(reply.sign);
        assert_eq!(reply.body, json!({"action": "echo", "payload": {"x": 1}}));
    }

    #[tokio::test]
    async fn test_whoami_without_token_fails() {
        assert!(builtin_actions()
            .handle(ctx("whoami", Value::Null))
            .await
            .is_err());
    }
}
