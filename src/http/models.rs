//! `GET /v1/models` handler: the cross-product of every provider with a stored
//! credential and that provider's discovered model ids, each exposed under a
//! qualified `provider/model`.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use crate::discovery;
use crate::util::unix_now_secs;

use super::AppState;

#[derive(Debug, Serialize)]
struct ModelEntry {
    id: String,
    object: &'static str,
    created: u64,
    owned_by: &'static str,
}

pub async fn handler(State(state): State<Arc<AppState>>) -> Response {
    let created = unix_now_secs();
    let mut entries = Vec::new();

    let mut providers: Vec<(String, crate::credentials::CredentialRecord)> =
        state.credentials.list().into_iter().collect();
    providers.sort_by(|a, b| a.0.cmp(&b.0));

    for (provider_id, record) in providers {
        let has_credential = record.api_key.is_some() || record.kind.is_some();
        if !has_credential {
            continue;
        }

        let models = if record.enabled_models.is_empty() {
            discovery::discover_models(&provider_id, &record).await
        } else {
            record.enabled_models.clone()
        };

        for model in models {
            entries.push(ModelEntry {
                id: format!("{provider_id}/{model}"),
                object: "model",
                created,
                owned_by: "ai-gateway",
            });
        }
    }

    axum::Json(json!({ "object": "list", "data": entries })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialKind, CredentialRecord, CredentialStore};
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn handler_lists_exactly_the_credentialed_cross_product() {
        let dir = std::env::temp_dir().join(format!("ai-gateway-http-models-test-{}", unix_now_secs()));
        let store = CredentialStore::load(dir.join("auth.json"));
        store
            .put(
                "openai",
                CredentialRecord {
                    api_key: Some("sk-test".to_string()),
                    enabled_models: vec!["gpt-4o-mini".to_string()],
                    kind: Some(CredentialKind::Key),
                    ..Default::default()
                },
            )
            .unwrap();

        let state = StdArc::new(AppState {
            credentials: StdArc::new(store),
        });
        let response = handler(State(state)).await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(parsed["object"], "list");
        let data = parsed["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["id"], "openai/gpt-4o-mini");
        assert_eq!(data[0]["object"], "model");
        assert_eq!(data[0]["owned_by"], "ai-gateway");
        assert!(data[0]["created"].is_u64());

        let _ = std::fs::remove_dir_all(dir);
    }
}
