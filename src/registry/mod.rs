//! Provider Registry (C2): the closed provider-id -> adapter-factory map. Resolves a
//! qualified `provider/model` id against the credential store, refreshing an
//! OAuth-backed record first if it's within five minutes of expiry, and returns a
//! `LanguageModel` handle bound to that provider+model+credential.

use std::sync::Arc;

use crate::adapters::anthropic_compat::{AnthropicAuth, AnthropicCompatAdapter};
use crate::adapters::bearer::{BearerAdapter, BearerAuth};
use crate::adapters::bedrock::BedrockAdapter;
use crate::adapters::code_assist::CodeAssistAdapter;
use crate::adapters::cursor_subprocess::CursorSubprocessAdapter;
use crate::adapters::SharedLanguageModel;
use crate::credentials::{CredentialRecord, CredentialStore};
use crate::error::GatewayError;
use crate::oauth;

const REFRESH_MARGIN_MS: i64 = 5 * 60 * 1000;

/// Every provider id the gateway recognizes. A `provider/model` id whose provider
/// segment isn't in this list fails fast with `GatewayError::UnknownProvider`.
const KNOWN_PROVIDERS: &[&str] = &[
    "openai",
    "deepseek",
    "openrouter",
    "xai",
    "moonshot",
    "zhipu",
    "groq",
    "together",
    "minimax",
    "cerebras",
    "mistral",
    "huggingface",
    "opencode",
    "zai",
    "ollama",
    "litellm",
    "anthropic",
    "anthropic-token",
    "minimax-cn",
    "kimi-coding",
    "vercel-ai-gateway",
    "google",
    "gemini-cli",
    "antigravity",
    "github-copilot",
    "openai-codex",
    "qwen-cli",
    "azure",
    "vertex",
    "bedrock",
    "cursor",
];

/// Splits `"provider/model"` into its two segments.
pub fn split_provider_model(id: &str) -> Result<(&str, &str), GatewayError> {
    id.split_once('/')
        .filter(|(_, model)| !model.is_empty())
        .ok_or_else(|| GatewayError::BadRequest(format!("model id must be \"provider/model\", got {id:?}")))
}

#[must_use]
pub fn is_known_provider(provider_id: &str) -> bool {
    KNOWN_PROVIDERS.contains(&provider_id)
}

/// Every registered provider id, in the order `KNOWN_PROVIDERS` declares them. Used
/// by the `login` CLI entry point to list choices and validate `--provider`.
#[must_use]
pub fn known_provider_ids() -> &'static [&'static str] {
    KNOWN_PROVIDERS
}

/// Resolves a qualified `provider/model` id into a bound `LanguageModel`, refreshing
/// OAuth credentials first if needed.
pub async fn resolve(
    store: &Arc<CredentialStore>,
    qualified_model: &str,
) -> Result<SharedLanguageModel, GatewayError> {
    let (provider_id, model) = split_provider_model(qualified_model)?;

    if !is_known_provider(provider_id) {
        return Err(GatewayError::UnknownProvider(provider_id.to_string()));
    }

    if provider_id == "cursor" {
        return Ok(Arc::new(CursorSubprocessAdapter::new(model.to_string())));
    }

    let record = ensure_fresh_credential(store, provider_id).await?;
    build_adapter(store, provider_id, model, record)
}

/// Refreshes `provider_id`'s credential record if it's OAuth-backed and within five
/// minutes of expiry, persisting the refreshed record under the provider's lock.
async fn ensure_fresh_credential(
    store: &Arc<CredentialStore>,
    provider_id: &str,
) -> Result<CredentialRecord, GatewayError> {
    let slot = store.provider_lock(provider_id);
    let now_ms = i64::try_from(crate::util::unix_now_secs()).unwrap_or(0) * 1000;

    let needs_refresh = {
        let record = slot.lock();
        record.is_oauth() && record.expiring_within(now_ms, REFRESH_MARGIN_MS)
    };

    if !needs_refresh {
        let record = slot.lock().clone();
        if record.api_key.is_none() && record.kind.is_none() {
            return Err(GatewayError::NoCredentials(provider_id.to_string()));
        }
        return Ok(record);
    }

    let stale = slot.lock().clone();
    let refreshed = oauth::refresh_credential(provider_id, &stale)
        .await
        .map_err(|e| GatewayError::AuthRefreshFailed(format!("{provider_id}: {e}")))?;

    *slot.lock() = refreshed.clone();
    store
        .put(provider_id, refreshed.clone())
        .map_err(|e| GatewayError::Internal(format!("failed to persist refreshed credential: {e}")))?;

    Ok(refreshed)
}

fn build_adapter(
    store: &Arc<CredentialStore>,
    provider_id: &str,
    model: &str,
    record: CredentialRecord,
) -> Result<SharedLanguageModel, GatewayError> {
    match provider_id {
        "openai" => bearer(record, "https://api.openai.com/v1", model, BearerAuth::Bearer, Vec::new()),
        "deepseek" => bearer(record, "https://api.deepseek.com/v1", model, BearerAuth::Bearer, Vec::new()),
        "openrouter" => bearer(record, "https://openrouter.ai/api/v1", model, BearerAuth::Bearer, Vec::new()),
        "xai" => bearer(record, "https://api.x.ai/v1", model, BearerAuth::Bearer, Vec::new()),
        "moonshot" => bearer(record, "https://api.moonshot.ai/v1", model, BearerAuth::Bearer, Vec::new()),
        "zhipu" => bearer(
            record,
            "https://open.bigmodel.cn/api/paas/v4",
            model,
            BearerAuth::Bearer,
            Vec::new(),
        ),
        "groq" => bearer(record, "https://api.groq.com/openai/v1", model, BearerAuth::Bearer, Vec::new()),
        "together" => bearer(record, "https://api.together.xyz/v1", model, BearerAuth::Bearer, Vec::new()),
        "minimax" => bearer(record, "https://api.minimax.chat/v1", model, BearerAuth::Bearer, Vec::new()),
        "cerebras" => bearer(record, "https://api.cerebras.ai/v1", model, BearerAuth::Bearer, Vec::new()),
        "mistral" => bearer(record, "https://api.mistral.ai/v1", model, BearerAuth::Bearer, Vec::new()),
        "huggingface" => bearer(
            record,
            "https://api-inference.huggingface.co/v1",
            model,
            BearerAuth::Bearer,
            Vec::new(),
        ),
        "opencode" => bearer(record, "https://opencode.ai/zen/v1", model, BearerAuth::Bearer, Vec::new()),
        "zai" => bearer(record, "https://api.z.ai/api/paas/v4", model, BearerAuth::Bearer, Vec::new()),
        "ollama" | "litellm" => {
            let base = record
                .project_id
                .clone()
                .ok_or_else(|| GatewayError::NoCredentials(format!("{provider_id} requires a base URL in projectId")))?;
            bearer(record, &base, model, BearerAuth::Bearer, Vec::new())
        }

        "anthropic" => anthropic(record, "https://api.anthropic.com", model, AnthropicAuth::ApiKeyHeader),
        "anthropic-token" => anthropic(
            record,
            "https://api.anthropic.com",
            model,
            AnthropicAuth::BearerWithHeaders(vec![
                ("anthropic-beta", "oauth-2025-04-20".to_string()),
                ("user-agent", "ai-gateway/0.1.0".to_string()),
                ("x-app", "cli".to_string()),
            ]),
        ),
        "minimax-cn" => anthropic(record, "https://api.minimaxi.chat", model, AnthropicAuth::ApiKeyHeader),
        "kimi-coding" => anthropic(record, "https://api.moonshot.ai/anthropic", model, AnthropicAuth::ApiKeyHeader),
        "vercel-ai-gateway" => anthropic(record, "https://ai-gateway.vercel.sh/v1", model, AnthropicAuth::ApiKeyHeader),

        "google" => bearer(
            record,
            "https://generativelanguage.googleapis.com/v1beta/openai",
            model,
            BearerAuth::QueryParam("key"),
            Vec::new(),
        ),

        "gemini-cli" => code_assist(store, record, "https://cloudcode-pa.googleapis.com", model, provider_id),
        "antigravity" => code_assist(store, record, "https://daedalus-pa.googleapis.com", model, provider_id),

        "github-copilot" => {
            let base = record
                .project_id
                .clone()
                .unwrap_or_else(|| "https://api.individual.githubcopilot.com".to_string());
            bearer(
                record,
                &base,
                model,
                BearerAuth::Bearer,
                vec![
                    ("editor-version", "vscode/1.0.0".to_string()),
                    ("copilot-integration-id", "vscode-chat".to_string()),
                ],
            )
        }

        "openai-codex" => {
            let api_key = record
                .api_key
                .clone()
                .ok_or_else(|| GatewayError::NoCredentials(provider_id.to_string()))?;
            let account_id = record.project_id.clone().unwrap_or_default();
            Ok(Arc::new(
                BearerAdapter::new("https://chatgpt.com/backend-api".to_string(), api_key, model.to_string())
                    .with_auth(BearerAuth::Bearer)
                    .with_extra_headers(vec![("chatgpt-account-id", account_id)])
                    .with_endpoint_override("https://chatgpt.com/backend-api/codex/responses".to_string()),
            ))
        }

        "qwen-cli" => {
            let api_key = record
                .api_key
                .clone()
                .ok_or_else(|| GatewayError::NoCredentials(provider_id.to_string()))?;
            let base = record
                .project_id
                .clone()
                .map(|url| normalize_qwen_resource_url(&url))
                .unwrap_or_else(|| "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string());
            bearer(
                CredentialRecord {
                    api_key: Some(api_key),
                    ..record
                },
                &base,
                model,
                BearerAuth::Bearer,
                Vec::new(),
            )
        }

        "azure" => {
            let api_key = record
                .api_key
                .clone()
                .ok_or_else(|| GatewayError::NoCredentials(provider_id.to_string()))?;
            let resource = record
                .project_id
                .clone()
                .ok_or_else(|| GatewayError::NoCredentials("azure requires projectId=resource name".to_string()))?;
            let endpoint = format!(
                "https://{resource}.openai.azure.com/openai/deployments/{model}/chat/completions?api-version=2024-10-21"
            );
            Ok(Arc::new(
                BearerAdapter::new(format!("https://{resource}.openai.azure.com"), api_key, model.to_string())
                    .with_auth(BearerAuth::Header("api-key"))
                    .with_endpoint_override(endpoint),
            ))
        }

        "vertex" => {
            let project_id = record
                .project_id
                .clone()
                .ok_or_else(|| GatewayError::NoCredentials("vertex requires projectId=GCP project".to_string()))?;
            let location = record.api_key.clone().unwrap_or_else(|| "us-central1".to_string());
            let access_token = record
                .refresh
                .clone()
                .ok_or_else(|| GatewayError::NoCredentials("vertex requires an ADC access token in refresh".to_string()))?;
            let base = format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project_id}/locations/{location}/publishers/google/models/{model}"
            );
            Ok(Arc::new(
                BearerAdapter::new(base, access_token, model.to_string()).with_auth(BearerAuth::Bearer),
            ))
        }

        "bedrock" => {
            let access_key = record
                .api_key
                .clone()
                .ok_or_else(|| GatewayError::NoCredentials("bedrock requires apiKey=AWS access key".to_string()))?;
            let region = record
                .project_id
                .clone()
                .ok_or_else(|| GatewayError::NoCredentials("bedrock requires projectId=AWS region".to_string()))?;
            let secret_key = record
                .refresh
                .clone()
                .ok_or_else(|| GatewayError::NoCredentials("bedrock requires refresh=AWS secret key".to_string()))?;
            Ok(Arc::new(BedrockAdapter::new(access_key, secret_key, region, model.to_string())))
        }

        "cursor" => unreachable!("cursor is handled before credential lookup"),

        other => Err(GatewayError::UnknownProvider(other.to_string())),
    }
}

fn bearer(
    record: CredentialRecord,
    base_url: &str,
    model: &str,
    auth: BearerAuth,
    extra_headers: Vec<(&'static str, String)>,
) -> Result<SharedLanguageModel, GatewayError> {
    let api_key = record.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        return Err(GatewayError::NoCredentials(base_url.to_string()));
    }
    Ok(Arc::new(
        BearerAdapter::new(base_url.to_string(), api_key, model.to_string())
            .with_auth(auth)
            .with_extra_headers(extra_headers),
    ))
}

fn anthropic(
    record: CredentialRecord,
    base_url: &str,
    model: &str,
    auth: AnthropicAuth,
) -> Result<SharedLanguageModel, GatewayError> {
    let api_key = record
        .api_key
        .ok_or_else(|| GatewayError::NoCredentials(base_url.to_string()))?;
    Ok(Arc::new(AnthropicCompatAdapter::new(
        base_url.to_string(),
        api_key,
        model.to_string(),
        auth,
    )))
}

fn code_assist(
    store: &Arc<CredentialStore>,
    record: CredentialRecord,
    base_url: &str,
    model: &str,
    provider_id: &str,
) -> Result<SharedLanguageModel, GatewayError> {
    let access_token = record
        .api_key
        .ok_or_else(|| GatewayError::NoCredentials(provider_id.to_string()))?;
    Ok(Arc::new(CodeAssistAdapter::new(
        base_url.to_string(),
        access_token,
        model.to_string(),
        record.project_id,
        Arc::clone(store),
        provider_id.to_string(),
    )))
}

/// Qwen's token response carries a `resource_url` that must be normalized to end with
/// `/v1` before it can serve as a Chat-Completions-compatible base.
fn normalize_qwen_resource_url(resource_url: &str) -> String {
    let trimmed = resource_url.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_provider_model_rejects_missing_slash() {
        assert!(split_provider_model("gpt-4o").is_err());
    }

    #[test]
    fn split_provider_model_rejects_empty_model() {
        assert!(split_provider_model("openai/").is_err());
    }

    #[test]
    fn split_provider_model_accepts_nested_slashes_in_model() {
        let (provider, model) = split_provider_model("openrouter/anthropic/claude-3.5-sonnet").unwrap();
        assert_eq!(provider, "openrouter");
        assert_eq!(model, "anthropic/claude-3.5-sonnet");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(!is_known_provider("does-not-exist"));
    }

    #[test]
    fn normalize_qwen_resource_url_appends_v1() {
        assert_eq!(
            normalize_qwen_resource_url("https://dashscope-intl.aliyuncs.com"),
            "https://dashscope-intl.aliyuncs.com/v1"
        );
        assert_eq!(
            normalize_qwen_resource_url("https://dashscope-intl.aliyuncs.com/v1"),
            "https://dashscope-intl.aliyuncs.com/v1"
        );
    }
}
