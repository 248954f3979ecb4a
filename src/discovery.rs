//! Model discovery (C9): per-provider `staticList ∪ liveFetch` model enumeration for
//! `GET /v1/models`. Live fetches never fail the request — any upstream error falls
//! back to the static list alone.

use serde::Deserialize;
use serde_json::Value;

use crate::adapters::shared_http_client;
use crate::credentials::CredentialRecord;

/// Hardcoded fallback ids, used when a provider has no credential-derived base to
/// query or its live fetch fails outright.
#[must_use]
pub fn static_models(provider_id: &str) -> Vec<String> {
    let models: &[&str] = match provider_id {
        "openai" => &["gpt-4o", "gpt-4o-mini", "o3", "o3-mini"],
        "anthropic" | "anthropic-token" => &[
            "claude-opus-4-20250514",
            "claude-sonnet-4-20250514",
            "claude-3-5-haiku-20241022",
        ],
        "deepseek" => &["deepseek-chat", "deepseek-reasoner"],
        "xai" => &["grok-2-latest", "grok-beta"],
        "moonshot" => &["moonshot-v1-8k", "moonshot-v1-32k"],
        "zhipu" => &["glm-4-plus", "glm-4-flash"],
        "groq" => &["llama-3.3-70b-versatile", "mixtral-8x7b-32768"],
        "together" => &["meta-llama/Llama-3.3-70B-Instruct-Turbo"],
        "minimax" | "minimax-cn" => &["abab6.5s-chat"],
        "cerebras" => &["llama3.1-70b"],
        "mistral" => &["mistral-large-latest", "mistral-small-latest"],
        "huggingface" => &[],
        "opencode" => &[],
        "zai" => &[],
        "google" => &["gemini-2.0-flash", "gemini-1.5-pro"],
        "gemini-cli" | "antigravity" => &["gemini-2.0-flash", "gemini-2.5-pro"],
        "github-copilot" => &["gpt-4o", "claude-3.5-sonnet"],
        "openai-codex" => &["gpt-4o", "o3"],
        "qwen-cli" => &["qwen-max", "qwen-plus"],
        "azure" => &[],
        "vertex" => &["gemini-2.0-flash"],
        "bedrock" => &["anthropic.claude-3-5-sonnet-20241022-v2:0"],
        "cursor" => &["sonnet-4", "gpt-5"],
        "kimi-coding" => &["kimi-for-coding"],
        "vercel-ai-gateway" => &[],
        _ => &[],
    };
    models.iter().map(|s| (*s).to_string()).collect()
}

#[derive(Debug, Deserialize)]
struct OpenAiModelList {
    data: Vec<OpenAiModelEntry>,
}

#[derive(Debug, Deserialize)]
struct OpenAiModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicModelList {
    data: Vec<AnthropicModelEntry>,
}

#[derive(Debug, Deserialize)]
struct AnthropicModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OpenRouterModelList {
    data: Vec<OpenRouterModelEntry>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterModelEntry {
    id: String,
    #[serde(default)]
    supported_parameters: Vec<String>,
}

/// Enumerates the live model set for `provider_id` against `record`, unioned with
/// `static_models`. Never returns an error; any fetch failure just yields the static
/// list unmodified.
pub async fn discover_models(provider_id: &str, record: &CredentialRecord) -> Vec<String> {
    let mut models = static_models(provider_id);
    let live = fetch_live_models(provider_id, record).await.unwrap_or_default();
    for model in live {
        if !models.contains(&model) {
            models.push(model);
        }
    }
    models
}

async fn fetch_live_models(provider_id: &str, record: &CredentialRecord) -> Option<Vec<String>> {
    match provider_id {
        "openrouter" => fetch_openrouter_models(record.api_key.as_deref()?).await,
        "anthropic" => fetch_anthropic_models("x-api-key", record.api_key.as_deref()?).await,
        "anthropic-token" => fetch_anthropic_models("authorization", record.api_key.as_deref()?).await,
        "ollama" | "litellm" => {
            let base = record.project_id.as_deref()?;
            fetch_openai_compatible_models(base, record.api_key.as_deref()).await
        }
        "openai" | "xai" | "moonshot" | "zhipu" | "groq" | "together" | "deepseek" | "cerebras"
        | "mistral" | "huggingface" | "opencode" | "zai" => {
            fetch_models_dev_fallback(provider_id).await
        }
        "gemini-cli" | "antigravity" => {
            let mut internal = fetch_models_dev_fallback(provider_id).await.unwrap_or_default();
            internal.extend(static_models(provider_id));
            Some(internal)
        }
        _ => None,
    }
}

async fn fetch_openrouter_models(api_key: &str) -> Option<Vec<String>> {
    let resp = shared_http_client()
        .get("https://openrouter.ai/api/v1/models")
        .bearer_auth(api_key)
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let parsed: OpenRouterModelList = resp.json().await.ok()?;
    Some(
        parsed
            .data
            .into_iter()
            .filter(|m| m.supported_parameters.iter().any(|p| p == "tools"))
            .map(|m| m.id)
            .collect(),
    )
}

async fn fetch_anthropic_models(auth_header: &str, api_key: &str) -> Option<Vec<String>> {
    let mut builder = shared_http_client()
        .get("https://api.anthropic.com/v1/models")
        .header("anthropic-version", "2023-06-01");
    builder = if auth_header == "x-api-key" {
        builder.header("x-api-key", api_key)
    } else {
        builder.bearer_auth(api_key)
    };
    let resp = builder.send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let parsed: AnthropicModelList = resp.json().await.ok()?;
    Some(parsed.data.into_iter().map(|m| m.id).collect())
}

async fn fetch_openai_compatible_models(base_url: &str, api_key: Option<&str>) -> Option<Vec<String>> {
    let mut builder = shared_http_client().get(format!("{}/models", base_url.trim_end_matches('/')));
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key);
    }
    let resp = builder.send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let parsed: OpenAiModelList = resp.json().await.ok()?;
    Some(parsed.data.into_iter().map(|m| m.id).collect())
}

/// Fallback: `models.dev/api.json` enumerates every known provider's catalog; we
/// filter to `provider_id`'s entries with `tool_call == true`.
async fn fetch_models_dev_fallback(provider_id: &str) -> Option<Vec<String>> {
    let resp = shared_http_client()
        .get("https://models.dev/api.json")
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let parsed: Value = resp.json().await.ok()?;
    let provider_entry = parsed.get(provider_id)?;
    let models = provider_entry.get("models")?.as_object()?;
    Some(
        models
            .iter()
            .filter(|(_, model)| model.get("tool_call").and_then(Value::as_bool).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_models_nonempty_for_major_providers() {
        assert!(!static_models("openai").is_empty());
        assert!(!static_models("anthropic").is_empty());
        assert!(!static_models("bedrock").is_empty());
    }

    #[test]
    fn static_models_empty_for_unknown_provider_is_not_a_panic() {
        assert!(static_models("does-not-exist").is_empty());
    }
}
