//! `login [--provider ID]`: collects one provider's credential and writes it through
//! the credential store (C1). OAuth providers run the real PKCE or device-code flow
//! (§4.8); everything else is a prompted API key plus whatever overloaded field that
//! provider's binding policy (§4.2) needs in `project_id`.

use std::path::PathBuf;

use ai_gateway::credentials::{CredentialKind, CredentialRecord, CredentialStore};
use ai_gateway::oauth;
use ai_gateway::registry::known_provider_ids;

const PKCE_PROVIDERS: &[&str] = &["openai-codex", "gemini-cli", "antigravity"];
const DEVICE_PROVIDERS: &[&str] = &["qwen-cli", "github-copilot"];

pub async fn run(provider_id: &str, credentials_path: PathBuf) -> i32 {
    if provider_id == "cursor" {
        eprintln!("cursor has no credentials to store; it spawns cursor-agent directly.");
        return 0;
    }

    if !known_provider_ids().contains(&provider_id) {
        eprintln!(
            "Unknown provider {provider_id:?}. Known providers: {}",
            known_provider_ids().join(", ")
        );
        return 1;
    }

    let record = if PKCE_PROVIDERS.contains(&provider_id) {
        oauth::login_pkce(provider_id).await
    } else if DEVICE_PROVIDERS.contains(&provider_id) {
        oauth::login_device(provider_id).await
    } else {
        Ok(prompt_key_record(provider_id))
    };

    let record = match record {
        Ok(record) => record,
        Err(err) => {
            eprintln!("Login failed for {provider_id}: {err}");
            return 1;
        }
    };

    let store = CredentialStore::load(credentials_path);
    if let Err(err) = store.put(provider_id, record) {
        eprintln!("Failed to write credential file: {err}");
        return 1;
    }

    eprintln!("Stored credentials for {provider_id}.");
    0
}

/// Prompts for the fields a non-OAuth provider's binding policy (§4.2) needs. Most
/// providers need only an API key in `api_key`; `ollama`/`litellm` overload it with a
/// base URL, `vertex` overloads it with a region, and `bedrock` overloads it with an
/// AWS access key id, with the remaining fields carried in `project_id`/`refresh` per
/// the glossary.
fn prompt_key_record(provider_id: &str) -> CredentialRecord {
    let (api_key, project_id, refresh) = match provider_id {
        "ollama" | "litellm" => (
            super::prompt(&format!("{provider_id} API key")),
            Some(super::prompt("Base URL")),
            None,
        ),
        "azure" => (
            super::prompt(&format!("{provider_id} API key")),
            Some(super::prompt("Azure resource name")),
            None,
        ),
        "vertex" => (
            super::prompt("GCP region (e.g. us-central1)"),
            Some(super::prompt("GCP project id")),
            Some(super::prompt("ADC access token")),
        ),
        "bedrock" => (
            super::prompt("AWS access key id"),
            Some(super::prompt("AWS region")),
            Some(super::prompt("AWS secret access key")),
        ),
        _ => (super::prompt(&format!("{provider_id} API key")), None, None),
    };

    CredentialRecord {
        api_key: Some(api_key),
        refresh,
        expires_at_epoch_ms: None,
        project_id,
        kind: Some(CredentialKind::Key),
        enabled_models: Vec::new(),
    }
}
