//! OAuth flows (C8): PKCE authorization-code exchange, device-code exchange, and the
//! per-provider refresh operations the registry (C2) calls when a stored token is
//! within five minutes of expiry.

pub mod device_code;
pub mod pkce;

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;
use serde_json::Value;

use crate::adapters::{shared_http_client, truncate_body};
use crate::credentials::{CredentialKind, CredentialRecord};
use crate::error::GatewayError;

/// Subtracted from a server-reported expiry before it's stored, so the registry's
/// five-minute refresh check never races a token that's already dead on arrival.
pub const REFRESH_SAFETY_MARGIN_MS: i64 = 5 * 60 * 1000;

const CODEX_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const CODEX_AUTHORIZE_URL: &str = "https://auth.openai.com/oauth/authorize";
const CODEX_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
const CODEX_CALLBACK_PORT: u16 = 1455;
const CODEX_SCOPES: &str = "openid profile email offline_access";

const CODE_ASSIST_CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6avd8ed2oupgr.apps.googleusercontent.com";
const CODE_ASSIST_CLIENT_SECRET: &str = "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";
const CODE_ASSIST_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const CODE_ASSIST_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CODE_ASSIST_CALLBACK_PORT: u16 = 1455;
const CODE_ASSIST_SCOPES: &str =
    "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/userinfo.email";

const QWEN_CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";
const QWEN_DEVICE_CODE_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/device/code";
const QWEN_TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
const QWEN_SCOPE: &str = "openid profile email model.completion";

const GITHUB_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
const GITHUB_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_SCOPE: &str = "read:user";
const COPILOT_TOKEN_EXCHANGE_URL: &str = "https://api.github.com/copilot_internal/v2/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CopilotSessionTokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

fn expiry_epoch_ms(expires_in_secs: Option<i64>) -> Option<i64> {
    let secs = expires_in_secs?;
    let now_ms = i64::try_from(crate::util::unix_now_secs()).unwrap_or(0) * 1000;
    Some(now_ms + secs * 1000 - REFRESH_SAFETY_MARGIN_MS)
}

/// Splits a JWT on `.` and base64url-decodes the payload segment.
fn decode_jwt_payload(token: &str) -> Result<Value, GatewayError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| GatewayError::ProtocolParseFailed("malformed JWT: no payload segment".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| GatewayError::ProtocolParseFailed(format!("malformed JWT payload: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::ProtocolParseFailed(format!("JWT payload is not JSON: {e}")))
}

/// Extracts OpenAI's `chatgpt_account_id` claim from a Codex access token.
fn extract_chatgpt_account_id(access_token: &str) -> Result<String, GatewayError> {
    let payload = decode_jwt_payload(access_token)?;
    payload
        .get("https://api.openai.com/auth")
        .and_then(|auth| auth.get("chatgpt_account_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            GatewayError::ProtocolParseFailed(
                "codex token missing chatgpt_account_id claim".to_string(),
            )
        })
}

async fn exchange_authorization_code(
    token_url: &str,
    client_id: &str,
    client_secret: Option<&str>,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> Result<TokenResponse, GatewayError> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("client_id", client_id),
        ("code", code),
        ("code_verifier", verifier),
        ("redirect_uri", redirect_uri),
    ];
    if let Some(secret) = client_secret {
        form.push(("client_secret", secret));
    }

    let resp = shared_http_client()
        .post(token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(GatewayError::UpstreamRejected {
            status: status.as_u16(),
            body_excerpt: truncate_body(&text, 2048),
        });
    }

    resp.json()
        .await
        .map_err(|e| GatewayError::ProtocolParseFailed(e.to_string()))
}

async fn refresh_with_refresh_token(
    token_url: &str,
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> Result<TokenResponse, GatewayError> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("client_id", client_id),
        ("refresh_token", refresh_token),
    ];
    if let Some(secret) = client_secret {
        form.push(("client_secret", secret));
    }

    let resp = shared_http_client()
        .post(token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(GatewayError::UpstreamRejected {
            status: status.as_u16(),
            body_excerpt: truncate_body(&text, 2048),
        });
    }

    resp.json()
        .await
        .map_err(|e| GatewayError::ProtocolParseFailed(e.to_string()))
}

/// Runs the interactive PKCE login for `openai-codex` or one of the Code-Assist
/// providers (`gemini-cli`, `antigravity` — same Google OAuth client, distinct only in
/// which base URL the resulting token is later used against).
pub async fn login_pkce(provider_id: &str) -> Result<CredentialRecord, GatewayError> {
    let (authorize_url, token_url, client_id, client_secret, scopes, port) = match provider_id {
        "openai-codex" => (
            CODEX_AUTHORIZE_URL,
            CODEX_TOKEN_URL,
            CODEX_CLIENT_ID,
            None,
            CODEX_SCOPES,
            CODEX_CALLBACK_PORT,
        ),
        "gemini-cli" | "antigravity" => (
            CODE_ASSIST_AUTHORIZE_URL,
            CODE_ASSIST_TOKEN_URL,
            CODE_ASSIST_CLIENT_ID,
            Some(CODE_ASSIST_CLIENT_SECRET),
            CODE_ASSIST_SCOPES,
            CODE_ASSIST_CALLBACK_PORT,
        ),
        other => return Err(GatewayError::UnknownProvider(other.to_string())),
    };

    let (verifier, challenge) = pkce::generate_pkce();
    let state = pkce::generate_state();
    let redirect_uri = format!("http://localhost:{port}/auth/callback");

    let authorize_request = url::Url::parse_with_params(
        authorize_url,
        &[
            ("response_type", "code"),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri.as_str()),
            ("scope", scopes),
            ("state", state.as_str()),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
        ],
    )
    .map_err(|e| GatewayError::Internal(format!("failed to build authorize URL: {e}")))?;

    eprintln!("Open this URL to authorize {provider_id}:\n  {authorize_request}");
    let _ = open::that(authorize_request.as_str());

    let callback = pkce::wait_for_callback(port, &state, Duration::from_secs(60)).await;
    let code = match callback {
        Ok(code) => code,
        Err(_) => {
            eprintln!("Paste the authorization code (or the full redirect URL):");
            let mut input = String::new();
            std::io::stdin()
                .read_line(&mut input)
                .map_err(|e| GatewayError::Internal(e.to_string()))?;
            let (code, pasted_state) = pkce::parse_pasted_code(&input)?;
            if let Some(pasted_state) = pasted_state {
                if pasted_state != state {
                    return Err(GatewayError::BadRequest("oauth state mismatch".to_string()));
                }
            }
            code
        }
    };

    let token = exchange_authorization_code(
        token_url,
        client_id,
        client_secret,
        &code,
        &verifier,
        &redirect_uri,
    )
    .await?;

    let project_id = if provider_id == "openai-codex" {
        Some(extract_chatgpt_account_id(&token.access_token)?)
    } else {
        None
    };

    Ok(CredentialRecord {
        api_key: Some(token.access_token),
        refresh: token.refresh_token,
        expires_at_epoch_ms: expiry_epoch_ms(token.expires_in),
        project_id,
        kind: Some(CredentialKind::Oauth),
        enabled_models: Vec::new(),
    })
}

/// Runs the interactive device-code login for `qwen-cli` or `github-copilot`.
pub async fn login_device(provider_id: &str) -> Result<CredentialRecord, GatewayError> {
    let (device_code_url, token_url, client_id, scope) = match provider_id {
        "qwen-cli" => (QWEN_DEVICE_CODE_URL, QWEN_TOKEN_URL, QWEN_CLIENT_ID, QWEN_SCOPE),
        "github-copilot" => (GITHUB_DEVICE_CODE_URL, GITHUB_TOKEN_URL, GITHUB_CLIENT_ID, GITHUB_SCOPE),
        other => return Err(GatewayError::UnknownProvider(other.to_string())),
    };

    let device_code = device_code::request_device_code(device_code_url, client_id, scope).await?;
    eprintln!(
        "Go to {} and enter code: {}",
        device_code.verification_uri_complete.as_deref().unwrap_or(&device_code.verification_uri),
        device_code.user_code
    );

    let tokens = device_code::poll_for_token(token_url, client_id, &device_code).await?;

    if provider_id == "github-copilot" {
        return exchange_copilot_session(&tokens.access_token, tokens.refresh_token).await;
    }

    Ok(CredentialRecord {
        api_key: Some(tokens.access_token),
        refresh: tokens.refresh_token,
        expires_at_epoch_ms: expiry_epoch_ms(tokens.expires_in_secs),
        project_id: None,
        kind: Some(CredentialKind::Oauth),
        enabled_models: Vec::new(),
    })
}

/// Exchanges a GitHub access token for a short-lived Copilot session token, deriving
/// the provider's base URL from the returned token's `proxy-ep=` claim. The `project_id`
/// field is overloaded here to carry the derived base URL, and `refresh` carries the
/// long-lived GitHub token (device-code GitHub tokens don't expire, so re-exchanging
/// against `refresh` is how "refresh" is implemented for this provider).
async fn exchange_copilot_session(
    github_access_token: &str,
    github_refresh_token: Option<String>,
) -> Result<CredentialRecord, GatewayError> {
    let resp = shared_http_client()
        .get(COPILOT_TOKEN_EXCHANGE_URL)
        .bearer_auth(github_access_token)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(GatewayError::UpstreamRejected {
            status: status.as_u16(),
            body_excerpt: truncate_body(&text, 2048),
        });
    }

    let parsed: CopilotSessionTokenResponse = resp
        .json()
        .await
        .map_err(|e| GatewayError::ProtocolParseFailed(e.to_string()))?;

    let base_url = device_code::derive_copilot_base_url(&parsed.token);
    let expires_at_epoch_ms = parsed
        .expires_at
        .map(|secs| secs * 1000 - REFRESH_SAFETY_MARGIN_MS);

    Ok(CredentialRecord {
        api_key: Some(parsed.token),
        refresh: Some(github_refresh_token.unwrap_or_else(|| github_access_token.to_string())),
        expires_at_epoch_ms,
        project_id: Some(base_url),
        kind: Some(CredentialKind::Oauth),
        enabled_models: Vec::new(),
    })
}

/// Refreshes an OAuth-backed credential record for `provider_id`, returning the
/// updated record. Called by the registry (C2) when `expiring_within` reports the
/// stored token is within its safety margin of expiry.
pub async fn refresh_credential(
    provider_id: &str,
    record: &CredentialRecord,
) -> Result<CredentialRecord, GatewayError> {
    let refresh_token = record.refresh.clone().ok_or_else(|| {
        GatewayError::AuthRefreshFailed(format!("{provider_id} has no stored refresh token"))
    })?;

    match provider_id {
        "openai-codex" => {
            let token = refresh_with_refresh_token(CODEX_TOKEN_URL, CODEX_CLIENT_ID, None, &refresh_token).await?;
            let project_id = match extract_chatgpt_account_id(&token.access_token) {
                Ok(id) => Some(id),
                Err(_) => record.project_id.clone(),
            };
            Ok(CredentialRecord {
                api_key: Some(token.access_token),
                refresh: token.refresh_token.or(Some(refresh_token)),
                expires_at_epoch_ms: expiry_epoch_ms(token.expires_in),
                project_id,
                kind: Some(CredentialKind::Oauth),
                enabled_models: record.enabled_models.clone(),
            })
        }
        "gemini-cli" | "antigravity" => {
            let token = refresh_with_refresh_token(
                CODE_ASSIST_TOKEN_URL,
                CODE_ASSIST_CLIENT_ID,
                Some(CODE_ASSIST_CLIENT_SECRET),
                &refresh_token,
            )
            .await?;
            Ok(CredentialRecord {
                api_key: Some(token.access_token),
                refresh: token.refresh_token.or(Some(refresh_token)),
                expires_at_epoch_ms: expiry_epoch_ms(token.expires_in),
                project_id: record.project_id.clone(),
                kind: Some(CredentialKind::Oauth),
                enabled_models: record.enabled_models.clone(),
            })
        }
        "qwen-cli" => {
            let token = refresh_with_refresh_token(QWEN_TOKEN_URL, QWEN_CLIENT_ID, None, &refresh_token).await?;
            Ok(CredentialRecord {
                api_key: Some(token.access_token),
                refresh: token.refresh_token.or(Some(refresh_token)),
                expires_at_epoch_ms: expiry_epoch_ms(token.expires_in),
                project_id: record.project_id.clone(),
                kind: Some(CredentialKind::Oauth),
                enabled_models: record.enabled_models.clone(),
            })
        }
        "github-copilot" => exchange_copilot_session(&refresh_token, Some(refresh_token.clone())).await,
        other => Err(GatewayError::UnknownProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_chatgpt_account_id_reads_nested_claim() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::json!({
                "https://api.openai.com/auth": {"chatgpt_account_id": "acct_123"}
            })
            .to_string(),
        );
        let token = format!("{header}.{payload}.sig");
        assert_eq!(extract_chatgpt_account_id(&token).unwrap(), "acct_123");
    }

    #[test]
    fn extract_chatgpt_account_id_errors_on_missing_claim() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let payload = URL_SAFE_NO_PAD.encode(serde_json::json!({}).to_string());
        let token = format!("{header}.{payload}.sig");
        assert!(extract_chatgpt_account_id(&token).is_err());
    }

    #[test]
    fn expiry_epoch_ms_applies_safety_margin() {
        let before = i64::try_from(crate::util::unix_now_secs()).unwrap() * 1000;
        let expiry = expiry_epoch_ms(Some(3600)).unwrap();
        assert!(expiry < before + 3_600_000);
        assert!(expiry > before);
    }

    #[test]
    fn expiry_epoch_ms_is_none_without_expires_in() {
        assert!(expiry_epoch_ms(None).is_none());
    }
}
