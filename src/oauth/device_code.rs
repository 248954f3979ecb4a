//! Device-code flow, shared by `qwen-cli` and `github-copilot`.

use std::time::Duration;

use serde::Deserialize;

use crate::adapters::shared_http_client;
use crate::error::GatewayError;

const MAX_POLL_INTERVAL_SECS: u64 = 10;
const SLOW_DOWN_INCREMENT_SECS: u64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct DeviceTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

pub struct DeviceTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: Option<i64>,
}

/// Requests a device code from `device_code_url`.
pub async fn request_device_code(
    device_code_url: &str,
    client_id: &str,
    scope: &str,
) -> Result<DeviceCodeResponse, GatewayError> {
    let resp = shared_http_client()
        .post(device_code_url)
        .header("Accept", "application/json")
        .form(&[("client_id", client_id), ("scope", scope)])
        .send()
        .await
        .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(GatewayError::UpstreamRejected {
            status: status.as_u16(),
            body_excerpt: crate::adapters::truncate_body(&text, 2048),
        });
    }

    resp.json()
        .await
        .map_err(|e| GatewayError::ProtocolParseFailed(e.to_string()))
}

/// Polls `token_url` at the server-suggested interval until the device is authorized,
/// denied, or the device code expires.
pub async fn poll_for_token(
    token_url: &str,
    client_id: &str,
    device_code: &DeviceCodeResponse,
) -> Result<DeviceTokens, GatewayError> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(device_code.expires_in);
    let mut interval = Duration::from_secs(device_code.interval.max(1));

    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(GatewayError::AuthRefreshFailed(
                "device code expired before authorization completed".to_string(),
            ));
        }

        tokio::time::sleep(interval).await;

        let resp = shared_http_client()
            .post(token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", client_id),
                ("device_code", device_code.device_code.as_str()),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;

        let parsed: DeviceTokenResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::ProtocolParseFailed(e.to_string()))?;

        if let Some(access_token) = parsed.access_token {
            return Ok(DeviceTokens {
                access_token,
                refresh_token: parsed.refresh_token,
                expires_in_secs: parsed.expires_in,
            });
        }

        match parsed.error.as_deref() {
            Some("authorization_pending") => continue,
            Some("slow_down") => {
                interval = (interval + Duration::from_secs(SLOW_DOWN_INCREMENT_SECS))
                    .min(Duration::from_secs(MAX_POLL_INTERVAL_SECS));
            }
            Some(other) => {
                return Err(GatewayError::AuthRefreshFailed(format!(
                    "device authorization failed: {other}"
                )))
            }
            None => {
                return Err(GatewayError::AuthRefreshFailed(
                    "device token response missing access_token and error".to_string(),
                ))
            }
        }
    }
}

/// Derives the Copilot API base URL from a session token's embedded `proxy-ep=<host>`
/// claim (the token is a semicolon-delimited list of `key=value` fields, not a JWT).
/// Falls back to the individual-plan default when the claim is absent.
#[must_use]
pub fn derive_copilot_base_url(session_token: &str) -> String {
    const DEFAULT_BASE: &str = "https://api.individual.githubcopilot.com";

    let host = session_token.split(';').find_map(|field| field.strip_prefix("proxy-ep="));
    match host {
        Some(host) => {
            let host = host.strip_prefix("proxy.").map_or(host, |rest| rest);
            format!("https://api.{host}")
        }
        None => DEFAULT_BASE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_copilot_base_url_rewrites_proxy_prefix() {
        let token = "tid=abc;exp=123;proxy-ep=proxy.individual.githubcopilot.com;sku=free";
        assert_eq!(
            derive_copilot_base_url(token),
            "https://api.individual.githubcopilot.com"
        );
    }

    #[test]
    fn derive_copilot_base_url_falls_back_when_claim_absent() {
        let token = "tid=abc;exp=123";
        assert_eq!(
            derive_copilot_base_url(token),
            "https://api.individual.githubcopilot.com"
        );
    }
}
