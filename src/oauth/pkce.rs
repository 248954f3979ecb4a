//! PKCE authorization-code flow, shared by `openai-codex` and the Code-Assist
//! providers (`gemini-cli`, `antigravity`).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::GatewayError;

/// Returns `(verifier, challenge)` for a 32-byte PKCE verifier.
#[must_use]
pub fn generate_pkce() -> (String, String) {
    let mut raw = [0u8; 32];
    for byte in raw.iter_mut() {
        *byte = fastrand::u8(..);
    }
    let verifier = URL_SAFE_NO_PAD.encode(raw);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());
    (verifier, challenge)
}

/// Random 16-byte state, hex-encoded.
#[must_use]
pub fn generate_state() -> String {
    let mut raw = [0u8; 16];
    for byte in raw.iter_mut() {
        *byte = fastrand::u8(..);
    }
    raw.iter().map(|b| format!("{b:02x}")).collect()
}

/// Accepts a raw authorization code, `code#state`, or a full redirect URL pasted by
/// the user as a fallback when the local callback listener doesn't receive the
/// redirect (browser on a different machine, corporate proxy, etc).
pub fn parse_pasted_code(input: &str) -> Result<(String, Option<String>), GatewayError> {
    let trimmed = input.trim();

    if trimmed.contains("code=") {
        let url = url::Url::parse(trimmed)
            .or_else(|_| url::Url::parse(&format!("https://localhost/callback?{trimmed}")))
            .map_err(|e| GatewayError::BadRequest(format!("invalid callback input: {e}")))?;
        let code = url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.to_string())
            .ok_or_else(|| GatewayError::BadRequest("no code in callback input".to_string()))?;
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.to_string());
        return Ok((code, state));
    }

    if let Some((code, state)) = trimmed.split_once('#') {
        return Ok((code.to_string(), Some(state.to_string())));
    }

    Ok((trimmed.to_string(), None))
}

/// Listens once on `127.0.0.1:{port}` for the OAuth redirect, validates `state`, and
/// returns the authorization code.
pub async fn wait_for_callback(
    port: u16,
    expected_state: &str,
    timeout: std::time::Duration,
) -> Result<String, GatewayError> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| GatewayError::Internal(format!("failed to bind oauth callback listener: {e}")))?;

    tokio::time::timeout(timeout, accept_one_callback(&listener, expected_state))
        .await
        .map_err(|_| GatewayError::Timeout)?
}

async fn accept_one_callback(
    listener: &tokio::net::TcpListener,
    expected_state: &str,
) -> Result<String, GatewayError> {
    let (stream, _) = listener
        .accept()
        .await
        .map_err(|e| GatewayError::Internal(format!("oauth callback accept failed: {e}")))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let path = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| GatewayError::BadRequest("malformed oauth callback request".to_string()))?;
    let url = url::Url::parse(&format!("http://localhost{path}"))
        .map_err(|e| GatewayError::BadRequest(format!("malformed oauth callback path: {e}")))?;

    let code = url
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
        .ok_or_else(|| GatewayError::BadRequest("no code in oauth callback".to_string()))?;
    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.to_string())
        .ok_or_else(|| GatewayError::BadRequest("no state in oauth callback".to_string()))?;

    let body = if state == expected_state {
        "<html><body>Login complete, you can close this window.</body></html>"
    } else {
        "<html><body>State mismatch, login was not completed.</body></html>"
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let _ = writer.write_all(response.as_bytes()).await;

    if state != expected_state {
        return Err(GatewayError::BadRequest("oauth state mismatch".to_string()));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_challenge_is_sha256_of_verifier() {
        let (verifier, challenge) = generate_pkce();
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(challenge, expected);
    }

    #[test]
    fn generate_state_is_32_hex_chars() {
        let state = generate_state();
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn parse_pasted_code_accepts_raw_code() {
        let (code, state) = parse_pasted_code("abc123").unwrap();
        assert_eq!(code, "abc123");
        assert!(state.is_none());
    }

    #[test]
    fn parse_pasted_code_accepts_code_hash_state() {
        let (code, state) = parse_pasted_code("abc123#deadbeef").unwrap();
        assert_eq!(code, "abc123");
        assert_eq!(state.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn parse_pasted_code_accepts_full_redirect_url() {
        let (code, state) =
            parse_pasted_code("http://localhost:1455/auth/callback?code=abc123&state=deadbeef").unwrap();
        assert_eq!(code, "abc123");
        assert_eq!(state.as_deref(), Some("deadbeef"));
    }
}
