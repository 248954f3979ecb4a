//! `doctor [--port N] [--provider ID] [--endpoint chat|messages|both] [--verbose]`:
//! issues representative probe requests (text, tool-call, streaming, non-streaming)
//! against an already-running gateway, reusing C7's own request shapes as a thin HTTP
//! client. Exits 0 if every probe for every credentialed provider succeeds, 1
//! otherwise or if the gateway is unreachable.

use std::path::PathBuf;

use ai_gateway::adapters::shared_http_client;
use ai_gateway::credentials::CredentialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Chat,
    Messages,
    Both,
}

impl Endpoint {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chat" => Some(Self::Chat),
            "messages" => Some(Self::Messages),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    fn probes_chat(self) -> bool {
        matches!(self, Self::Chat | Self::Both)
    }

    fn probes_messages(self) -> bool {
        matches!(self, Self::Messages | Self::Both)
    }
}

pub struct Options {
    pub port: u16,
    pub provider: Option<String>,
    pub endpoint: Endpoint,
    pub verbose: bool,
}

pub async fn run(credentials_path: PathBuf, opts: Options) -> i32 {
    let store = CredentialStore::load(credentials_path);
    let mut providers: Vec<_> = store.list().into_iter().collect();
    providers.sort_by(|a, b| a.0.cmp(&b.0));
    if let Some(filter) = &opts.provider {
        providers.retain(|(id, _)| id == filter);
    }

    if providers.is_empty() {
        eprintln!("No matching credentialed providers to probe; run `ai-gateway login` first.");
        return 1;
    }

    let base = format!("http://127.0.0.1:{}", opts.port);
    let mut all_ok = true;

    for (provider_id, record) in providers {
        let Some(model) = record.enabled_models.first() else {
            if opts.verbose {
                eprintln!("skip {provider_id}: no enabled_models configured");
            }
            continue;
        };
        let qualified = format!("{provider_id}/{model}");

        if opts.endpoint.probes_chat() {
            all_ok &= probe(&base, "/v1/chat/completions", &chat_text_body(&qualified, false), &opts, &qualified, "chat text").await;
            all_ok &= probe(&base, "/v1/chat/completions", &chat_text_body(&qualified, true), &opts, &qualified, "chat text stream").await;
            all_ok &= probe(&base, "/v1/chat/completions", &chat_tool_body(&qualified, true), &opts, &qualified, "chat tool-call stream").await;
        }
        if opts.endpoint.probes_messages() {
            all_ok &= probe(&base, "/v1/messages", &messages_text_body(&qualified, false), &opts, &qualified, "messages text").await;
            all_ok &= probe(&base, "/v1/messages", &messages_tool_body(&qualified, true), &opts, &qualified, "messages tool-call stream").await;
        }
    }

    if all_ok {
        eprintln!("doctor: all probes passed");
        0
    } else {
        eprintln!("doctor: one or more probes failed");
        1
    }
}

async fn probe(base: &str, path: &str, body: &serde_json::Value, opts: &Options, model: &str, label: &str) -> bool {
    let url = format!("{base}{path}");
    let result = shared_http_client().post(&url).json(body).send().await;
    match result {
        Ok(response) if response.status().is_success() => {
            if opts.verbose {
                eprintln!("ok   {model} {label}");
            }
            true
        }
        Ok(response) => {
            eprintln!("FAIL {model} {label}: upstream status {}", response.status());
            false
        }
        Err(err) => {
            eprintln!("FAIL {model} {label}: {err}");
            false
        }
    }
}

fn chat_text_body(model: &str, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "stream": stream,
        "messages": [{"role": "user", "content": "Say 'ok' and nothing else."}],
        "max_tokens": 16,
    })
}

fn chat_tool_body(model: &str, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "stream": stream,
        "messages": [{"role": "user", "content": "What's the weather in Tokyo?"}],
        "tools": [{
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "get the current weather for a location",
                "parameters": {"type": "object", "properties": {"location": {"type": "string"}}, "required": ["location"]},
            },
        }],
    })
}

fn messages_text_body(model: &str, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "stream": stream,
        "max_tokens": 16,
        "messages": [{"role": "user", "content": "Say 'ok' and nothing else."}],
    })
}

fn messages_tool_body(model: &str, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "stream": stream,
        "max_tokens": 200,
        "messages": [{"role": "user", "content": "What's the weather in Tokyo?"}],
        "tools": [{
            "name": "get_weather",
            "description": "get the current weather for a location",
            "input_schema": {"type": "object", "properties": {"location": {"type": "string"}}, "required": ["location"]},
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parse_accepts_known_values_only() {
        assert_eq!(Endpoint::parse("chat"), Some(Endpoint::Chat));
        assert_eq!(Endpoint::parse("messages"), Some(Endpoint::Messages));
        assert_eq!(Endpoint::parse("both"), Some(Endpoint::Both));
        assert_eq!(Endpoint::parse("gemini"), None);
    }

    #[test]
    fn endpoint_probe_flags_match_variant() {
        assert!(Endpoint::Chat.probes_chat());
        assert!(!Endpoint::Chat.probes_messages());
        assert!(Endpoint::Messages.probes_messages());
        assert!(!Endpoint::Messages.probes_chat());
        assert!(Endpoint::Both.probes_chat());
        assert!(Endpoint::Both.probes_messages());
    }
}
