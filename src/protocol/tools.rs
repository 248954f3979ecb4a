//! Tool Schema Adapter (C4): normalizes tool declarations and tool-choice across the
//! Chat-Completions, Anthropic Messages, and canonical shapes.

use crate::protocol::canonical::{CanonicalToolChoice, CanonicalToolDecl};
use serde_json::{json, Value};

/// Chat-Completions tool-choice field, `"auto"` | `"none"` | `"required"` |
/// `{type:"function", function:{name}}`.
pub fn decode_openai_tool_choice(value: Option<&Value>) -> CanonicalToolChoice {
    match value {
        None => CanonicalToolChoice::Auto,
        Some(Value::String(s)) => match s.as_str() {
            "none" => CanonicalToolChoice::None,
            "required" => CanonicalToolChoice::Required,
            _ => CanonicalToolChoice::Auto,
        },
        Some(Value::Object(obj)) => obj
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .map(|name| CanonicalToolChoice::Tool(name.to_string()))
            .unwrap_or(CanonicalToolChoice::Auto),
        Some(_) => CanonicalToolChoice::Auto,
    }
}

/// Anthropic Messages tool-choice field, `{type:"auto"}` | `{type:"any"}` |
/// `{type:"tool", name}`.
pub fn decode_anthropic_tool_choice(value: Option<&Value>) -> CanonicalToolChoice {
    let Some(obj) = value.and_then(Value::as_object) else {
        return CanonicalToolChoice::Auto;
    };
    match obj.get("type").and_then(Value::as_str) {
        Some("any") => CanonicalToolChoice::Required,
        Some("tool") => obj
            .get("name")
            .and_then(Value::as_str)
            .map(|name| CanonicalToolChoice::Tool(name.to_string()))
            .unwrap_or(CanonicalToolChoice::Auto),
        Some("none") => CanonicalToolChoice::None,
        _ => CanonicalToolChoice::Auto,
    }
}

#[must_use]
pub fn canonical_tool_choice_to_openai(choice: &CanonicalToolChoice) -> Value {
    match choice {
        CanonicalToolChoice::Auto => json!("auto"),
        CanonicalToolChoice::None => json!("none"),
        CanonicalToolChoice::Required => json!("required"),
        CanonicalToolChoice::Tool(name) => json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}

#[must_use]
pub fn canonical_tool_choice_to_anthropic(choice: &CanonicalToolChoice) -> Value {
    match choice {
        CanonicalToolChoice::Auto => json!({ "type": "auto" }),
        CanonicalToolChoice::None => json!({ "type": "none" }),
        CanonicalToolChoice::Required => json!({ "type": "any" }),
        CanonicalToolChoice::Tool(name) => json!({ "type": "tool", "name": name }),
    }
}

/// `{type:'function', function:{name, description, parameters}}` → canonical.
#[must_use]
pub fn decode_openai_tool(value: &Value) -> Option<CanonicalToolDecl> {
    let function = value.get("function")?;
    Some(CanonicalToolDecl {
        name: function.get("name")?.as_str()?.to_string(),
        description: function
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        parameters_json_schema: function
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    })
}

/// `{name, description, input_schema}` → canonical.
#[must_use]
pub fn decode_anthropic_tool(value: &Value) -> Option<CanonicalToolDecl> {
    Some(CanonicalToolDecl {
        name: value.get("name")?.as_str()?.to_string(),
        description: value
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        parameters_json_schema: value
            .get("input_schema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    })
}

#[must_use]
pub fn canonical_tool_to_openai(decl: &CanonicalToolDecl) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": decl.name,
            "description": decl.description,
            "parameters": decl.parameters_json_schema,
        }
    })
}

#[must_use]
pub fn canonical_tool_to_anthropic(decl: &CanonicalToolDecl) -> Value {
    json!({
        "name": decl.name,
        "description": decl.description,
        "input_schema": decl.parameters_json_schema,
    })
}

/// Google `functionDeclarations` shape (spec S4.5.c).
#[must_use]
pub fn canonical_tool_to_google_function_declaration(decl: &CanonicalToolDecl) -> Value {
    json!({
        "name": decl.name,
        "description": decl.description,
        "parameters": decl.parameters_json_schema,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_tool_choice_mapping() {
        assert_eq!(
            decode_openai_tool_choice(Some(&json!("auto"))),
            CanonicalToolChoice::Auto
        );
        assert_eq!(
            decode_openai_tool_choice(Some(&json!("none"))),
            CanonicalToolChoice::None
        );
        assert_eq!(
            decode_openai_tool_choice(Some(&json!("required"))),
            CanonicalToolChoice::Required
        );
        assert_eq!(
            decode_openai_tool_choice(Some(
                &json!({"type": "function", "function": {"name": "get_weather"}})
            )),
            CanonicalToolChoice::Tool("get_weather".to_string())
        );
        assert_eq!(decode_openai_tool_choice(None), CanonicalToolChoice::Auto);
    }

    #[test]
    fn anthropic_tool_choice_mapping() {
        assert_eq!(
            decode_anthropic_tool_choice(Some(&json!({"type": "auto"}))),
            CanonicalToolChoice::Auto
        );
        assert_eq!(
            decode_anthropic_tool_choice(Some(&json!({"type": "any"}))),
            CanonicalToolChoice::Required
        );
        assert_eq!(
            decode_anthropic_tool_choice(Some(&json!({"type": "tool", "name": "search"}))),
            CanonicalToolChoice::Tool("search".to_string())
        );
    }

    #[test]
    fn openai_tool_decode_roundtrip() {
        let wire = json!({
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "fetch weather",
                "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
            }
        });
        let decl = decode_openai_tool(&wire).unwrap();
        assert_eq!(decl.name, "get_weather");
        assert_eq!(decl.description.as_deref(), Some("fetch weather"));
        let back = canonical_tool_to_openai(&decl);
        assert_eq!(back["function"]["name"], json!("get_weather"));
    }

    #[test]
    fn anthropic_tool_decode_roundtrip() {
        let wire = json!({
            "name": "search",
            "description": "web search",
            "input_schema": {"type": "object", "properties": {"q": {"type": "string"}}}
        });
        let decl = decode_anthropic_tool(&wire).unwrap();
        assert_eq!(decl.name, "search");
        let back = canonical_tool_to_anthropic(&decl);
        assert_eq!(back["input_schema"]["properties"]["q"]["type"], json!("string"));
    }
}
