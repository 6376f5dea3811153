// Copyright 2025 TraceForge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Provider response parser. Never panics and never returns an
//! `Err` — shape drift in a provider payload degrades to a partial or
//! empty [`ParsedResponse`], and the caller falls back to legacy fields.

use serde_json::Value;

use traceforge_core::{LlmSubType, ToolUse};

/// The normalised subset of a raw provider payload the event normaliser
/// needs. Any field the payload didn't carry is left at its default.
#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub reasoning_tokens: u64,
    pub output: Option<Value>,
    pub stop_reason: Option<String>,
    pub thinking: Option<String>,
    pub tool_uses: Vec<ToolUse>,
    pub sub_type: LlmSubType,
}

fn u64_field(v: &Value, key: &str) -> u64 {
    v.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Dispatches on `provider`. Unknown or absent providers return `None` so
/// the normaliser falls back to `event.output`/token fields directly.
pub fn parse_provider_response(provider: Option<&str>, raw: &Value) -> Option<ParsedResponse> {
    match provider?.to_ascii_lowercase().as_str() {
        "openai" => Some(parse_openai(raw)),
        "anthropic" => Some(parse_anthropic(raw)),
        "bedrock" => Some(parse_bedrock(raw)),
        "gemini" => Some(parse_gemini(raw)),
        _ => None,
    }
}

fn parse_openai(raw: &Value) -> ParsedResponse {
    let usage = raw.get("usage").cloned().unwrap_or(Value::Null);
    let cache_read_tokens = usage
        .get("prompt_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let choice = raw
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first());

    let message = choice.and_then(|c| c.get("message"));
    let output = message.and_then(|m| m.get("content")).cloned();
    let stop_reason = choice.and_then(|c| str_field(c, "finish_reason"));

    let tool_uses: Vec<ToolUse> = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(i, call)| {
                    let id = str_field(call, "id").unwrap_or_else(|| format!("call-{i}"));
                    let function = call.get("function");
                    let name = function
                        .and_then(|f| str_field(f, "name"))
                        .unwrap_or_default();
                    let input = function
                        .and_then(|f| f.get("arguments"))
                        .and_then(Value::as_str)
                        .and_then(|s| serde_json::from_str(s).ok());
                    ToolUse {
                        id,
                        name,
                        input,
                        output: None,
                        status: traceforge_core::SpanStatus::Pending,
                        duration_ms: None,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let sub_type = if !tool_uses.is_empty() {
        LlmSubType::Planning
    } else {
        LlmSubType::Response
    };

    ParsedResponse {
        input_tokens: u64_field(&usage, "prompt_tokens"),
        output_tokens: u64_field(&usage, "completion_tokens"),
        cache_read_tokens,
        output,
        stop_reason,
        tool_uses,
        sub_type,
        ..Default::default()
    }
}

/// Shared by Anthropic and Bedrock: both carry a `content[]` array of
/// typed blocks, just with different block shapes for tool calls.
fn classify_content_blocks(content: &[Value]) -> (Vec<ToolUse>, Option<String>, LlmSubType) {
    let mut tool_uses = Vec::new();
    let mut thinking = None;
    let mut saw_tool_use = false;

    for (i, block) in content.iter().enumerate() {
        let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
        match block_type {
            "tool_use" => {
                saw_tool_use = true;
                let id = str_field(block, "id").unwrap_or_else(|| format!("block-{i}"));
                tool_uses.push(ToolUse {
                    id,
                    name: str_field(block, "name").unwrap_or_default(),
                    input: block.get("input").cloned(),
                    output: None,
                    status: traceforge_core::SpanStatus::Pending,
                    duration_ms: None,
                });
            }
            "thinking" => {
                thinking = str_field(block, "thinking").or_else(|| str_field(block, "text"));
            }
            _ => {
                if block.get("toolUse").is_some() {
                    saw_tool_use = true;
                    let tool_use = &block["toolUse"];
                    let id = str_field(tool_use, "toolUseId").unwrap_or_else(|| format!("block-{i}"));
                    tool_uses.push(ToolUse {
                        id,
                        name: str_field(tool_use, "name").unwrap_or_default(),
                        input: tool_use.get("input").cloned(),
                        output: None,
                        status: traceforge_core::SpanStatus::Pending,
                        duration_ms: None,
                    });
                }
            }
        }
    }

    let sub_type = if saw_tool_use { LlmSubType::Planning } else { LlmSubType::Response };
    (tool_uses, thinking, sub_type)
}

fn parse_anthropic(raw: &Value) -> ParsedResponse {
    let usage = raw.get("usage").cloned().unwrap_or(Value::Null);
    let content = raw.get("content").and_then(Value::as_array).cloned().unwrap_or_default();
    let (tool_uses, thinking, sub_type) = classify_content_blocks(&content);

    ParsedResponse {
        input_tokens: u64_field(&usage, "input_tokens"),
        output_tokens: u64_field(&usage, "output_tokens"),
        cache_read_tokens: u64_field(&usage, "cache_read_input_tokens"),
        cache_write_tokens: u64_field(&usage, "cache_creation_input_tokens"),
        output: raw.get("content").cloned(),
        stop_reason: str_field(raw, "stop_reason"),
        thinking,
        tool_uses,
        sub_type,
        ..Default::default()
    }
}

fn parse_bedrock(raw: &Value) -> ParsedResponse {
    let usage = raw.get("usage").cloned().unwrap_or(Value::Null);
    let content = raw
        .get("output")
        .and_then(|o| o.get("message"))
        .and_then(|m| m.get("content"))
        .or_else(|| raw.get("content"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let (tool_uses, thinking, sub_type) = classify_content_blocks(&content);

    ParsedResponse {
        input_tokens: u64_field(&usage, "inputTokens"),
        output_tokens: u64_field(&usage, "outputTokens"),
        output: raw
            .get("output")
            .and_then(|o| o.get("message"))
            .and_then(|m| m.get("content"))
            .cloned(),
        stop_reason: str_field(raw, "stopReason"),
        thinking,
        tool_uses,
        sub_type,
        ..Default::default()
    }
}

fn parse_gemini(raw: &Value) -> ParsedResponse {
    let usage = raw.get("usageMetadata").cloned().unwrap_or(Value::Null);
    let candidate = raw
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first());
    let parts = candidate
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let tool_uses: Vec<ToolUse> = parts
        .iter()
        .enumerate()
        .filter_map(|(i, part)| {
            let call = part.get("functionCall")?;
            Some(ToolUse {
                id: format!("call-{i}"),
                name: str_field(call, "name").unwrap_or_default(),
                input: call.get("args").cloned(),
                output: None,
                status: traceforge_core::SpanStatus::Pending,
                duration_ms: None,
            })
        })
        .collect();

    let sub_type = if !tool_uses.is_empty() { LlmSubType::Planning } else { LlmSubType::Response };

    ParsedResponse {
        input_tokens: u64_field(&usage, "promptTokenCount"),
        output_tokens: u64_field(&usage, "candidatesTokenCount"),
        reasoning_tokens: u64_field(&usage, "thoughtsTokenCount"),
        output: candidate.and_then(|c| c.get("content")).cloned(),
        stop_reason: candidate.and_then(|c| str_field(c, "finishReason")),
        tool_uses,
        sub_type,
        ..Default::default()
    }
}

/// Applies the same classification rules to a legacy `output` value when no
/// `rawResponse` was supplied.
pub fn classify_legacy_output(output: &Value) -> (Vec<ToolUse>, LlmSubType) {
    let blocks = output.as_array().cloned().unwrap_or_default();
    let (tool_uses, _thinking, sub_type) = classify_content_blocks(&blocks);
    (tool_uses, sub_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_provider_returns_none() {
        assert!(parse_provider_response(Some("openrouter"), &json!({})).is_none());
        assert!(parse_provider_response(None, &json!({})).is_none());
    }

    #[test]
    fn openai_extracts_tokens_and_tool_calls() {
        let raw = json!({
            "usage": {"prompt_tokens": 100, "completion_tokens": 20, "prompt_tokens_details": {"cached_tokens": 5}},
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": "looking that up",
                    "tool_calls": [{"id": "call_1", "function": {"name": "search", "arguments": "{\"q\":\"x\"}"}}]
                }
            }]
        });
        let parsed = parse_provider_response(Some("openai"), &raw).unwrap();
        assert_eq!(parsed.input_tokens, 100);
        assert_eq!(parsed.output_tokens, 20);
        assert_eq!(parsed.cache_read_tokens, 5);
        assert_eq!(parsed.tool_uses.len(), 1);
        assert_eq!(parsed.tool_uses[0].id, "call_1");
        assert_eq!(parsed.tool_uses[0].name, "search");
        assert_eq!(parsed.sub_type, LlmSubType::Planning);
    }

    #[test]
    fn anthropic_tool_use_block_classifies_as_planning() {
        let raw = json!({
            "usage": {"input_tokens": 100, "output_tokens": 20},
            "stop_reason": "tool_use",
            "content": [{"type": "tool_use", "id": "tu_1", "name": "search", "input": {"q": "x"}}]
        });
        let parsed = parse_provider_response(Some("anthropic"), &raw).unwrap();
        assert_eq!(parsed.tool_uses[0].id, "tu_1");
        assert_eq!(parsed.sub_type, LlmSubType::Planning);
        assert_eq!(parsed.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn anthropic_text_only_classifies_as_response() {
        let raw = json!({
            "usage": {"input_tokens": 10, "output_tokens": 5},
            "content": [{"type": "text", "text": "hello"}]
        });
        let parsed = parse_provider_response(Some("anthropic"), &raw).unwrap();
        assert!(parsed.tool_uses.is_empty());
        assert_eq!(parsed.sub_type, LlmSubType::Response);
    }

    #[test]
    fn bedrock_tool_use_block_extracted() {
        let raw = json!({
            "usage": {"inputTokens": 50, "outputTokens": 15},
            "stopReason": "tool_use",
            "output": {"message": {"content": [{"toolUse": {"toolUseId": "tu_2", "name": "lookup", "input": {}}}]}}
        });
        let parsed = parse_provider_response(Some("bedrock"), &raw).unwrap();
        assert_eq!(parsed.tool_uses[0].id, "tu_2");
        assert_eq!(parsed.sub_type, LlmSubType::Planning);
    }

    #[test]
    fn gemini_extracts_reasoning_tokens_and_function_calls() {
        let raw = json!({
            "usageMetadata": {"promptTokenCount": 30, "candidatesTokenCount": 8, "thoughtsTokenCount": 12},
            "candidates": [{"finishReason": "STOP", "content": {"parts": [{"functionCall": {"name": "search", "args": {"q": "x"}}}]}}]
        });
        let parsed = parse_provider_response(Some("gemini"), &raw).unwrap();
        assert_eq!(parsed.reasoning_tokens, 12);
        assert_eq!(parsed.tool_uses[0].name, "search");
        assert_eq!(parsed.sub_type, LlmSubType::Planning);
    }

    #[test]
    fn malformed_payload_never_panics() {
        let raw = json!("just a string");
        for provider in ["openai", "anthropic", "bedrock", "gemini"] {
            let parsed = parse_provider_response(Some(provider), &raw).unwrap();
            assert_eq!(parsed.input_tokens, 0);
        }
    }
}
