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

//! Event normaliser: turns one wire-shape [`IngestEvent`] into a
//! domain [`Span`], folding in the provider response parser and pricing
//! calculator along the way.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::Utc;
use serde_json::{json, Value};

use traceforge_core::{
    new_id, IngestEvent, PricingCalculator, Span, SpanStatus, SpanType,
};

use crate::provider::{classify_legacy_output, parse_provider_response};

/// `EventToSpan`. `trace_id` is the id the event has been grouped under
/// (SDK-supplied or freshly generated by the event processor); this
/// function does not choose it.
pub fn event_to_span(
    pricing: &PricingCalculator,
    project_id: &str,
    trace_id: &str,
    event: &IngestEvent,
) -> Span {
    let now = Utc::now();
    let started_at = event.timestamp.unwrap_or(now);
    let ended_at = now;

    let span_type = SpanType::from_str(&event.span_type).unwrap_or(SpanType::Llm);
    let status = if event.status == "error" { SpanStatus::Error } else { SpanStatus::Success };
    let name = event
        .name
        .clone()
        .or_else(|| event.model.clone())
        .unwrap_or_else(|| span_type.as_str().to_string());

    let mut metadata = event.metadata.clone();
    if event.streaming == Some(true) {
        metadata.insert("streaming".to_string(), Value::Bool(true));
    }
    if let Some(tool_call_id) = &event.tool_call_id {
        metadata.insert("toolCallId".to_string(), Value::String(tool_call_id.clone()));
    }
    metadata.insert("_debug".to_string(), debug_presence(event));

    let mut span = Span {
        id: event.span_id.clone().unwrap_or_else(new_id),
        trace_id: trace_id.to_string(),
        project_id: project_id.to_string(),
        parent_span_id: event.parent_span_id.clone(),
        span_type,
        name,
        input: event.input.clone(),
        output: event.output.clone(),
        metadata,
        input_tokens: event.input_tokens,
        output_tokens: event.output_tokens,
        cache_read_tokens: event.cache_read_tokens,
        cache_write_tokens: event.cache_write_tokens,
        reasoning_tokens: event.reasoning_tokens,
        first_token_ms: event.first_token_ms,
        duration_ms: event.duration_ms,
        cost_usd: None,
        status,
        error_message: event.error_message.clone(),
        model: event.model.clone(),
        provider: event.provider.clone(),
        stop_reason: event.stop_reason.clone(),
        thinking: event.thinking.clone(),
        sub_type: None,
        tool_uses: Vec::new(),
        started_at,
        ended_at,
    };

    if let Some(raw_response) = &event.raw_response {
        if let Some(parsed) = parse_provider_response(event.provider.as_deref(), raw_response) {
            span.input_tokens = Some(parsed.input_tokens);
            span.output_tokens = Some(parsed.output_tokens);
            if parsed.cache_read_tokens > 0 {
                span.cache_read_tokens = Some(parsed.cache_read_tokens);
            }
            if parsed.cache_write_tokens > 0 {
                span.cache_write_tokens = Some(parsed.cache_write_tokens);
            }
            if parsed.reasoning_tokens > 0 {
                span.reasoning_tokens = Some(parsed.reasoning_tokens);
            }
            if parsed.output.is_some() {
                span.output = parsed.output;
            }
            if parsed.stop_reason.is_some() {
                span.stop_reason = parsed.stop_reason;
            }
            if parsed.thinking.is_some() {
                span.thinking = parsed.thinking;
            }
            span.tool_uses = assign_tool_use_ids(&span.id, parsed.tool_uses);
            if span_type == SpanType::Llm {
                span.sub_type = Some(parsed.sub_type);
            }
        }
    } else if span_type == SpanType::Llm {
        if let Some(output) = &span.output {
            let (tool_uses, sub_type) = classify_legacy_output(output);
            span.tool_uses = assign_tool_use_ids(&span.id, tool_uses);
            span.sub_type = Some(sub_type);
        }
    }

    if span_type == SpanType::Llm {
        if let Some(model) = &span.model {
            let cost = pricing.calculate_cost(
                model,
                span.input_tokens.unwrap_or(0),
                span.output_tokens.unwrap_or(0),
            );
            if pricing.is_known(model) {
                span.cost_usd = Some(cost);
            }
        }
    }

    span
}

/// Providers supply a `toolUseId`/`id` on each block; when absent,
/// synthesise `spanId-tool-N`.
fn assign_tool_use_ids(span_id: &str, mut tool_uses: Vec<traceforge_core::ToolUse>) -> Vec<traceforge_core::ToolUse> {
    for (i, tool_use) in tool_uses.iter_mut().enumerate() {
        if tool_use.id.is_empty() {
            tool_use.id = traceforge_core::ToolUse::synthetic_id(span_id, i);
        }
    }
    tool_uses
}

/// Records which optional wire fields arrived, so a malformed/partial
/// payload is diagnosable after the fact without re-parsing the raw body.
fn debug_presence(event: &IngestEvent) -> Value {
    json!({
        "hadRawResponse": event.raw_response.is_some(),
        "hadOutput": event.output.is_some(),
        "hadInputTokens": event.input_tokens.is_some(),
        "hadOutputTokens": event.output_tokens.is_some(),
        "hadTraceId": event.trace_id.is_some(),
        "hadSpanId": event.span_id.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use traceforge_core::PricingCalculator;

    fn base_event() -> IngestEvent {
        IngestEvent {
            span_type: "llm".to_string(),
            provider: None,
            model: Some("gpt-4o".to_string()),
            name: None,
            input: None,
            raw_response: None,
            output: None,
            input_tokens: Some(1_000_000),
            output_tokens: Some(500_000),
            duration_ms: None,
            status: "success".to_string(),
            error_message: None,
            error_stack: None,
            streaming: None,
            session_id: None,
            user_id: None,
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            tool_call_id: None,
            stop_reason: None,
            thinking: None,
            cache_read_tokens: None,
            cache_write_tokens: None,
            reasoning_tokens: None,
            first_token_ms: None,
            metadata: HashMap::new(),
            tags: Vec::new(),
            timestamp: None,
        }
    }

    #[test]
    fn computes_cost_for_known_model() {
        let pricing = PricingCalculator::with_builtins();
        let event = base_event();
        let span = event_to_span(&pricing, "proj-1", "trace-1", &event);
        assert_eq!(span.cost_usd, Some(7.5));
    }

    #[test]
    fn unknown_model_leaves_cost_nil() {
        let pricing = PricingCalculator::with_builtins();
        let mut event = base_event();
        event.model = Some("not-a-real-model".to_string());
        let span = event_to_span(&pricing, "proj-1", "trace-1", &event);
        assert_eq!(span.cost_usd, None);
    }

    #[test]
    fn error_status_maps_to_error_span() {
        let pricing = PricingCalculator::with_builtins();
        let mut event = base_event();
        event.status = "error".to_string();
        let span = event_to_span(&pricing, "proj-1", "trace-1", &event);
        assert_eq!(span.status, SpanStatus::Error);
    }

    #[test]
    fn name_falls_back_to_model_then_type() {
        let pricing = PricingCalculator::with_builtins();
        let mut event = base_event();
        event.model = None;
        let span = event_to_span(&pricing, "proj-1", "trace-1", &event);
        assert_eq!(span.name, "llm");
    }

    #[test]
    fn legacy_output_derives_tool_uses_without_raw_response() {
        let pricing = PricingCalculator::with_builtins();
        let mut event = base_event();
        event.output = Some(json!([{"type": "tool_use", "id": "tu_1", "name": "search", "input": {}}]));
        let span = event_to_span(&pricing, "proj-1", "trace-1", &event);
        assert_eq!(span.tool_uses.len(), 1);
        assert_eq!(span.sub_type, Some(traceforge_core::LlmSubType::Planning));
    }
}
