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

//! Trace-detail processor: turns a trace and its flat span list into
//! the tree, timeline, and aggregate shape the detail view renders
//! directly, with no further joins on the client side.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use traceforge_core::{LlmSubType, Span, SpanStatus, SpanType, Trace, ToolUse};

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedSpan {
    pub id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub span_type: SpanType,
    pub name: String,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub metadata: HashMap<String, Value>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub cache_write_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
    pub first_token_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub cost_usd: Option<f64>,
    pub status: SpanStatus,
    pub error_message: Option<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub stop_reason: Option<String>,
    pub thinking: Option<String>,
    pub sub_type: Option<LlmSubType>,
    pub tool_uses: Vec<ToolUse>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub user_input: Option<String>,
    pub timeline_start: f64,
    pub timeline_width: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceTreeNode {
    pub span: ProcessedSpan,
    pub is_tool_use: bool,
    pub depth: u32,
    pub children: Vec<TraceTreeNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceDetailResponse {
    pub trace: Trace,
    pub spans: Vec<ProcessedSpan>,
    pub tree: Vec<TraceTreeNode>,
    pub total_spans: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
}

struct ToolResult {
    status: SpanStatus,
    content: Option<Value>,
}

/// Builds the full detail response for one trace and its spans.
pub fn process_trace_detail(trace: Trace, spans: Vec<Span>) -> TraceDetailResponse {
    if spans.is_empty() {
        return TraceDetailResponse {
            trace,
            spans: Vec::new(),
            tree: Vec::new(),
            total_spans: 0,
            total_tokens: 0,
            total_cost_usd: 0.0,
            total_duration_ms: 0,
        };
    }

    let tool_results = build_tool_result_index(&spans);
    let user_input = extract_first_user_message(&spans);

    let mut processed: Vec<ProcessedSpan> = spans
        .iter()
        .map(|span| project_span(span, &tool_results, user_input.as_deref()))
        .collect();

    repair_parents(&mut processed);

    let (min_time, total_duration) = timeline_context(&spans);
    for span in &mut processed {
        let (start, width) = timeline_geometry(span.started_at, span.ended_at, min_time, total_duration);
        span.timeline_start = start;
        span.timeline_width = width;
    }

    let total_spans = processed.len() as u64;
    let total_tokens: u64 = processed
        .iter()
        .map(|s| s.input_tokens.unwrap_or(0) + s.output_tokens.unwrap_or(0))
        .sum();
    let total_cost_usd: f64 = processed.iter().filter_map(|s| s.cost_usd).sum();
    let total_duration_ms: u64 = processed.iter().filter_map(|s| s.duration_ms).sum();

    let tree = build_tree(&processed);

    TraceDetailResponse {
        trace,
        spans: processed,
        tree,
        total_spans,
        total_tokens,
        total_cost_usd,
        total_duration_ms,
    }
}

/// Step 1: index tool-call results keyed by `toolUseId`, across both the
/// Anthropic (`type: "tool_result"`, `tool_use_id`) and Bedrock
/// (`toolResult.toolUseId`) content-block shapes.
fn build_tool_result_index(spans: &[Span]) -> HashMap<String, ToolResult> {
    let mut index = HashMap::new();
    for span in spans {
        let Some(input) = &span.input else { continue };
        let Some(messages) = input.get("messages").and_then(Value::as_array) else { continue };
        for message in messages {
            let Some(content) = message.get("content").and_then(Value::as_array) else { continue };
            for block in content {
                if let Some(result) = block.get("toolResult") {
                    if let Some(id) = result.get("toolUseId").and_then(Value::as_str) {
                        index.insert(id.to_string(), tool_result_from_bedrock(result));
                    }
                } else if block.get("type").and_then(Value::as_str) == Some("tool_result") {
                    if let Some(id) = block.get("tool_use_id").and_then(Value::as_str) {
                        index.insert(id.to_string(), tool_result_from_anthropic(block));
                    }
                }
            }
        }
    }
    index
}

fn tool_result_from_bedrock(result: &Value) -> ToolResult {
    let status = match result.get("status").and_then(Value::as_str) {
        Some("error") => SpanStatus::Error,
        _ => SpanStatus::Success,
    };
    ToolResult {
        status,
        content: result.get("content").cloned(),
    }
}

fn tool_result_from_anthropic(block: &Value) -> ToolResult {
    let status = if block.get("is_error").and_then(Value::as_bool).unwrap_or(false) {
        SpanStatus::Error
    } else {
        SpanStatus::Success
    };
    ToolResult {
        status,
        content: block.get("content").cloned(),
    }
}

/// Step 2: the first user turn of the first LLM span, skipping any turn
/// that itself carries a tool-result block, used to label every agent
/// span's `userInput`.
fn extract_first_user_message(spans: &[Span]) -> Option<String> {
    let llm_span = spans.iter().find(|s| s.span_type == SpanType::Llm)?;
    let input = llm_span.input.as_ref()?;
    let messages = input.get("messages")?.as_array()?;

    for message in messages {
        if message.get("role").and_then(Value::as_str) != Some("user") {
            continue;
        }
        let Some(content) = message.get("content") else { continue };
        if let Some(text) = content.as_str() {
            return Some(text.to_string());
        }
        if let Some(blocks) = content.as_array() {
            if blocks.iter().any(contains_tool_result) {
                continue;
            }
            if let Some(text_block) = blocks.iter().find(|b| b.get("type").and_then(Value::as_str) == Some("text")) {
                if let Some(text) = text_block.get("text").and_then(Value::as_str) {
                    return Some(text.to_string());
                }
            }
        }
    }
    None
}

fn contains_tool_result(block: &Value) -> bool {
    block.get("toolResult").is_some() || block.get("type").and_then(Value::as_str) == Some("tool_result")
}

/// Step 3: copy every field; overlay `toolUse.output`/`status` from the
/// tool-result index when the id matches.
fn project_span(span: &Span, tool_results: &HashMap<String, ToolResult>, user_input: Option<&str>) -> ProcessedSpan {
    let tool_uses = span
        .tool_uses
        .iter()
        .cloned()
        .map(|mut tool_use| {
            if let Some(result) = tool_results.get(&tool_use.id) {
                tool_use.output = result.content.clone();
                tool_use.status = result.status;
            }
            tool_use
        })
        .collect();

    ProcessedSpan {
        id: span.id.clone(),
        trace_id: span.trace_id.clone(),
        parent_span_id: span.parent_span_id.clone(),
        span_type: span.span_type,
        name: span.name.clone(),
        input: span.input.clone(),
        output: span.output.clone(),
        metadata: span.metadata.clone(),
        input_tokens: span.input_tokens,
        output_tokens: span.output_tokens,
        cache_read_tokens: span.cache_read_tokens,
        cache_write_tokens: span.cache_write_tokens,
        reasoning_tokens: span.reasoning_tokens,
        first_token_ms: span.first_token_ms,
        duration_ms: span.duration_ms,
        cost_usd: span.cost_usd,
        status: span.status,
        error_message: span.error_message.clone(),
        model: span.model.clone(),
        provider: span.provider.clone(),
        stop_reason: span.stop_reason.clone(),
        thinking: span.thinking.clone(),
        sub_type: span.sub_type,
        tool_uses,
        started_at: span.started_at,
        ended_at: span.ended_at,
        user_input: if span.span_type == SpanType::Agent { user_input.map(str::to_owned) } else { None },
        timeline_start: 0.0,
        timeline_width: 0.0,
    }
}

/// Step 4: reassign orphaned `parentSpanId`s to the single parentless
/// agent span (the root); the root itself is left with no parent.
fn repair_parents(spans: &mut [ProcessedSpan]) {
    let ids: HashSet<&str> = spans.iter().map(|s| s.id.as_str()).collect();
    let root_id = spans
        .iter()
        .find(|s| s.span_type == SpanType::Agent && s.parent_span_id.is_none())
        .map(|s| s.id.clone());

    let Some(root_id) = root_id else { return };

    for span in spans.iter_mut() {
        if span.id == root_id {
            continue;
        }
        let is_orphan = match &span.parent_span_id {
            None => true,
            Some(parent) => !ids.contains(parent.as_str()),
        };
        if is_orphan {
            span.parent_span_id = Some(root_id.clone());
        }
    }
}

/// Step 5: the whole-trace window real spans fall within.
fn timeline_context(spans: &[Span]) -> (DateTime<Utc>, i64) {
    let min_time = spans.iter().map(|s| s.started_at).min().unwrap();
    let max_time = spans.iter().map(Span::effective_end).max().unwrap();
    let total_duration = (max_time - min_time).num_milliseconds();
    (min_time, total_duration)
}

/// Step 6: percentage offset/width of one span within the trace window.
fn timeline_geometry(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    min_time: DateTime<Utc>,
    total_duration_ms: i64,
) -> (f64, f64) {
    if total_duration_ms == 0 {
        return (0.0, 100.0);
    }
    let offset_ms = (start - min_time).num_milliseconds() as f64;
    let span_ms = (end - start).num_milliseconds().max(0) as f64;
    let timeline_start = offset_ms / total_duration_ms as f64 * 100.0;
    let timeline_width = (span_ms / total_duration_ms as f64 * 100.0).max(1.0);
    (timeline_start, timeline_width)
}

/// Step 7: synthetic tool-use leaves plus the real-span tree, sorted
/// agent-first, then real spans by `startedAt`, then synthetic nodes last.
fn build_tree(spans: &[ProcessedSpan]) -> Vec<TraceTreeNode> {
    let mut by_parent: HashMap<Option<String>, Vec<&ProcessedSpan>> = HashMap::new();
    for span in spans {
        by_parent.entry(span.parent_span_id.clone()).or_default().push(span);
    }

    fn build(parent_id: Option<&str>, by_parent: &HashMap<Option<String>, Vec<&ProcessedSpan>>, depth: u32) -> Vec<TraceTreeNode> {
        let key = parent_id.map(str::to_owned);
        let mut children: Vec<&ProcessedSpan> = by_parent.get(&key).cloned().unwrap_or_default();
        children.sort_by(|a, b| {
            let agent_rank = |s: &ProcessedSpan| if s.span_type == SpanType::Agent { 0 } else { 1 };
            agent_rank(a).cmp(&agent_rank(b)).then(a.started_at.cmp(&b.started_at))
        });

        let mut nodes: Vec<TraceTreeNode> = children
            .into_iter()
            .map(|span| {
                let mut node_children = build(Some(span.id.as_str()), by_parent, depth + 1);
                if span.span_type == SpanType::Llm && !span.tool_uses.is_empty() {
                    node_children.extend(synthetic_tool_nodes(span, depth + 1));
                }
                TraceTreeNode {
                    span: span.clone(),
                    is_tool_use: false,
                    depth,
                    children: node_children,
                }
            })
            .collect();

        nodes
    }

    build(None, &by_parent, 0)
}

fn synthetic_tool_nodes(parent: &ProcessedSpan, depth: u32) -> Vec<TraceTreeNode> {
    parent
        .tool_uses
        .iter()
        .map(|tool_use| TraceTreeNode {
            span: ProcessedSpan {
                id: tool_use.id.clone(),
                trace_id: parent.trace_id.clone(),
                parent_span_id: Some(parent.id.clone()),
                span_type: SpanType::Tool,
                name: tool_use.name.clone(),
                input: tool_use.input.clone(),
                output: tool_use.output.clone(),
                metadata: HashMap::new(),
                input_tokens: None,
                output_tokens: None,
                cache_read_tokens: None,
                cache_write_tokens: None,
                reasoning_tokens: None,
                first_token_ms: None,
                duration_ms: tool_use.duration_ms,
                cost_usd: None,
                status: tool_use.status,
                error_message: None,
                model: None,
                provider: None,
                stop_reason: None,
                thinking: None,
                sub_type: None,
                tool_uses: Vec::new(),
                started_at: parent.started_at,
                ended_at: parent.ended_at,
                user_input: None,
                timeline_start: parent.timeline_start,
                timeline_width: parent.timeline_width,
            },
            is_tool_use: true,
            depth,
            children: Vec::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    fn base_span(id: &str, parent: Option<&str>, span_type: SpanType, offset_secs: i64, duration_ms: i64) -> Span {
        let start = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
            + chrono::Duration::seconds(offset_secs);
        Span {
            id: id.to_string(),
            trace_id: "trace-1".to_string(),
            project_id: "proj-1".to_string(),
            parent_span_id: parent.map(str::to_string),
            span_type,
            name: id.to_string(),
            input: None,
            output: None,
            metadata: StdHashMap::new(),
            input_tokens: Some(10),
            output_tokens: Some(20),
            cache_read_tokens: None,
            cache_write_tokens: None,
            reasoning_tokens: None,
            first_token_ms: None,
            duration_ms: Some(duration_ms as u64),
            cost_usd: Some(0.01),
            status: SpanStatus::Success,
            error_message: None,
            model: None,
            provider: None,
            stop_reason: None,
            thinking: None,
            sub_type: None,
            tool_uses: Vec::new(),
            started_at: start,
            ended_at: start + chrono::Duration::milliseconds(duration_ms),
        }
    }

    #[test]
    fn orphan_span_is_reparented_to_agent_root() {
        let agent = base_span("agent-1", None, SpanType::Agent, 0, 100);
        let mut orphan = base_span("llm-1", Some("missing-parent"), SpanType::Llm, 1, 50);
        orphan.trace_id = "trace-1".to_string();
        let trace = Trace::new("trace-1".to_string(), "proj-1".to_string());

        let detail = process_trace_detail(trace, vec![agent, orphan]);
        let llm = detail.spans.iter().find(|s| s.id == "llm-1").unwrap();
        assert_eq!(llm.parent_span_id.as_deref(), Some("agent-1"));
    }

    #[test]
    fn timeline_geometry_is_zero_width_collapsed_when_trace_is_instant() {
        let agent = base_span("agent-1", None, SpanType::Agent, 0, 0);
        let trace = Trace::new("trace-1".to_string(), "proj-1".to_string());
        let detail = process_trace_detail(trace, vec![agent]);
        let span = &detail.spans[0];
        assert_eq!(span.timeline_start, 0.0);
        assert_eq!(span.timeline_width, 100.0);
    }

    #[test]
    fn tool_use_gets_synthetic_tree_node_with_result_overlay() {
        let mut llm = base_span("llm-1", None, SpanType::Llm, 0, 100);
        llm.input = Some(json!({
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": [{"type": "tool_result", "tool_use_id": "tu-1", "content": "42", "is_error": false}]}
            ]
        }));
        llm.tool_uses = vec![ToolUse {
            id: "tu-1".to_string(),
            name: "search".to_string(),
            input: Some(json!({"q": "rust"})),
            output: None,
            status: SpanStatus::Pending,
            duration_ms: Some(5),
        }];
        let trace = Trace::new("trace-1".to_string(), "proj-1".to_string());

        let detail = process_trace_detail(trace, vec![llm]);
        let span = detail.spans.iter().find(|s| s.id == "llm-1").unwrap();
        assert_eq!(span.tool_uses[0].output, Some(json!("42")));
        assert_eq!(span.tool_uses[0].status, SpanStatus::Success);

        let root = &detail.tree[0];
        assert_eq!(root.children.len(), 1);
        assert!(root.children[0].is_tool_use);
    }

    #[test]
    fn aggregates_sum_tokens_cost_and_duration() {
        let agent = base_span("agent-1", None, SpanType::Agent, 0, 100);
        let llm = base_span("llm-1", Some("agent-1"), SpanType::Llm, 1, 200);
        let trace = Trace::new("trace-1".to_string(), "proj-1".to_string());

        let detail = process_trace_detail(trace, vec![agent, llm]);
        assert_eq!(detail.total_spans, 2);
        assert_eq!(detail.total_tokens, 60);
        assert_eq!(detail.total_duration_ms, 300);
        assert!((detail.total_cost_usd - 0.02).abs() < 1e-9);
    }
}
