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

//! The normalised domain model: `Trace`, `Span`, `ToolUse`, shared by the
//! ingest pipeline and the dual-store repository contract.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-generated id for a trace or span whose SDK did not supply one.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One execution of an agent/conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trace {
    pub id: String,
    pub project_id: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub status: TraceStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trace {
    pub fn new(id: String, project_id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id,
            session_id: None,
            user_id: None,
            name: None,
            status: TraceStatus::Active,
            tags: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Active,
    Completed,
    Error,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Active => "active",
            TraceStatus::Completed => "completed",
            TraceStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for TraceStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TraceStatus::Active),
            "completed" => Ok(TraceStatus::Completed),
            "error" => Ok(TraceStatus::Error),
            other => Err(crate::Error::invalid(format!("unknown trace status: {other}"))),
        }
    }
}

/// One operation inside a trace; append-only once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    pub id: String,
    pub trace_id: String,
    pub project_id: String,
    pub parent_span_id: Option<String>,

    #[serde(rename = "type")]
    pub span_type: SpanType,
    pub name: String,
    pub input: Option<Value>,
    pub output: Option<Value>,
    #[serde(default)]
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
    #[serde(default)]
    pub tool_uses: Vec<ToolUse>,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Span {
    /// `startedAt + durationMs` when an explicit duration overrides the
    /// wall-clock `endedAt` for timeline computation.
    pub fn effective_end(&self) -> DateTime<Utc> {
        match self.duration_ms {
            Some(ms) => self.started_at + chrono::Duration::milliseconds(ms as i64),
            None => self.ended_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
    Llm,
    Agent,
    Tool,
    Retrieval,
    Embedding,
    Guardrail,
    Rerank,
    Custom,
}

impl SpanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanType::Llm => "llm",
            SpanType::Agent => "agent",
            SpanType::Tool => "tool",
            SpanType::Retrieval => "retrieval",
            SpanType::Embedding => "embedding",
            SpanType::Guardrail => "guardrail",
            SpanType::Rerank => "rerank",
            SpanType::Custom => "custom",
        }
    }
}

impl std::str::FromStr for SpanType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "llm" => SpanType::Llm,
            "agent" => SpanType::Agent,
            "tool" => SpanType::Tool,
            "retrieval" => SpanType::Retrieval,
            "embedding" => SpanType::Embedding,
            "guardrail" => SpanType::Guardrail,
            "rerank" => SpanType::Rerank,
            "custom" => SpanType::Custom,
            // C3 step 2: "closed-set string->enum map; default llm"
            _ => SpanType::Llm,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Pending,
    Success,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Pending => "pending",
            SpanStatus::Success => "success",
            SpanStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for SpanStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => SpanStatus::Pending,
            "success" => SpanStatus::Success,
            "error" => SpanStatus::Error,
            _ => SpanStatus::Pending,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LlmSubType {
    Planning,
    Response,
}

impl Default for LlmSubType {
    fn default() -> Self {
        LlmSubType::Response
    }
}

/// A call requested by an LLM, and (once matched) its later result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub status: SpanStatus,
    pub duration_ms: Option<u64>,
}

impl ToolUse {
    /// Synthesise a stable id when the provider payload didn't supply one.
    pub fn synthetic_id(span_id: &str, index: usize) -> String {
        format!("{span_id}-tool-{index}")
    }
}

/// A trace together with all of its spans, as returned by `Store::get_trace`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceWithSpans {
    pub trace: Trace,
    pub spans: Vec<Span>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_type_unknown_defaults_to_llm() {
        assert_eq!("bogus".parse::<SpanType>().unwrap(), SpanType::Llm);
        assert_eq!("tool".parse::<SpanType>().unwrap(), SpanType::Tool);
    }

    #[test]
    fn effective_end_prefers_duration_override() {
        let mut span = Span {
            id: "s1".into(),
            trace_id: "t1".into(),
            project_id: "p1".into(),
            parent_span_id: None,
            span_type: SpanType::Llm,
            name: "n".into(),
            input: None,
            output: None,
            metadata: HashMap::new(),
            input_tokens: None,
            output_tokens: None,
            cache_read_tokens: None,
            cache_write_tokens: None,
            reasoning_tokens: None,
            first_token_ms: None,
            duration_ms: Some(500),
            cost_usd: None,
            status: SpanStatus::Success,
            error_message: None,
            model: None,
            provider: None,
            stop_reason: None,
            thinking: None,
            sub_type: None,
            tool_uses: Vec::new(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
        };
        span.ended_at = span.started_at;
        let expected = span.started_at + chrono::Duration::milliseconds(500);
        assert_eq!(span.effective_end(), expected);

        span.duration_ms = None;
        assert_eq!(span.effective_end(), span.ended_at);
    }
}
