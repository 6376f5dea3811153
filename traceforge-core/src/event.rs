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

//! Wire shape accepted by `POST /api/v1/ingest`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One raw event as submitted by an SDK. Only `spanType` and `status` are
/// required; everything else is optional and defaulted by the normaliser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEvent {
    pub span_type: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub raw_response: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,

    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,

    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_stack: Option<String>,

    #[serde(default)]
    pub streaming: Option<bool>,

    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub tool_call_id: Option<String>,

    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,

    #[serde(default)]
    pub cache_read_tokens: Option<u64>,
    #[serde(default)]
    pub cache_write_tokens: Option<u64>,
    #[serde(default)]
    pub reasoning_tokens: Option<u64>,
    #[serde(default)]
    pub first_token_ms: Option<u64>,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Request body for `POST /api/v1/ingest`.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub events: Vec<IngestEvent>,
}

/// Response for `POST /api/v1/ingest`.
#[derive(Debug, Clone, Serialize, Default)]
pub struct IngestResponse {
    pub success: bool,
    pub processed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<IngestEventError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestEventError {
    pub index: usize,
    pub message: String,
}
