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

//! End-to-end check that a raw batch posted to the ingest service lands in
//! the store and comes back out through `get_trace` with the same spans,
//! using the real row-oriented store rather than a fake.

use std::sync::Arc;

use sqlx::SqlitePool;

use traceforge_core::{IngestEvent, PricingCalculator};
use traceforge_ingest::{EventProcessor, IngestService};
use traceforge_storage::{RowStore, Store};

async fn sqlite_store() -> Arc<RowStore> {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    traceforge_storage::migrate::apply_row_schema(&pool).await.unwrap();
    Arc::new(RowStore::new(pool))
}

fn llm_event(trace_id: &str, status: &str) -> IngestEvent {
    IngestEvent {
        span_type: "llm".to_string(),
        provider: Some("openai".to_string()),
        model: Some("gpt-4o".to_string()),
        name: None,
        input: None,
        raw_response: None,
        output: None,
        input_tokens: Some(100),
        output_tokens: Some(50),
        duration_ms: Some(250),
        status: status.to_string(),
        error_message: None,
        error_stack: None,
        streaming: None,
        session_id: Some("session-1".to_string()),
        user_id: Some("user-1".to_string()),
        trace_id: Some(trace_id.to_string()),
        span_id: None,
        parent_span_id: None,
        tool_call_id: None,
        stop_reason: None,
        thinking: None,
        cache_read_tokens: None,
        cache_write_tokens: None,
        reasoning_tokens: None,
        first_token_ms: None,
        metadata: std::collections::HashMap::new(),
        tags: Vec::new(),
        timestamp: None,
    }
}

#[tokio::test]
async fn sync_ingest_round_trips_into_store() {
    let store = sqlite_store().await;
    let processor = Arc::new(EventProcessor::new(store.clone(), PricingCalculator::with_builtins()));
    let service = IngestService::sync_mode(processor);

    let events = vec![llm_event("trace-rt-1", "success"), llm_event("trace-rt-1", "success")];
    let response = service.ingest_events("proj-rt", events).await;

    assert!(response.success);
    assert_eq!(response.processed, 2);
    assert!(response.errors.is_empty());

    let detail = store.get_trace("proj-rt", "trace-rt-1").await.unwrap();
    assert_eq!(detail.trace.id, "trace-rt-1");
    assert_eq!(detail.spans.len(), 2);
    assert!(detail.spans.iter().all(|span| span.input_tokens == Some(100)));
}

#[tokio::test]
async fn sync_ingest_marks_trace_errored_when_a_span_fails() {
    let store = sqlite_store().await;
    let processor = Arc::new(EventProcessor::new(store.clone(), PricingCalculator::with_builtins()));
    let service = IngestService::sync_mode(processor);

    let events = vec![llm_event("trace-rt-2", "success"), llm_event("trace-rt-2", "error")];
    let response = service.ingest_events("proj-rt", events).await;

    assert!(response.success);
    let detail = store.get_trace("proj-rt", "trace-rt-2").await.unwrap();
    assert_eq!(detail.trace.status, traceforge_core::TraceStatus::Error);
    assert_eq!(detail.spans.len(), 2);
}
