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

//! Event processor: groups a batch by `traceId` or falls back to
//! `sessionId`, upserts the owning trace, writes spans, and sets terminal
//! status. A failure on one group is logged and the remaining groups
//! still run.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use traceforge_core::{
    new_id, Error, IngestEvent, PricingCalculator, Result, SpanStatus, Trace, TraceStatus,
};
use traceforge_storage::Store;

use crate::normalize::event_to_span;

pub struct EventProcessor {
    store: Arc<dyn Store>,
    pricing: PricingCalculator,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn Store>, pricing: PricingCalculator) -> Self {
        Self { store, pricing }
    }

    /// Dispatches a batch to its per-trace or per-session groups. A
    /// failing group is logged and its original event indices are
    /// returned to the caller alongside the error message; an empty
    /// result means every group succeeded.
    pub async fn process_events(&self, project_id: &str, events: &[IngestEvent]) -> Vec<(usize, String)> {
        if events.is_empty() {
            return Vec::new();
        }

        let (by_trace, by_session) = partition_events(events);
        let mut failures = Vec::new();

        for (trace_id, group) in by_trace {
            if let Err(err) = self.process_explicit_trace_group(project_id, &trace_id, &group).await {
                error!(project_id, trace_id, error = %err, "ingest group failed");
                let message = err.to_string();
                failures.extend(group.iter().map(|(idx, _)| (*idx, message.clone())));
            }
        }

        for (session_id, group) in by_session {
            if let Err(err) = self.process_session_group(project_id, &session_id, &group).await {
                error!(project_id, session_id, error = %err, "ingest group failed");
                let message = err.to_string();
                failures.extend(group.iter().map(|(idx, _)| (*idx, message.clone())));
            }
        }

        failures.sort_by_key(|(idx, _)| *idx);
        failures
    }

    /// A group keyed by an SDK-supplied `traceId`. Never promotes the
    /// trace to `completed` on its own, only to `error`.
    async fn process_explicit_trace_group(
        &self,
        project_id: &str,
        trace_id: &str,
        group: &[(usize, &IngestEvent)],
    ) -> Result<()> {
        let existing = match self.store.get_trace(project_id, trace_id).await {
            Ok(with_spans) => Some(with_spans.trace),
            Err(Error::NotFound(_)) => None,
            Err(other) => return Err(other),
        };

        if existing.is_none() {
            let trace = build_trace(project_id, trace_id.to_string(), group);
            self.store.create_trace(trace).await?;
        }

        let (spans, has_errors) = normalize_group(&self.pricing, project_id, trace_id, group);
        self.store.create_spans(&spans).await?;

        if has_errors {
            self.store
                .update_trace_status(project_id, trace_id, TraceStatus::Error)
                .await?;
        }
        Ok(())
    }

    /// Events with no `traceId`, grouped by `sessionId` (legacy
    /// behaviour); always creates a new trace and always reaches a
    /// terminal status.
    async fn process_session_group(
        &self,
        project_id: &str,
        _session_id: &str,
        group: &[(usize, &IngestEvent)],
    ) -> Result<()> {
        let trace_id = new_id();
        let trace = build_trace(project_id, trace_id.clone(), group);
        self.store.create_trace(trace).await?;

        let (spans, has_errors) = normalize_group(&self.pricing, project_id, &trace_id, group);
        self.store.create_spans(&spans).await?;

        let terminal = if has_errors { TraceStatus::Error } else { TraceStatus::Completed };
        self.store.update_trace_status(project_id, &trace_id, terminal).await?;

        Ok(())
    }
}

fn normalize_group(
    pricing: &PricingCalculator,
    project_id: &str,
    trace_id: &str,
    group: &[(usize, &IngestEvent)],
) -> (Vec<traceforge_core::Span>, bool) {
    let mut spans = Vec::with_capacity(group.len());
    let mut has_errors = false;
    for (_, event) in group {
        let span = event_to_span(pricing, project_id, trace_id, event);
        if span.status == SpanStatus::Error {
            has_errors = true;
        }
        spans.push(span);
    }
    (spans, has_errors)
}

/// Builds a fresh [`Trace`] from the first event in a group:
/// `sessionId`/`userId`/`tags`/`metadata`/`input` come from the first
/// event; `name` prefers the first `agent`-typed event's name, falling
/// back to `metadata._traceName`.
fn build_trace(project_id: &str, id: String, group: &[(usize, &IngestEvent)]) -> Trace {
    let mut trace = Trace::new(id, project_id.to_string());
    let Some((_, first)) = group.first() else {
        return trace;
    };

    trace.session_id = first.session_id.clone();
    trace.user_id = first.user_id.clone();
    trace.tags = first.tags.clone();
    trace.metadata = first.metadata.clone();
    if let Some(input) = &first.input {
        trace.metadata.insert("input".to_string(), input.clone());
    }

    trace.name = group
        .iter()
        .find(|(_, e)| e.span_type == "agent" && e.name.as_deref().is_some_and(|n| !n.is_empty()))
        .and_then(|(_, e)| e.name.clone())
        .or_else(|| {
            trace
                .metadata
                .get("_traceName")
                .and_then(Value::as_str)
                .map(str::to_owned)
        });

    trace
}

type GroupMap = Vec<(String, Vec<usize>)>;
type EventGroups<'a> = Vec<(String, Vec<(usize, &'a IngestEvent)>)>;

/// Partitions the batch by trace then session, preserving first-seen
/// group order, original within-group event order, and each event's
/// original position in the batch (so a failing group can report the
/// indices it covers).
fn partition_events<'a>(events: &'a [IngestEvent]) -> (EventGroups<'a>, EventGroups<'a>) {
    let mut trace_order: GroupMap = Vec::new();
    let mut trace_index: HashMap<&str, usize> = HashMap::new();
    let mut session_order: GroupMap = Vec::new();
    let mut session_index: HashMap<&str, usize> = HashMap::new();

    for (i, event) in events.iter().enumerate() {
        if let Some(trace_id) = event.trace_id.as_deref().filter(|s| !s.is_empty()) {
            let idx = *trace_index.entry(trace_id).or_insert_with(|| {
                trace_order.push((trace_id.to_string(), Vec::new()));
                trace_order.len() - 1
            });
            trace_order[idx].1.push(i);
        } else {
            let session_id = event.session_id.as_deref().unwrap_or("");
            let idx = *session_index.entry(session_id).or_insert_with(|| {
                session_order.push((session_id.to_string(), Vec::new()));
                session_order.len() - 1
            });
            session_order[idx].1.push(i);
        }
    }

    let resolve = |order: GroupMap| {
        order
            .into_iter()
            .map(|(key, indices)| (key, indices.into_iter().map(|i| (i, &events[i])).collect()))
            .collect()
    };
    (resolve(trace_order), resolve(session_order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;
    use traceforge_core::{Span, TraceWithSpans};
    use traceforge_storage::{
        Granularity, ListTracesResponse, SessionFilter, SessionSummary, Stats, StatsPeriod,
        TraceFilter, UsagePoint, UsageSeriesOptions,
    };

    #[derive(Default)]
    struct FakeStore {
        traces: Mutex<StdHashMap<String, Trace>>,
        spans: Mutex<Vec<Span>>,
        fail_create_spans: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn create_trace(&self, trace: Trace) -> Result<Trace> {
            self.traces.lock().unwrap().insert(trace.id.clone(), trace.clone());
            Ok(trace)
        }

        async fn get_trace(&self, _project_id: &str, trace_id: &str) -> Result<TraceWithSpans> {
            let traces = self.traces.lock().unwrap();
            let trace = traces.get(trace_id).cloned().ok_or_else(|| Error::not_found("trace"))?;
            let spans = self.spans.lock().unwrap().iter().filter(|s| s.trace_id == trace_id).cloned().collect();
            Ok(TraceWithSpans { trace, spans })
        }

        async fn create_spans(&self, spans: &[Span]) -> Result<usize> {
            if self.fail_create_spans.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(Error::internal("storage unavailable"));
            }
            self.spans.lock().unwrap().extend_from_slice(spans);
            Ok(spans.len())
        }

        async fn update_trace_status(&self, _project_id: &str, trace_id: &str, status: TraceStatus) -> Result<()> {
            if let Some(trace) = self.traces.lock().unwrap().get_mut(trace_id) {
                trace.status = status;
            }
            Ok(())
        }

        async fn list_traces(&self, _project_id: &str, _filter: TraceFilter) -> Result<ListTracesResponse> {
            unimplemented!()
        }

        async fn delete_all_traces(&self, _project_id: &str) -> Result<Option<u64>> {
            unimplemented!()
        }

        async fn list_sessions(&self, _project_id: &str, _filter: SessionFilter) -> Result<Vec<SessionSummary>> {
            unimplemented!()
        }

        async fn get_stats(&self, _project_id: &str, _period: StatsPeriod) -> Result<Stats> {
            unimplemented!()
        }

        async fn get_usage_time_series(&self, _project_id: &str, _opts: UsageSeriesOptions) -> Result<Vec<UsagePoint>> {
            unimplemented!()
        }
    }

    fn event(trace_id: Option<&str>, session_id: Option<&str>, status: &str) -> IngestEvent {
        IngestEvent {
            span_type: "llm".to_string(),
            provider: None,
            model: None,
            name: None,
            input: None,
            raw_response: None,
            output: None,
            input_tokens: None,
            output_tokens: None,
            duration_ms: None,
            status: status.to_string(),
            error_message: None,
            error_stack: None,
            streaming: None,
            session_id: session_id.map(str::to_string),
            user_id: None,
            trace_id: trace_id.map(str::to_string),
            span_id: None,
            parent_span_id: None,
            tool_call_id: None,
            stop_reason: None,
            thinking: None,
            cache_read_tokens: None,
            cache_write_tokens: None,
            reasoning_tokens: None,
            first_token_ms: None,
            metadata: StdHashMap::new(),
            tags: Vec::new(),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = Arc::new(FakeStore::default());
        let processor = EventProcessor::new(store, PricingCalculator::with_builtins());
        assert!(processor.process_events("proj-1", &[]).await.is_empty());
    }

    #[tokio::test]
    async fn session_group_reaches_completed_without_errors() {
        let store = Arc::new(FakeStore::default());
        let processor = EventProcessor::new(store.clone(), PricingCalculator::with_builtins());
        let events = vec![event(None, Some("sess-1"), "success"), event(None, Some("sess-1"), "success")];
        let failures = processor.process_events("proj-1", &events).await;
        assert!(failures.is_empty());

        let traces = store.traces.lock().unwrap();
        assert_eq!(traces.len(), 1);
        let trace = traces.values().next().unwrap();
        assert_eq!(trace.status, TraceStatus::Completed);
    }

    #[tokio::test]
    async fn session_group_with_error_span_reaches_error() {
        let store = Arc::new(FakeStore::default());
        let processor = EventProcessor::new(store.clone(), PricingCalculator::with_builtins());
        let events = vec![event(None, Some("sess-1"), "success"), event(None, Some("sess-1"), "error")];
        let failures = processor.process_events("proj-1", &events).await;
        assert!(failures.is_empty());

        let traces = store.traces.lock().unwrap();
        let trace = traces.values().next().unwrap();
        assert_eq!(trace.status, TraceStatus::Error);
    }

    #[tokio::test]
    async fn explicit_trace_group_stays_active_without_errors() {
        let store = Arc::new(FakeStore::default());
        let processor = EventProcessor::new(store.clone(), PricingCalculator::with_builtins());
        let events = vec![event(Some("trace-1"), None, "success")];
        let failures = processor.process_events("proj-1", &events).await;
        assert!(failures.is_empty());

        let traces = store.traces.lock().unwrap();
        let trace = traces.get("trace-1").unwrap();
        assert_eq!(trace.status, TraceStatus::Active);
    }

    #[tokio::test]
    async fn explicit_trace_group_with_error_is_marked_error() {
        let store = Arc::new(FakeStore::default());
        let processor = EventProcessor::new(store.clone(), PricingCalculator::with_builtins());
        let events = vec![event(Some("trace-1"), None, "error")];
        let failures = processor.process_events("proj-1", &events).await;
        assert!(failures.is_empty());

        let traces = store.traces.lock().unwrap();
        assert_eq!(traces.get("trace-1").unwrap().status, TraceStatus::Error);
    }

    #[tokio::test]
    async fn second_batch_appends_spans_to_same_trace() {
        let store = Arc::new(FakeStore::default());
        let processor = EventProcessor::new(store.clone(), PricingCalculator::with_builtins());
        processor
            .process_events("proj-1", &[event(Some("trace-1"), None, "success")])
            .await;
        processor
            .process_events("proj-1", &[event(Some("trace-1"), None, "success")])
            .await;

        assert_eq!(store.spans.lock().unwrap().len(), 2);
        assert_eq!(store.traces.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn storage_failure_reports_original_indices() {
        let store = Arc::new(FakeStore::default());
        store.fail_create_spans.store(true, std::sync::atomic::Ordering::Relaxed);
        let processor = EventProcessor::new(store.clone(), PricingCalculator::with_builtins());
        let events = vec![
            event(Some("trace-1"), None, "success"),
            event(Some("trace-1"), None, "success"),
            event(Some("trace-2"), None, "success"),
        ];

        let mut failures = processor.process_events("proj-1", &events).await;
        failures.sort_by_key(|(idx, _)| *idx);

        assert_eq!(failures.len(), 3);
        assert_eq!(failures[0].0, 0);
        assert_eq!(failures[1].0, 1);
        assert_eq!(failures[2].0, 2);
        assert!(failures.iter().all(|(_, message)| message.contains("storage unavailable")));
    }
}
