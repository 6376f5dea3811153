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

//! Ingest service: the single entry point `POST /api/v1/ingest`
//! resolves to, dispatching to either the worker pool or an inline run
//! depending on the configured mode.

use std::sync::Arc;

use traceforge_core::{IngestEvent, IngestEventError, IngestResponse};

use crate::pool::{run_inline, Job, PoolStatsSnapshot, WorkerPoolHandle};
use crate::processor::EventProcessor;

/// Owns whichever dispatch strategy the deployment is configured for.
pub enum IngestService {
    /// Enqueues and returns immediately; the batch is accepted on
    /// admission, not on completion.
    Async { pool: WorkerPoolHandle },
    /// Runs the event processor inline and waits for it to finish.
    Sync { processor: Arc<EventProcessor> },
}

impl IngestService {
    pub fn async_mode(pool: WorkerPoolHandle) -> Self {
        IngestService::Async { pool }
    }

    pub fn sync_mode(processor: Arc<EventProcessor>) -> Self {
        IngestService::Sync { processor }
    }

    /// `None` in sync mode, where there is no queue to drop jobs from.
    pub fn queue_stats(&self) -> Option<PoolStatsSnapshot> {
        match self {
            IngestService::Async { pool } => Some(pool.stats()),
            IngestService::Sync { .. } => None,
        }
    }

    /// Dispatches a batch to whichever mode is configured. An empty batch
    /// is a no-op regardless of mode.
    pub async fn ingest_events(&self, project_id: &str, events: Vec<IngestEvent>) -> IngestResponse {
        if events.is_empty() {
            return IngestResponse {
                success: true,
                processed: 0,
                errors: Vec::new(),
            };
        }

        match self {
            IngestService::Async { pool, .. } => {
                let processed = events.len();
                let job = Job {
                    project_id: project_id.to_string(),
                    events,
                };
                let accepted = pool.enqueue(job);
                IngestResponse {
                    success: accepted,
                    processed,
                    errors: Vec::new(),
                }
            }
            IngestService::Sync { processor } => {
                let total = events.len();
                let failures = run_inline(processor, project_id, &events).await;
                if failures.is_empty() {
                    IngestResponse {
                        success: true,
                        processed: total,
                        errors: Vec::new(),
                    }
                } else {
                    IngestResponse {
                        success: false,
                        processed: total - failures.len(),
                        errors: failures
                            .into_iter()
                            .map(|(index, message)| IngestEventError { index, message })
                            .collect(),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use traceforge_core::{PricingCalculator, Result as CoreResult, Span, Trace, TraceStatus, TraceWithSpans};
    use traceforge_storage::{
        Granularity, ListTracesResponse, SessionFilter, SessionSummary, Stats, StatsPeriod, Store,
        TraceFilter, UsagePoint, UsageSeriesOptions,
    };

    #[tokio::test]
    async fn empty_batch_short_circuits_without_touching_dispatch() {
        // An unused handle is enough to prove enqueue is never reached.
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let stats = std::sync::Arc::new(crate::pool::PoolStats::default());
        let handle = crate::pool::WorkerPoolHandle::for_test(tx, stats);
        let service = IngestService::async_mode(handle);

        let response = service.ingest_events("proj-1", Vec::new()).await;
        assert!(response.success);
        assert_eq!(response.processed, 0);
    }

    struct AlwaysFailsStore;

    #[async_trait]
    impl Store for AlwaysFailsStore {
        async fn create_trace(&self, _trace: Trace) -> CoreResult<Trace> {
            Err(traceforge_core::Error::internal("storage down"))
        }
        async fn get_trace(&self, _project_id: &str, _trace_id: &str) -> CoreResult<TraceWithSpans> {
            Err(traceforge_core::Error::not_found("trace"))
        }
        async fn create_spans(&self, _spans: &[Span]) -> CoreResult<usize> {
            Err(traceforge_core::Error::internal("storage down"))
        }
        async fn update_trace_status(&self, _project_id: &str, _trace_id: &str, _status: TraceStatus) -> CoreResult<()> {
            Err(traceforge_core::Error::internal("storage down"))
        }
        async fn list_traces(&self, _project_id: &str, _filter: TraceFilter) -> CoreResult<ListTracesResponse> {
            unimplemented!()
        }
        async fn delete_all_traces(&self, _project_id: &str) -> CoreResult<Option<u64>> {
            unimplemented!()
        }
        async fn list_sessions(&self, _project_id: &str, _filter: SessionFilter) -> CoreResult<Vec<SessionSummary>> {
            unimplemented!()
        }
        async fn get_stats(&self, _project_id: &str, _period: StatsPeriod) -> CoreResult<Stats> {
            unimplemented!()
        }
        async fn get_usage_time_series(&self, _project_id: &str, _opts: UsageSeriesOptions) -> CoreResult<Vec<UsagePoint>> {
            unimplemented!()
        }
    }

    fn failing_event() -> IngestEvent {
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
            status: "success".to_string(),
            error_message: None,
            error_stack: None,
            streaming: None,
            session_id: None,
            user_id: None,
            trace_id: Some("trace-1".to_string()),
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
    async fn sync_mode_surfaces_per_event_errors_on_store_failure() {
        let processor = Arc::new(EventProcessor::new(Arc::new(AlwaysFailsStore), PricingCalculator::with_builtins()));
        let service = IngestService::sync_mode(processor);

        let response = service.ingest_events("proj-1", vec![failing_event()]).await;

        assert!(!response.success);
        assert_eq!(response.processed, 0);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].index, 0);
    }
}
