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

//! List/stats query layer: a thin facade over the repository contract,
//! plus the one place a single trace's spans are handed off to the
//! trace-detail processor.

use std::sync::Arc;

use traceforge_core::{Error, Result};
use traceforge_storage::{
    ListTracesResponse, SessionFilter, SessionSummary, Stats, StatsPeriod, Store, TraceFilter,
    UsagePoint, UsageSeriesOptions,
};

use crate::detail::{process_trace_detail, TraceDetailResponse};

pub struct QueryService {
    store: Arc<dyn Store>,
}

impl QueryService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list_traces(&self, project_id: &str, filter: TraceFilter) -> Result<ListTracesResponse> {
        self.store.list_traces(project_id, filter).await
    }

    /// `GET /api/v1/traces/{id}`: 404 (via the store's `NotFound`) when
    /// the trace is absent in the project's scope.
    pub async fn get_trace_detail(&self, project_id: &str, trace_id: &str) -> Result<TraceDetailResponse> {
        let with_spans = self.store.get_trace(project_id, trace_id).await?;
        Ok(process_trace_detail(with_spans.trace, with_spans.spans))
    }

    pub async fn list_sessions(&self, project_id: &str, filter: SessionFilter) -> Result<Vec<SessionSummary>> {
        self.store.list_sessions(project_id, filter).await
    }

    pub async fn get_stats(&self, project_id: &str, period: StatsPeriod) -> Result<Stats> {
        if period.from > period.to {
            return Err(Error::invalid("from must not be after to"));
        }
        self.store.get_stats(project_id, period).await
    }

    pub async fn get_usage_time_series(&self, project_id: &str, opts: UsageSeriesOptions) -> Result<Vec<UsagePoint>> {
        if opts.from > opts.to {
            return Err(Error::invalid("from must not be after to"));
        }
        self.store.get_usage_time_series(project_id, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use traceforge_core::{Span, Trace, TraceStatus, TraceWithSpans};

    struct FakeStore;

    #[async_trait]
    impl Store for FakeStore {
        async fn create_trace(&self, trace: Trace) -> Result<Trace> {
            Ok(trace)
        }
        async fn get_trace(&self, _project_id: &str, trace_id: &str) -> Result<TraceWithSpans> {
            if trace_id == "missing" {
                return Err(Error::not_found("trace"));
            }
            Ok(TraceWithSpans {
                trace: Trace::new(trace_id.to_string(), "proj-1".to_string()),
                spans: Vec::<Span>::new(),
            })
        }
        async fn create_spans(&self, spans: &[Span]) -> Result<usize> {
            Ok(spans.len())
        }
        async fn update_trace_status(&self, _project_id: &str, _trace_id: &str, _status: TraceStatus) -> Result<()> {
            Ok(())
        }
        async fn list_traces(&self, _project_id: &str, filter: TraceFilter) -> Result<ListTracesResponse> {
            Ok(ListTracesResponse {
                data: Vec::new(),
                total: 0,
                limit: filter.limit,
                offset: filter.offset,
            })
        }
        async fn delete_all_traces(&self, _project_id: &str) -> Result<Option<u64>> {
            Ok(None)
        }
        async fn list_sessions(&self, _project_id: &str, _filter: SessionFilter) -> Result<Vec<SessionSummary>> {
            Ok(Vec::new())
        }
        async fn get_stats(&self, _project_id: &str, _period: StatsPeriod) -> Result<Stats> {
            Ok(Stats::default())
        }
        async fn get_usage_time_series(&self, _project_id: &str, _opts: UsageSeriesOptions) -> Result<Vec<UsagePoint>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn get_trace_detail_propagates_not_found() {
        let service = QueryService::new(Arc::new(FakeStore));
        let err = service.get_trace_detail("proj-1", "missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn get_stats_rejects_inverted_range() {
        let service = QueryService::new(Arc::new(FakeStore));
        let now = Utc::now();
        let period = StatsPeriod { from: now, to: now - chrono::Duration::hours(1) };
        let err = service.get_stats("proj-1", period).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
