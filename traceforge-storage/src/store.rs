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

//! The repository contract, identical over the row and column backends.
//! Every operation takes `project_id` so tenant isolation is enforced in
//! one place rather than by each query author remembering to add a
//! predicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use traceforge_core::{Span, Trace, TraceStatus, TraceWithSpans};

use crate::error::Result;

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 100;

/// Clamp a requested page size to `[1, 100]`, defaulting to 50: a
/// `limit > 100` or `limit <= 0` falls back to the default rather than
/// being rejected.
pub fn clamp_limit(limit: Option<i64>) -> u32 {
    match limit {
        Some(l) if l > 0 && l <= MAX_LIMIT as i64 => l as u32,
        Some(l) if l > MAX_LIMIT as i64 => DEFAULT_LIMIT,
        Some(_) => DEFAULT_LIMIT, // l <= 0
        None => DEFAULT_LIMIT,
    }
}

/// `offset < 0` becomes 0.
pub fn clamp_offset(offset: Option<i64>) -> u32 {
    match offset {
        Some(o) if o > 0 => o as u32,
        _ => 0,
    }
}

#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<TraceStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl TraceFilter {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: clamp_limit(limit),
            offset: clamp_offset(offset),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceWithMetrics {
    #[serde(flatten)]
    pub trace: Trace,
    pub total_spans: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListTracesResponse {
    pub data: Vec<TraceWithMetrics>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub user_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl SessionFilter {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: clamp_limit(limit),
            offset: clamp_offset(offset),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub trace_count: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub has_error: bool,
    pub has_active: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct StatsPeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Stats {
    pub total_traces: u64,
    pub total_spans: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub avg_duration_ms: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
    Week,
}

impl std::str::FromStr for Granularity {
    type Err = traceforge_core::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            other => Err(traceforge_core::Error::invalid(format!(
                "invalid granularity: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UsageSeriesOptions {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsagePoint {
    pub time: DateTime<Utc>,
    pub traces: u64,
    pub spans: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}

/// The single abstract interface implemented by both backends.
#[async_trait]
pub trait Store: Send + Sync {
    /// Idempotent on `(projectId, id)` only when an id is supplied;
    /// otherwise a fresh id is generated.
    async fn create_trace(&self, trace: Trace) -> Result<Trace>;

    /// Returns the trace and all of its spans ordered by `startedAt`;
    /// enforces tenant scope; `NotFound` if absent.
    async fn get_trace(&self, project_id: &str, trace_id: &str) -> Result<TraceWithSpans>;

    /// All-or-nothing within one backend transaction (row store);
    /// best-effort per-row batch append (column store).
    async fn create_spans(&self, spans: &[Span]) -> Result<usize>;

    /// Re-insert with new `updatedAt` (column) or `UPDATE` (row).
    async fn update_trace_status(
        &self,
        project_id: &str,
        trace_id: &str,
        status: TraceStatus,
    ) -> Result<()>;

    async fn list_traces(
        &self,
        project_id: &str,
        filter: TraceFilter,
    ) -> Result<ListTracesResponse>;

    /// Cascades to spans; returns affected count when available (`None` on
    /// merge-based backends where the deletion is a background marker).
    async fn delete_all_traces(&self, project_id: &str) -> Result<Option<u64>>;

    async fn list_sessions(
        &self,
        project_id: &str,
        filter: SessionFilter,
    ) -> Result<Vec<SessionSummary>>;

    async fn get_stats(&self, project_id: &str, period: StatsPeriod) -> Result<Stats>;

    async fn get_usage_time_series(
        &self,
        project_id: &str,
        opts: UsageSeriesOptions,
    ) -> Result<Vec<UsagePoint>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limit_defaults_and_bounds() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 50);
        assert_eq!(clamp_limit(Some(-5)), 50);
        assert_eq!(clamp_limit(Some(200)), 50);
        assert_eq!(clamp_limit(Some(30)), 30);
        assert_eq!(clamp_limit(Some(100)), 100);
    }

    #[test]
    fn clamp_offset_floors_at_zero() {
        assert_eq!(clamp_offset(None), 0);
        assert_eq!(clamp_offset(Some(-10)), 0);
        assert_eq!(clamp_offset(Some(10)), 10);
    }
}
