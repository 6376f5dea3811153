// Copyright 2025 TraceForge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! List/detail/session/analytics handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use traceforge_core::TraceStatus;
use traceforge_storage::{
    ListTracesResponse, SessionFilter, SessionSummary, Stats, StatsPeriod, TraceFilter,
    UsagePoint, UsageSeriesOptions,
};
use traceforge_query::TraceDetailResponse;

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TraceListParams {
    #[serde(flatten)]
    pub page: PageParams,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn list_traces(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<TraceListParams>,
) -> ApiResult<Json<ListTracesResponse>> {
    let status = params
        .status
        .map(|s| s.parse::<TraceStatus>())
        .transpose()
        .map_err(|_: traceforge_core::Error| ApiError::BadRequest("invalid status".to_string()))?;

    let filter = TraceFilter {
        session_id: params.session_id,
        user_id: params.user_id,
        status,
        from: params.from,
        to: params.to,
        ..TraceFilter::new(params.page.limit, params.page.offset)
    };

    let response = state.query.list_traces(&auth.project_id, filter).await?;
    Ok(Json(response))
}

pub async fn get_trace_detail(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(trace_id): Path<String>,
) -> ApiResult<Json<TraceDetailResponse>> {
    let detail = state.query.get_trace_detail(&auth.project_id, &trace_id).await?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
pub struct SessionListParams {
    #[serde(flatten)]
    pub page: PageParams,
    pub user_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<SessionListParams>,
) -> ApiResult<Json<Vec<SessionSummary>>> {
    let filter = SessionFilter {
        user_id: params.user_id,
        from: params.from,
        to: params.to,
        ..SessionFilter::new(params.page.limit, params.page.offset)
    };

    let sessions = state.query.list_sessions(&auth.project_id, filter).await?;
    Ok(Json(sessions))
}

#[derive(Debug, Deserialize)]
pub struct PeriodParams {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

pub async fn get_stats(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<PeriodParams>,
) -> ApiResult<Json<Stats>> {
    let period = StatsPeriod { from: params.from, to: params.to };
    let stats = state.query.get_stats(&auth.project_id, period).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct UsageParams {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default = "default_granularity")]
    pub granularity: String,
}

fn default_granularity() -> String {
    "day".to_string()
}

pub async fn get_usage(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<UsageParams>,
) -> ApiResult<Json<Vec<UsagePoint>>> {
    let granularity = params
        .granularity
        .parse()
        .map_err(|_: traceforge_core::Error| ApiError::BadRequest("invalid granularity".to_string()))?;

    let opts = UsageSeriesOptions { from: params.from, to: params.to, granularity };
    let series = state.query.get_usage_time_series(&auth.project_id, opts).await?;
    Ok(Json(series))
}
