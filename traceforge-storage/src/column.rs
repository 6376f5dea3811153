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

//! Column-oriented analytics backend: append-only, partitioned-by-month
//! tables, no `UPDATE`. A trace "update" is a fresh row insert; readers take
//! the row with the greatest `updated_at` per id ("latest wins"). This
//! trades point-lookup latency for ingest throughput and cheap wide scans.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, QueryBuilder, Row, Postgres};
use std::str::FromStr;

use traceforge_core::{Span, SpanStatus, SpanType, Trace, TraceStatus, TraceWithSpans};

use crate::error::{map_sqlx_err, Result};
use crate::migrate;
use crate::store::{
    Granularity, ListTracesResponse, SessionFilter, SessionSummary, Stats, StatsPeriod, Store,
    TraceFilter, TraceWithMetrics, UsagePoint, UsageSeriesOptions,
};

pub struct ColumnStore {
    pool: PgPool,
}

impl ColumnStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensures the partition covering `when` exists before an append,
    /// since an insert against a missing partition bound fails outright
    /// rather than falling through to a default.
    async fn ensure_partition(&self, when: DateTime<Utc>) -> Result<()> {
        migrate::apply_column_schema(&self.pool, when.year(), when.month()).await
    }
}

use chrono::Datelike;

fn trace_from_row(row: &sqlx::postgres::PgRow) -> Result<Trace> {
    let tags: Json<Vec<String>> = row.try_get("tags").map_err(|e| map_sqlx_err("trace.tags", e))?;
    let metadata: Json<std::collections::HashMap<String, serde_json::Value>> =
        row.try_get("metadata").map_err(|e| map_sqlx_err("trace.metadata", e))?;
    Ok(Trace {
        id: row.try_get("id").map_err(|e| map_sqlx_err("trace.id", e))?,
        project_id: row.try_get("project_id").map_err(|e| map_sqlx_err("trace.project_id", e))?,
        session_id: row.try_get("session_id").map_err(|e| map_sqlx_err("trace.session_id", e))?,
        user_id: row.try_get("user_id").map_err(|e| map_sqlx_err("trace.user_id", e))?,
        name: row.try_get("name").map_err(|e| map_sqlx_err("trace.name", e))?,
        status: TraceStatus::from_str(
            &row.try_get::<String, _>("status").map_err(|e| map_sqlx_err("trace.status", e))?,
        )?,
        tags: tags.0,
        metadata: metadata.0,
        created_at: row.try_get("created_at").map_err(|e| map_sqlx_err("trace.created_at", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| map_sqlx_err("trace.updated_at", e))?,
    })
}

fn span_from_row(row: &sqlx::postgres::PgRow) -> Result<Span> {
    let input: Option<Json<serde_json::Value>> = row.try_get("input").ok();
    let output: Option<Json<serde_json::Value>> = row.try_get("output").ok();
    let metadata: Json<std::collections::HashMap<String, serde_json::Value>> =
        row.try_get("metadata").map_err(|e| map_sqlx_err("span.metadata", e))?;
    let tool_uses: Json<Vec<traceforge_core::ToolUse>> =
        row.try_get("tool_uses").map_err(|e| map_sqlx_err("span.tool_uses", e))?;
    let sub_type: Option<String> = row.try_get("sub_type").ok();

    Ok(Span {
        id: row.try_get("id").map_err(|e| map_sqlx_err("span.id", e))?,
        trace_id: row.try_get("trace_id").map_err(|e| map_sqlx_err("span.trace_id", e))?,
        project_id: row.try_get("project_id").map_err(|e| map_sqlx_err("span.project_id", e))?,
        parent_span_id: row.try_get("parent_span_id").ok(),
        span_type: SpanType::from_str(
            &row.try_get::<String, _>("type").map_err(|e| map_sqlx_err("span.type", e))?,
        )
        .unwrap_or(SpanType::Llm),
        name: row.try_get("name").map_err(|e| map_sqlx_err("span.name", e))?,
        input: input.map(|j| j.0),
        output: output.map(|j| j.0),
        metadata: metadata.0,
        input_tokens: row.try_get::<Option<i64>, _>("input_tokens").ok().flatten().map(|v| v as u64),
        output_tokens: row.try_get::<Option<i64>, _>("output_tokens").ok().flatten().map(|v| v as u64),
        cache_read_tokens: row
            .try_get::<Option<i64>, _>("cache_read_tokens")
            .ok()
            .flatten()
            .map(|v| v as u64),
        cache_write_tokens: row
            .try_get::<Option<i64>, _>("cache_write_tokens")
            .ok()
            .flatten()
            .map(|v| v as u64),
        reasoning_tokens: row
            .try_get::<Option<i64>, _>("reasoning_tokens")
            .ok()
            .flatten()
            .map(|v| v as u64),
        first_token_ms: row.try_get::<Option<i64>, _>("first_token_ms").ok().flatten().map(|v| v as u64),
        duration_ms: row.try_get::<Option<i64>, _>("duration_ms").ok().flatten().map(|v| v as u64),
        cost_usd: row.try_get("cost_usd").ok(),
        status: SpanStatus::from_str(
            &row.try_get::<String, _>("status").map_err(|e| map_sqlx_err("span.status", e))?,
        )
        .unwrap_or(SpanStatus::Pending),
        error_message: row.try_get("error_message").ok(),
        model: row.try_get("model").ok(),
        provider: row.try_get("provider").ok(),
        stop_reason: row.try_get("stop_reason").ok(),
        thinking: row.try_get("thinking").ok(),
        sub_type: sub_type.and_then(|s| match s.as_str() {
            "planning" => Some(traceforge_core::LlmSubType::Planning),
            "response" => Some(traceforge_core::LlmSubType::Response),
            _ => None,
        }),
        tool_uses: tool_uses.0,
        started_at: row.try_get("started_at").map_err(|e| map_sqlx_err("span.started_at", e))?,
        ended_at: row.try_get("ended_at").map_err(|e| map_sqlx_err("span.ended_at", e))?,
    })
}

#[async_trait]
impl Store for ColumnStore {
    async fn create_trace(&self, trace: Trace) -> Result<Trace> {
        self.ensure_partition(trace.created_at).await?;
        sqlx::query(
            "INSERT INTO traces (id, project_id, session_id, user_id, name, status, tags, metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&trace.id)
        .bind(&trace.project_id)
        .bind(&trace.session_id)
        .bind(&trace.user_id)
        .bind(&trace.name)
        .bind(trace.status.as_str())
        .bind(Json(&trace.tags))
        .bind(Json(&trace.metadata))
        .bind(trace.created_at)
        .bind(trace.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("create_trace", e))?;
        Ok(trace)
    }

    async fn get_trace(&self, project_id: &str, trace_id: &str) -> Result<TraceWithSpans> {
        // Latest-wins: the newest row for this id is the current version.
        let trace_row = sqlx::query(
            "SELECT * FROM traces WHERE project_id = $1 AND id = $2 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(project_id)
        .bind(trace_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("get_trace", e))?
        .ok_or_else(|| traceforge_core::Error::not_found(format!("trace {trace_id}")))?;
        let trace = trace_from_row(&trace_row)?;

        let span_rows = sqlx::query(
            "SELECT * FROM spans WHERE project_id = $1 AND trace_id = $2 ORDER BY started_at ASC",
        )
        .bind(project_id)
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("get_trace.spans", e))?;
        let spans = span_rows.iter().map(span_from_row).collect::<Result<Vec<_>>>()?;
        Ok(TraceWithSpans { trace, spans })
    }

    async fn create_spans(&self, spans: &[Span]) -> Result<usize> {
        let mut inserted = 0usize;
        for span in spans {
            self.ensure_partition(span.started_at).await?;
            let sub_type = span.sub_type.map(|s| match s {
                traceforge_core::LlmSubType::Planning => "planning",
                traceforge_core::LlmSubType::Response => "response",
            });
            let result = sqlx::query(
                "INSERT INTO spans (
                    id, trace_id, project_id, parent_span_id, type, name, input, output, metadata,
                    input_tokens, output_tokens, cache_read_tokens, cache_write_tokens, reasoning_tokens,
                    first_token_ms, duration_ms, cost_usd, status, error_message, model, provider,
                    stop_reason, thinking, sub_type, tool_uses, started_at, ended_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                    $19, $20, $21, $22, $23, $24, $25, $26, $27
                )",
            )
            .bind(&span.id)
            .bind(&span.trace_id)
            .bind(&span.project_id)
            .bind(&span.parent_span_id)
            .bind(span.span_type.as_str())
            .bind(&span.name)
            .bind(span.input.as_ref().map(Json))
            .bind(span.output.as_ref().map(Json))
            .bind(Json(&span.metadata))
            .bind(span.input_tokens.map(|v| v as i64))
            .bind(span.output_tokens.map(|v| v as i64))
            .bind(span.cache_read_tokens.map(|v| v as i64))
            .bind(span.cache_write_tokens.map(|v| v as i64))
            .bind(span.reasoning_tokens.map(|v| v as i64))
            .bind(span.first_token_ms.map(|v| v as i64))
            .bind(span.duration_ms.map(|v| v as i64))
            .bind(span.cost_usd)
            .bind(span.status.as_str())
            .bind(&span.error_message)
            .bind(&span.model)
            .bind(&span.provider)
            .bind(&span.stop_reason)
            .bind(&span.thinking)
            .bind(sub_type)
            .bind(Json(&span.tool_uses))
            .bind(span.started_at)
            .bind(span.ended_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("create_spans", e))?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    /// No `UPDATE`: append a new row for this id with a fresher
    /// `updated_at`. Readers resolve ties by taking the newest row.
    async fn update_trace_status(
        &self,
        project_id: &str,
        trace_id: &str,
        status: TraceStatus,
    ) -> Result<()> {
        let existing = self.get_trace(project_id, trace_id).await?.trace;
        let mut updated = existing;
        updated.status = status;
        updated.updated_at = Utc::now();
        self.create_trace(updated).await?;
        Ok(())
    }

    async fn list_traces(&self, project_id: &str, filter: TraceFilter) -> Result<ListTracesResponse> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "WITH latest AS ( \
                SELECT DISTINCT ON (id) * FROM traces WHERE project_id = ",
        );
        qb.push_bind(project_id);
        qb.push(" ORDER BY id, updated_at DESC \
             ) \
             SELECT t.*, \
             COALESCE(agg.total_spans, 0) AS total_spans, \
             COALESCE(agg.total_tokens, 0) AS total_tokens, \
             COALESCE(agg.total_cost_usd, 0) AS total_cost_usd, \
             COALESCE(agg.total_duration_ms, 0) AS total_duration_ms \
             FROM latest t \
             LEFT JOIN ( \
                 SELECT trace_id, COUNT(*) AS total_spans, \
                 SUM(COALESCE(input_tokens, 0) + COALESCE(output_tokens, 0)) AS total_tokens, \
                 SUM(COALESCE(cost_usd, 0)) AS total_cost_usd, \
                 SUM(COALESCE(duration_ms, 0)) AS total_duration_ms \
                 FROM spans GROUP BY trace_id \
             ) agg ON agg.trace_id = t.id \
             WHERE 1 = 1");
        push_trace_filter_pg(&mut qb, &filter);
        qb.push(" ORDER BY t.created_at DESC LIMIT ");
        qb.push_bind(filter.limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset as i64);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(|e| map_sqlx_err("list_traces", e))?;
        let data = rows
            .iter()
            .map(|row| {
                Ok(TraceWithMetrics {
                    trace: trace_from_row(row)?,
                    total_spans: row.try_get::<i64, _>("total_spans").unwrap_or(0) as u64,
                    total_tokens: row.try_get::<i64, _>("total_tokens").unwrap_or(0) as u64,
                    total_cost_usd: row.try_get("total_cost_usd").unwrap_or(0.0),
                    total_duration_ms: row.try_get::<i64, _>("total_duration_ms").unwrap_or(0) as u64,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "WITH latest AS ( \
                SELECT DISTINCT ON (id) * FROM traces WHERE project_id = ",
        );
        count_qb.push_bind(project_id);
        count_qb.push(" ORDER BY id, updated_at DESC \
             ) \
             SELECT COUNT(*) AS n FROM latest t WHERE 1 = 1");
        push_trace_filter_pg(&mut count_qb, &filter);
        let total: i64 = count_qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("list_traces.count", e))?
            .try_get("n")
            .unwrap_or(0);

        Ok(ListTracesResponse {
            data,
            total: total as u64,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    async fn delete_all_traces(&self, _project_id: &str) -> Result<Option<u64>> {
        // Append-only: deletion is a marker row, reconciled by a background
        // compaction job rather than an in-place DELETE. No affected count
        // is known synchronously.
        Ok(None)
    }

    async fn list_sessions(&self, project_id: &str, filter: SessionFilter) -> Result<Vec<SessionSummary>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "WITH latest AS ( \
                SELECT DISTINCT ON (id) * FROM traces WHERE project_id = ",
        );
        qb.push_bind(project_id);
        qb.push(" ORDER BY id, updated_at DESC \
             ) \
             SELECT session_id, \
             MIN(created_at) AS first_seen, MAX(updated_at) AS last_seen, \
             COUNT(*) AS trace_count, \
             SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) AS error_count, \
             SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END) AS active_count \
             FROM latest WHERE session_id IS NOT NULL");
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND user_id = ");
            qb.push_bind(user_id.clone());
        }
        if let Some(from) = filter.from {
            qb.push(" AND created_at >= ");
            qb.push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND created_at <= ");
            qb.push_bind(to);
        }
        qb.push(" GROUP BY session_id ORDER BY last_seen DESC LIMIT ");
        qb.push_bind(filter.limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset as i64);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(|e| map_sqlx_err("list_sessions", e))?;

        let session_ids: Vec<String> = rows
            .iter()
            .filter_map(|row| row.try_get::<Option<String>, _>("session_id").ok().flatten())
            .collect();

        let mut token_cost: std::collections::HashMap<String, (i64, f64)> = std::collections::HashMap::new();
        if !session_ids.is_empty() {
            let mut tok_qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "WITH latest AS ( \
                    SELECT DISTINCT ON (id) * FROM traces WHERE project_id = ",
            );
            tok_qb.push_bind(project_id);
            tok_qb.push(" ORDER BY id, updated_at DESC \
                 ) \
                 SELECT t.session_id AS session_id, \
                 SUM(COALESCE(s.input_tokens, 0) + COALESCE(s.output_tokens, 0)) AS total_tokens, \
                 SUM(COALESCE(s.cost_usd, 0)) AS total_cost_usd \
                 FROM spans s JOIN latest t ON t.project_id = s.project_id AND t.id = s.trace_id \
                 WHERE t.session_id IN (");
            let mut separated = tok_qb.separated(", ");
            for session_id in &session_ids {
                separated.push_bind(session_id.clone());
            }
            tok_qb.push(") GROUP BY t.session_id");

            let tok_rows = tok_qb
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_err("list_sessions.tokens", e))?;
            for row in tok_rows {
                let session_id: String = row.try_get("session_id").unwrap_or_default();
                let tokens: i64 = row.try_get("total_tokens").unwrap_or(0);
                let cost: f64 = row.try_get("total_cost_usd").unwrap_or(0.0);
                token_cost.insert(session_id, (tokens, cost));
            }
        }

        rows.iter()
            .map(|row| {
                let session_id: String = row.try_get("session_id").unwrap_or_default();
                let (total_tokens, total_cost_usd) = token_cost.get(&session_id).copied().unwrap_or((0, 0.0));
                Ok(SessionSummary {
                    session_id,
                    first_seen: row.try_get("first_seen").map_err(|e| map_sqlx_err("session.first_seen", e))?,
                    last_seen: row.try_get("last_seen").map_err(|e| map_sqlx_err("session.last_seen", e))?,
                    trace_count: row.try_get::<i64, _>("trace_count").unwrap_or(0) as u64,
                    total_tokens: total_tokens as u64,
                    total_cost_usd,
                    has_error: row.try_get::<i64, _>("error_count").unwrap_or(0) > 0,
                    has_active: row.try_get::<i64, _>("active_count").unwrap_or(0) > 0,
                })
            })
            .collect()
    }

    async fn get_stats(&self, project_id: &str, period: StatsPeriod) -> Result<Stats> {
        let row = sqlx::query(
            "WITH latest AS ( \
                SELECT DISTINCT ON (id) * FROM traces WHERE project_id = $1 \
                ORDER BY id, updated_at DESC \
             ) \
             SELECT \
             COUNT(DISTINCT t.id) AS total_traces, \
             COUNT(s.id) AS total_spans, \
             SUM(COALESCE(s.input_tokens, 0) + COALESCE(s.output_tokens, 0)) AS total_tokens, \
             SUM(COALESCE(s.cost_usd, 0)) AS total_cost_usd, \
             AVG(s.duration_ms) AS avg_duration_ms, \
             SUM(CASE WHEN t.status = 'error' THEN 1 ELSE 0 END) AS error_traces \
             FROM latest t LEFT JOIN spans s ON s.project_id = t.project_id AND s.trace_id = t.id \
             WHERE t.created_at >= $2 AND t.created_at <= $3",
        )
        .bind(project_id)
        .bind(period.from)
        .bind(period.to)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("get_stats", e))?;

        let total_traces: i64 = row.try_get("total_traces").unwrap_or(0);
        let error_traces: i64 = row.try_get("error_traces").unwrap_or(0);
        Ok(Stats {
            total_traces: total_traces as u64,
            total_spans: row.try_get::<i64, _>("total_spans").unwrap_or(0) as u64,
            total_tokens: row.try_get::<i64, _>("total_tokens").unwrap_or(0) as u64,
            total_cost_usd: row.try_get("total_cost_usd").unwrap_or(0.0),
            avg_duration_ms: row.try_get("avg_duration_ms").unwrap_or(0.0),
            error_rate: if total_traces > 0 {
                error_traces as f64 / total_traces as f64
            } else {
                0.0
            },
        })
    }

    async fn get_usage_time_series(
        &self,
        project_id: &str,
        opts: UsageSeriesOptions,
    ) -> Result<Vec<UsagePoint>> {
        let bucket_expr = match opts.granularity {
            Granularity::Hour => "date_trunc('hour', t.created_at)",
            Granularity::Day => "date_trunc('day', t.created_at)",
            Granularity::Week => "date_trunc('week', t.created_at)",
        };
        let sql = format!(
            "WITH latest AS ( \
                SELECT DISTINCT ON (id) * FROM traces WHERE project_id = $1 \
                ORDER BY id, updated_at DESC \
             ) \
             SELECT {bucket_expr} AS bucket, \
             COUNT(DISTINCT t.id) AS traces, \
             COUNT(s.id) AS spans, \
             SUM(COALESCE(s.input_tokens, 0) + COALESCE(s.output_tokens, 0)) AS tokens, \
             SUM(COALESCE(s.cost_usd, 0)) AS cost_usd \
             FROM latest t LEFT JOIN spans s ON s.project_id = t.project_id AND s.trace_id = t.id \
             WHERE t.created_at >= $2 AND t.created_at <= $3 \
             GROUP BY bucket ORDER BY bucket ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(opts.from)
            .bind(opts.to)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("get_usage_time_series", e))?;

        rows.iter()
            .map(|row| {
                Ok(UsagePoint {
                    time: row.try_get("bucket").map_err(|e| map_sqlx_err("usage.bucket", e))?,
                    traces: row.try_get::<i64, _>("traces").unwrap_or(0) as u64,
                    spans: row.try_get::<i64, _>("spans").unwrap_or(0) as u64,
                    tokens: row.try_get::<i64, _>("tokens").unwrap_or(0) as u64,
                    cost_usd: row.try_get("cost_usd").unwrap_or(0.0),
                })
            })
            .collect()
    }
}

fn push_trace_filter_pg(qb: &mut QueryBuilder<Postgres>, filter: &TraceFilter) {
    if let Some(session_id) = &filter.session_id {
        qb.push(" AND t.session_id = ");
        qb.push_bind(session_id.clone());
    }
    if let Some(user_id) = &filter.user_id {
        qb.push(" AND t.user_id = ");
        qb.push_bind(user_id.clone());
    }
    if let Some(status) = filter.status {
        qb.push(" AND t.status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(from) = filter.from {
        qb.push(" AND t.created_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND t.created_at <= ");
        qb.push_bind(to);
    }
}
