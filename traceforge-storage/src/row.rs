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

//! Row-oriented backend: one SQLite (or Postgres, via the same SQL dialect
//! subset) database, `UPDATE`-in-place traces, foreign-keyed spans. This is
//! the backend an operator reaches for first — strict consistency, cheap
//! point lookups, no partition bookkeeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;

use traceforge_core::{Span, SpanStatus, SpanType, Trace, TraceStatus, TraceWithSpans};

use crate::error::{map_sqlx_err, Result};
use crate::store::{
    Granularity, ListTracesResponse, SessionFilter, SessionSummary, Stats, StatsPeriod, Store,
    TraceFilter, TraceWithMetrics, UsagePoint, UsageSeriesOptions,
};

pub struct RowStore {
    pool: SqlitePool,
}

impl RowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| traceforge_core::Error::internal(format!("bad timestamp {s}: {e}")))
}

fn trace_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Trace> {
    Ok(Trace {
        id: row.try_get("id").map_err(|e| map_sqlx_err("trace.id", e))?,
        project_id: row
            .try_get("project_id")
            .map_err(|e| map_sqlx_err("trace.project_id", e))?,
        session_id: row
            .try_get("session_id")
            .map_err(|e| map_sqlx_err("trace.session_id", e))?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| map_sqlx_err("trace.user_id", e))?,
        name: row.try_get("name").map_err(|e| map_sqlx_err("trace.name", e))?,
        status: TraceStatus::from_str(
            &row.try_get::<String, _>("status")
                .map_err(|e| map_sqlx_err("trace.status", e))?,
        )?,
        tags: serde_json::from_str(
            &row.try_get::<String, _>("tags").map_err(|e| map_sqlx_err("trace.tags", e))?,
        )
        .unwrap_or_default(),
        metadata: serde_json::from_str(
            &row.try_get::<String, _>("metadata")
                .map_err(|e| map_sqlx_err("trace.metadata", e))?,
        )
        .unwrap_or_default(),
        created_at: parse_ts(
            &row.try_get::<String, _>("created_at")
                .map_err(|e| map_sqlx_err("trace.created_at", e))?,
        )?,
        updated_at: parse_ts(
            &row.try_get::<String, _>("updated_at")
                .map_err(|e| map_sqlx_err("trace.updated_at", e))?,
        )?,
    })
}

fn span_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Span> {
    let sub_type: Option<String> = row.try_get("sub_type").ok();
    Ok(Span {
        id: row.try_get("id").map_err(|e| map_sqlx_err("span.id", e))?,
        trace_id: row
            .try_get("trace_id")
            .map_err(|e| map_sqlx_err("span.trace_id", e))?,
        project_id: row
            .try_get("project_id")
            .map_err(|e| map_sqlx_err("span.project_id", e))?,
        parent_span_id: row.try_get("parent_span_id").ok(),
        span_type: SpanType::from_str(
            &row.try_get::<String, _>("type").map_err(|e| map_sqlx_err("span.type", e))?,
        )
        .unwrap_or(SpanType::Llm),
        name: row.try_get("name").map_err(|e| map_sqlx_err("span.name", e))?,
        input: row
            .try_get::<Option<String>, _>("input")
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str(&s).ok()),
        output: row
            .try_get::<Option<String>, _>("output")
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str(&s).ok()),
        metadata: row
            .try_get::<String, _>("metadata")
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
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
        tool_uses: row
            .try_get::<String, _>("tool_uses")
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        started_at: parse_ts(
            &row.try_get::<String, _>("started_at").map_err(|e| map_sqlx_err("span.started_at", e))?,
        )?,
        ended_at: parse_ts(
            &row.try_get::<String, _>("ended_at").map_err(|e| map_sqlx_err("span.ended_at", e))?,
        )?,
    })
}

#[async_trait]
impl Store for RowStore {
    async fn create_trace(&self, trace: Trace) -> Result<Trace> {
        let tags = serde_json::to_string(&trace.tags).unwrap_or_else(|_| "[]".into());
        let metadata = serde_json::to_string(&trace.metadata).unwrap_or_else(|_| "{}".into());

        sqlx::query(
            r#"
            INSERT INTO traces (id, project_id, session_id, user_id, name, status, tags, metadata, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (project_id, id) DO UPDATE SET
                session_id = excluded.session_id,
                user_id = excluded.user_id,
                name = excluded.name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&trace.id)
        .bind(&trace.project_id)
        .bind(&trace.session_id)
        .bind(&trace.user_id)
        .bind(&trace.name)
        .bind(trace.status.as_str())
        .bind(tags)
        .bind(metadata)
        .bind(trace.created_at.to_rfc3339())
        .bind(trace.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("create_trace", e))?;

        Ok(trace)
    }

    async fn get_trace(&self, project_id: &str, trace_id: &str) -> Result<TraceWithSpans> {
        let trace_row = sqlx::query("SELECT * FROM traces WHERE project_id = ?1 AND id = ?2")
            .bind(project_id)
            .bind(trace_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("get_trace", e))?
            .ok_or_else(|| traceforge_core::Error::not_found(format!("trace {trace_id}")))?;
        let trace = trace_from_row(&trace_row)?;

        let span_rows = sqlx::query(
            "SELECT * FROM spans WHERE project_id = ?1 AND trace_id = ?2 ORDER BY started_at ASC",
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
        if spans.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_err("create_spans.begin", e))?;
        for span in spans {
            let input = span.input.as_ref().map(|v| v.to_string());
            let output = span.output.as_ref().map(|v| v.to_string());
            let metadata = serde_json::to_string(&span.metadata).unwrap_or_else(|_| "{}".into());
            let tool_uses = serde_json::to_string(&span.tool_uses).unwrap_or_else(|_| "[]".into());
            let sub_type = span.sub_type.map(|s| match s {
                traceforge_core::LlmSubType::Planning => "planning",
                traceforge_core::LlmSubType::Response => "response",
            });

            sqlx::query(
                r#"
                INSERT INTO spans (
                    id, trace_id, project_id, parent_span_id, type, name, input, output, metadata,
                    input_tokens, output_tokens, cache_read_tokens, cache_write_tokens, reasoning_tokens,
                    first_token_ms, duration_ms, cost_usd, status, error_message, model, provider,
                    stop_reason, thinking, sub_type, tool_uses, started_at, ended_at
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
                    ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27
                )
                ON CONFLICT (project_id, id) DO NOTHING
                "#,
            )
            .bind(&span.id)
            .bind(&span.trace_id)
            .bind(&span.project_id)
            .bind(&span.parent_span_id)
            .bind(span.span_type.as_str())
            .bind(&span.name)
            .bind(input)
            .bind(output)
            .bind(metadata)
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
            .bind(tool_uses)
            .bind(span.started_at.to_rfc3339())
            .bind(span.ended_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("create_spans.insert", e))?;
        }
        tx.commit().await.map_err(|e| map_sqlx_err("create_spans.commit", e))?;
        Ok(spans.len())
    }

    async fn update_trace_status(
        &self,
        project_id: &str,
        trace_id: &str,
        status: TraceStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE traces SET status = ?1, updated_at = ?2 WHERE project_id = ?3 AND id = ?4",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(project_id)
        .bind(trace_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("update_trace_status", e))?;

        if result.rows_affected() == 0 {
            return Err(traceforge_core::Error::not_found(format!("trace {trace_id}")));
        }
        Ok(())
    }

    async fn list_traces(&self, project_id: &str, filter: TraceFilter) -> Result<ListTracesResponse> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT t.*, \
             COALESCE(agg.total_spans, 0) AS total_spans, \
             COALESCE(agg.total_tokens, 0) AS total_tokens, \
             COALESCE(agg.total_cost_usd, 0) AS total_cost_usd, \
             COALESCE(agg.total_duration_ms, 0) AS total_duration_ms \
             FROM traces t \
             LEFT JOIN ( \
                 SELECT trace_id, COUNT(*) AS total_spans, \
                 SUM(COALESCE(input_tokens, 0) + COALESCE(output_tokens, 0)) AS total_tokens, \
                 SUM(COALESCE(cost_usd, 0)) AS total_cost_usd, \
                 SUM(COALESCE(duration_ms, 0)) AS total_duration_ms \
                 FROM spans GROUP BY trace_id \
             ) agg ON agg.trace_id = t.id \
             WHERE t.project_id = ",
        );
        qb.push_bind(project_id);
        push_trace_filter(&mut qb, &filter);
        qb.push(" ORDER BY t.created_at DESC LIMIT ");
        qb.push_bind(filter.limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset as i64);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("list_traces", e))?;

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

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS n FROM traces t WHERE t.project_id = ");
        count_qb.push_bind(project_id);
        push_trace_filter(&mut count_qb, &filter);
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

    async fn delete_all_traces(&self, project_id: &str) -> Result<Option<u64>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("delete_all_traces.begin", e))?;
        sqlx::query("DELETE FROM spans WHERE project_id = ?1")
            .bind(project_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("delete_all_traces.spans", e))?;
        let result = sqlx::query("DELETE FROM traces WHERE project_id = ?1")
            .bind(project_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("delete_all_traces.traces", e))?;
        tx.commit().await.map_err(|e| map_sqlx_err("delete_all_traces.commit", e))?;
        Ok(Some(result.rows_affected()))
    }

    async fn list_sessions(&self, project_id: &str, filter: SessionFilter) -> Result<Vec<SessionSummary>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT session_id, \
             MIN(created_at) AS first_seen, MAX(updated_at) AS last_seen, \
             COUNT(*) AS trace_count, \
             SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) AS error_count, \
             SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END) AS active_count \
             FROM traces WHERE project_id = ",
        );
        qb.push_bind(project_id);
        qb.push(" AND session_id IS NOT NULL");
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND user_id = ");
            qb.push_bind(user_id.clone());
        }
        if let Some(from) = filter.from {
            qb.push(" AND created_at >= ");
            qb.push_bind(from.to_rfc3339());
        }
        if let Some(to) = filter.to {
            qb.push(" AND created_at <= ");
            qb.push_bind(to.to_rfc3339());
        }
        qb.push(" GROUP BY session_id ORDER BY last_seen DESC LIMIT ");
        qb.push_bind(filter.limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset as i64);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(|e| map_sqlx_err("list_sessions", e))?;

        let session_ids: Vec<String> = rows
            .iter()
            .filter_map(|r| r.try_get::<Option<String>, _>("session_id").ok().flatten())
            .collect();

        let mut token_cost: HashMap<String, (i64, f64)> = HashMap::new();
        if !session_ids.is_empty() {
            let mut tok_qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT t.session_id AS session_id, \
                 SUM(COALESCE(s.input_tokens, 0) + COALESCE(s.output_tokens, 0)) AS total_tokens, \
                 SUM(COALESCE(s.cost_usd, 0)) AS total_cost_usd \
                 FROM spans s JOIN traces t ON t.project_id = s.project_id AND t.id = s.trace_id \
                 WHERE s.project_id = ",
            );
            tok_qb.push_bind(project_id);
            tok_qb.push(" AND t.session_id IN (");
            let mut sep = tok_qb.separated(", ");
            for sid in &session_ids {
                sep.push_bind(sid.clone());
            }
            tok_qb.push(") GROUP BY t.session_id");
            let tok_rows = tok_qb
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_err("list_sessions.tokens", e))?;
            for row in tok_rows {
                let sid: String = row.try_get("session_id").unwrap_or_default();
                let tokens: i64 = row.try_get("total_tokens").unwrap_or(0);
                let cost: f64 = row.try_get("total_cost_usd").unwrap_or(0.0);
                token_cost.insert(sid, (tokens, cost));
            }
        }

        rows.iter()
            .map(|row| {
                let session_id: String = row
                    .try_get::<Option<String>, _>("session_id")
                    .map_err(|e| map_sqlx_err("session.session_id", e))?
                    .unwrap_or_default();
                let (total_tokens, total_cost_usd) =
                    token_cost.get(&session_id).copied().unwrap_or((0, 0.0));
                Ok(SessionSummary {
                    session_id,
                    first_seen: parse_ts(&row.try_get::<String, _>("first_seen").unwrap_or_default())?,
                    last_seen: parse_ts(&row.try_get::<String, _>("last_seen").unwrap_or_default())?,
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
            "SELECT \
             COUNT(DISTINCT t.id) AS total_traces, \
             COUNT(s.id) AS total_spans, \
             SUM(COALESCE(s.input_tokens, 0) + COALESCE(s.output_tokens, 0)) AS total_tokens, \
             SUM(COALESCE(s.cost_usd, 0)) AS total_cost_usd, \
             AVG(s.duration_ms) AS avg_duration_ms, \
             SUM(CASE WHEN t.status = 'error' THEN 1 ELSE 0 END) AS error_traces \
             FROM traces t LEFT JOIN spans s ON s.project_id = t.project_id AND s.trace_id = t.id \
             WHERE t.project_id = ?1 AND t.created_at >= ?2 AND t.created_at <= ?3",
        )
        .bind(project_id)
        .bind(period.from.to_rfc3339())
        .bind(period.to.to_rfc3339())
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
        let fmt = match opts.granularity {
            Granularity::Hour => "%Y-%m-%dT%H:00:00",
            Granularity::Day => "%Y-%m-%dT00:00:00",
            Granularity::Week => "%Y-%W",
        };
        let rows = sqlx::query(
            "SELECT strftime(?1, t.created_at) AS bucket, \
             COUNT(DISTINCT t.id) AS traces, \
             COUNT(s.id) AS spans, \
             SUM(COALESCE(s.input_tokens, 0) + COALESCE(s.output_tokens, 0)) AS tokens, \
             SUM(COALESCE(s.cost_usd, 0)) AS cost_usd \
             FROM traces t LEFT JOIN spans s ON s.project_id = t.project_id AND s.trace_id = t.id \
             WHERE t.project_id = ?2 AND t.created_at >= ?3 AND t.created_at <= ?4 \
             GROUP BY bucket ORDER BY bucket ASC",
        )
        .bind(fmt)
        .bind(project_id)
        .bind(opts.from.to_rfc3339())
        .bind(opts.to.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("get_usage_time_series", e))?;

        rows.iter()
            .map(|row| {
                let bucket: String = row.try_get("bucket").unwrap_or_default();
                Ok(UsagePoint {
                    time: parse_bucket(&bucket, opts.granularity)?,
                    traces: row.try_get::<i64, _>("traces").unwrap_or(0) as u64,
                    spans: row.try_get::<i64, _>("spans").unwrap_or(0) as u64,
                    tokens: row.try_get::<i64, _>("tokens").unwrap_or(0) as u64,
                    cost_usd: row.try_get("cost_usd").unwrap_or(0.0),
                })
            })
            .collect()
    }
}

fn push_trace_filter(qb: &mut QueryBuilder<Sqlite>, filter: &TraceFilter) {
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
        qb.push_bind(from.to_rfc3339());
    }
    if let Some(to) = filter.to {
        qb.push(" AND t.created_at <= ");
        qb.push_bind(to.to_rfc3339());
    }
}

fn parse_bucket(bucket: &str, granularity: Granularity) -> Result<DateTime<Utc>> {
    match granularity {
        Granularity::Week => {
            // `strftime('%Y-%W', ...)` yields "YYYY-WW"; anchor to the Monday
            // of that ISO-ish week.
            let (year, week) = bucket
                .split_once('-')
                .ok_or_else(|| traceforge_core::Error::internal(format!("bad week bucket {bucket}")))?;
            let year: i32 = year
                .parse()
                .map_err(|_| traceforge_core::Error::internal(format!("bad week bucket {bucket}")))?;
            let week: u32 = week
                .parse()
                .map_err(|_| traceforge_core::Error::internal(format!("bad week bucket {bucket}")))?;
            chrono::NaiveDate::from_isoywd_opt(year, week.max(1), chrono::Weekday::Mon)
                .map(|d| DateTime::from_naive_utc_and_offset(d.and_hms_opt(0, 0, 0).unwrap(), Utc))
                .ok_or_else(|| traceforge_core::Error::internal(format!("bad week bucket {bucket}")))
        }
        _ => parse_ts(&format!("{bucket}Z")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use traceforge_core::new_id;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::apply_row_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn create_and_get_trace_round_trips() {
        let pool = test_pool().await;
        let store = RowStore::new(pool);
        let trace = Trace::new(new_id(), "proj-1".into());
        let created = store.create_trace(trace.clone()).await.unwrap();
        let fetched = store.get_trace(&created.project_id, &created.id).await.unwrap();
        assert_eq!(fetched.trace.id, created.id);
        assert!(fetched.spans.is_empty());
    }

    #[tokio::test]
    async fn get_trace_missing_is_not_found() {
        let pool = test_pool().await;
        let store = RowStore::new(pool);
        let err = store.get_trace("proj-1", "nope").await.unwrap_err();
        assert!(matches!(err, traceforge_core::Error::NotFound(_)));
    }

    #[tokio::test]
    async fn update_trace_status_changes_status() {
        let pool = test_pool().await;
        let store = RowStore::new(pool);
        let trace = Trace::new(new_id(), "proj-1".into());
        store.create_trace(trace.clone()).await.unwrap();
        store
            .update_trace_status(&trace.project_id, &trace.id, TraceStatus::Completed)
            .await
            .unwrap();
        let fetched = store.get_trace(&trace.project_id, &trace.id).await.unwrap();
        assert_eq!(fetched.trace.status, TraceStatus::Completed);
    }
}
