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

//! Schema migrator. Each statement is applied independently and a
//! failure that looks like "this was already applied" is swallowed rather
//! than aborting the sequence, so the same migrator can run against a
//! freshly created database and a long-lived one without a separate
//! bookkeeping table.

use sqlx::{PgPool, SqlitePool};

use crate::error::{map_sqlx_err, Result};

/// True when the database error text indicates the object already exists,
/// i.e. a prior run of this migrator got here first.
fn is_benign_rerun(err: &sqlx::Error) -> bool {
    let Some(db_err) = err.as_database_error() else {
        return false;
    };
    let msg = db_err.message().to_ascii_lowercase();
    msg.contains("already exists") || msg.contains("duplicate column")
}

const ROW_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE traces (
        id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        session_id TEXT,
        user_id TEXT,
        name TEXT,
        status TEXT NOT NULL,
        tags TEXT NOT NULL DEFAULT '[]',
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (project_id, id)
    )
    "#,
    "CREATE INDEX idx_traces_project_created ON traces (project_id, created_at)",
    "CREATE INDEX idx_traces_project_session ON traces (project_id, session_id)",
    r#"
    CREATE TABLE spans (
        id TEXT NOT NULL,
        trace_id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        parent_span_id TEXT,
        type TEXT NOT NULL,
        name TEXT NOT NULL,
        input TEXT,
        output TEXT,
        metadata TEXT NOT NULL DEFAULT '{}',
        input_tokens INTEGER,
        output_tokens INTEGER,
        cache_read_tokens INTEGER,
        cache_write_tokens INTEGER,
        reasoning_tokens INTEGER,
        first_token_ms INTEGER,
        duration_ms INTEGER,
        cost_usd REAL,
        status TEXT NOT NULL,
        error_message TEXT,
        model TEXT,
        provider TEXT,
        stop_reason TEXT,
        thinking TEXT,
        sub_type TEXT,
        tool_uses TEXT NOT NULL DEFAULT '[]',
        started_at TEXT NOT NULL,
        ended_at TEXT NOT NULL,
        PRIMARY KEY (project_id, id),
        FOREIGN KEY (project_id, trace_id) REFERENCES traces (project_id, id)
    )
    "#,
    "CREATE INDEX idx_spans_trace ON spans (project_id, trace_id)",
    "CREATE INDEX idx_spans_started ON spans (project_id, started_at)",
];

/// Applies the transactional row-store schema. Run once at service start;
/// safe to run again against an existing database.
pub async fn apply_row_schema(pool: &SqlitePool) -> Result<()> {
    for stmt in ROW_SCHEMA {
        if let Err(err) = sqlx::query(stmt).execute(pool).await {
            if is_benign_rerun(&err) {
                tracing::debug!(statement = stmt, "row schema statement already applied");
                continue;
            }
            return Err(map_sqlx_err("apply_row_schema", err));
        }
    }
    Ok(())
}

const COLUMN_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE traces (
        id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        session_id TEXT,
        user_id TEXT,
        name TEXT,
        status TEXT NOT NULL,
        tags JSONB NOT NULL DEFAULT '[]',
        metadata JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    ) PARTITION BY RANGE (created_at)
    "#,
    "CREATE INDEX idx_traces_project_created ON traces (project_id, created_at)",
    "CREATE INDEX idx_traces_project_id ON traces (project_id, id, updated_at DESC)",
    r#"
    CREATE TABLE spans (
        id TEXT NOT NULL,
        trace_id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        parent_span_id TEXT,
        type TEXT NOT NULL,
        name TEXT NOT NULL,
        input JSONB,
        output JSONB,
        metadata JSONB NOT NULL DEFAULT '{}',
        input_tokens BIGINT,
        output_tokens BIGINT,
        cache_read_tokens BIGINT,
        cache_write_tokens BIGINT,
        reasoning_tokens BIGINT,
        first_token_ms BIGINT,
        duration_ms BIGINT,
        cost_usd DOUBLE PRECISION,
        status TEXT NOT NULL,
        error_message TEXT,
        model TEXT,
        provider TEXT,
        stop_reason TEXT,
        thinking TEXT,
        sub_type TEXT,
        tool_uses JSONB NOT NULL DEFAULT '[]',
        started_at TIMESTAMPTZ NOT NULL,
        ended_at TIMESTAMPTZ NOT NULL
    ) PARTITION BY RANGE (started_at)
    "#,
    "CREATE INDEX idx_spans_trace ON spans (project_id, trace_id)",
    "CREATE INDEX idx_spans_started ON spans (project_id, started_at)",
];

/// Creates the current month's partition for an append-only table, named
/// `<table>_yYYYY_mMM`. A `CREATE TABLE ... PARTITION OF` against a bound
/// that already exists raises the same "already exists" error class as a
/// duplicate `CREATE TABLE`, so it flows through the same idempotency check.
pub fn month_partition_ddl(table: &str, year: i32, month: u32) -> String {
    let next = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    format!(
        "CREATE TABLE {table}_y{year}_m{month:02} PARTITION OF {table} \
         FOR VALUES FROM ('{year}-{month:02}-01') TO ('{next_year}-{next_month:02}-01')",
        next_year = next.0,
        next_month = next.1,
    )
}

/// Applies the append-only column-store schema plus this month's and next
/// month's partitions, so ingest never blocks on a missing partition at a
/// month boundary.
pub async fn apply_column_schema(pool: &PgPool, year: i32, month: u32) -> Result<()> {
    for stmt in COLUMN_SCHEMA {
        if let Err(err) = sqlx::query(stmt).execute(pool).await {
            if is_benign_rerun(&err) {
                tracing::debug!(statement = stmt, "column schema statement already applied");
                continue;
            }
            return Err(map_sqlx_err("apply_column_schema", err));
        }
    }

    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    for (y, m) in [(year, month), (next_year, next_month)] {
        for table in ["traces", "spans"] {
            let ddl = month_partition_ddl(table, y, m);
            if let Err(err) = sqlx::query(&ddl).execute(pool).await {
                if is_benign_rerun(&err) {
                    continue;
                }
                return Err(map_sqlx_err("apply_column_schema partition", err));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_partition_ddl_wraps_december() {
        let ddl = month_partition_ddl("traces", 2025, 12);
        assert!(ddl.contains("FROM ('2025-12-01') TO ('2026-01-01')"));
    }

    #[test]
    fn month_partition_ddl_names_table() {
        let ddl = month_partition_ddl("spans", 2025, 3);
        assert!(ddl.starts_with("CREATE TABLE spans_y2025_m03"));
    }
}
