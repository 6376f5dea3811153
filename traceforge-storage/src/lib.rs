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

//! TraceForge Storage
//!
//! The dual-store repository contract: one `Store` trait, two
//! independent backends behind it.
//!
//! - [`row::RowStore`] is a transactional SQLite/Postgres schema with
//!   foreign keys and in-place `UPDATE`, favouring point-lookup latency and
//!   strict consistency.
//! - [`column::ColumnStore`] is an append-only, month-partitioned Postgres
//!   schema where a "trace update" is a fresh row and readers resolve ties
//!   by `updatedAt`, favouring ingest throughput and wide scans.
//!
//! [`migrate`] applies either schema idempotently: statements that fail
//! because the object already exists are treated as success rather than
//! aborting startup.

pub mod column;
pub mod error;
pub mod migrate;
pub mod row;
pub mod store;

pub use column::ColumnStore;
pub use error::{map_sqlx_err, Result};
pub use row::RowStore;
pub use store::{
    clamp_limit, clamp_offset, Granularity, ListTracesResponse, SessionFilter, SessionSummary,
    Stats, StatsPeriod, Store, TraceFilter, TraceWithMetrics, UsagePoint, UsageSeriesOptions,
    DEFAULT_LIMIT, MAX_LIMIT,
};
