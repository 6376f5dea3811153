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

//! TraceForge Query
//!
//! The read side of the pipeline: the trace-detail processor that turns
//! a flat span list into a tree with timeline geometry, and the
//! list/stats query layer that fronts the repository contract.

pub mod detail;
pub mod query;

pub use detail::{process_trace_detail, ProcessedSpan, TraceDetailResponse, TraceTreeNode};
pub use query::QueryService;
