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

//! TraceForge Core
//!
//! Domain model, error kinds, and the pricing calculator shared by the
//! ingest pipeline, the dual store, and the trace-detail processor.

pub mod auth;
pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod pricing;

pub use config::{IngestConfig, IngestMode, StoreBackend};
pub use error::{Error, Result};
pub use event::{IngestEvent, IngestEventError, IngestRequest, IngestResponse};
pub use model::{
    new_id, LlmSubType, Span, SpanStatus, SpanType, ToolUse, Trace, TraceStatus, TraceWithSpans,
};
pub use pricing::{ModelRate, PricingCalculator, PricingError};
