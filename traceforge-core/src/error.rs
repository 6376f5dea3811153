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

//! Core error kinds shared across the ingest-to-trace pipeline.
//!
//! Every crate boundary converges on these four kinds so the HTTP layer
//! (out of scope for this crate) can map them to status codes without
//! reaching into backend-specific error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Entity missing under the given project scope.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed body or unknown enum value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Project key mismatch / cross-tenant access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Store or parser defect; the detailed message is for logs only.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}
