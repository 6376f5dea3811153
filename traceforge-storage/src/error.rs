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

use traceforge_core::Error as CoreError;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Maps a `sqlx::Error` onto the four core error kinds. Row-not-found
/// becomes `NotFound`; everything else is `Internal`, with the detailed
/// message logged rather than returned verbatim to callers.
pub fn map_sqlx_err(context: &str, err: sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::RowNotFound => CoreError::not_found(context),
        other => {
            tracing::error!(error = %other, context, "store operation failed");
            CoreError::internal(format!("{context}: {other}"))
        }
    }
}
