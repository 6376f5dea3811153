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

//! `POST /api/v1/ingest`.

use axum::extract::State;
use axum::Json;

use traceforge_core::{IngestRequest, IngestResponse};

use crate::auth::AuthContext;
use crate::state::AppState;

pub async fn ingest(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<IngestRequest>,
) -> Json<IngestResponse> {
    let response = state.ingest.ingest_events(&auth.project_id, body.events).await;
    Json(response)
}
